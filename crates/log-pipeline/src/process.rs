//! 외부 로그 프로세스 소유 타입
//!
//! [`LogProcess`]는 자식 프로세스 핸들과 stdout 파이프를 함께 소유합니다.
//! `kill_on_drop`으로 생성되므로 어떤 경로로 드롭되더라도 프로세스가 남지 않으며,
//! 정상 종료 경로에서는 [`LogProcess::shutdown`]이 파이프 닫기, kill, wait를 순서대로 수행합니다.

use std::path::Path;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};

use proxylog_core::error::ProcessError;

/// 수동 실행과 구분하기 위한 환경변수 마커
pub const LAUNCH_MARKER_ENV: &str = "IN_LOG_READER";

/// 한 라인의 최대 바이트 수 (줄바꿈 제외)
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// 실행 중인 로그 프로세스
#[derive(Debug)]
pub struct LogProcess {
    command: String,
    child: Child,
    stdout: Option<BufReader<ChildStdout>>,
    buf: Vec<u8>,
}

impl LogProcess {
    /// 명령 문자열을 공백 단위로 분리하여 프로세스를 실행합니다.
    ///
    /// `extra_arg`가 있으면 마지막 인자로 추가됩니다 (재개 인자).
    pub fn spawn(
        command: &str,
        work_dir: Option<&Path>,
        extra_arg: Option<String>,
    ) -> Result<Self, ProcessError> {
        let mut parts = command.split(' ').filter(|p| !p.is_empty());
        let program = parts.next().ok_or(ProcessError::EmptyCommand)?;

        let mut cmd = Command::new(program);
        cmd.args(parts)
            .args(extra_arg)
            .env(LAUNCH_MARKER_ENV, "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = work_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| ProcessError::Spawn {
            command: command.to_owned(),
            reason: e.to_string(),
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProcessError::Pipe("stdout not captured".to_owned()))?;

        tracing::debug!(command, pid = child.id(), "log process launched");

        Ok(Self {
            command: command.to_owned(),
            child,
            stdout: Some(BufReader::new(stdout)),
            buf: Vec::with_capacity(1024),
        })
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// stdout에서 다음 라인을 읽습니다. EOF 또는 파이프가 닫혔으면 `None`.
    ///
    /// 줄바꿈은 제거되며, 잘못된 UTF-8은 대체 문자로 치환됩니다.
    /// [`MAX_LINE_BYTES`]를 넘는 라인은 경고 후 버리고 다음 라인을 읽습니다.
    pub async fn next_line(&mut self) -> Result<Option<String>, ProcessError> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };

        loop {
            self.buf.clear();
            let mut dropped = 0usize;

            loop {
                let available = stdout
                    .fill_buf()
                    .await
                    .map_err(|e| ProcessError::Pipe(e.to_string()))?;
                if available.is_empty() {
                    if self.buf.is_empty() && dropped == 0 {
                        return Ok(None);
                    }
                    break;
                }

                let (len, complete) = match available.iter().position(|&b| b == b'\n') {
                    Some(i) => (i + 1, true),
                    None => (available.len(), false),
                };
                if dropped > 0 || self.buf.len() + len > MAX_LINE_BYTES + 1 {
                    dropped += self.buf.len() + len;
                    self.buf.clear();
                } else {
                    self.buf.extend_from_slice(&available[..len]);
                }
                stdout.consume(len);

                if complete {
                    break;
                }
            }

            if dropped > 0 {
                tracing::warn!(
                    command = %self.command,
                    bytes = dropped,
                    limit = MAX_LINE_BYTES,
                    "dropping over-long log line"
                );
                continue;
            }

            while matches!(self.buf.last(), Some(b'\n' | b'\r')) {
                self.buf.pop();
            }
            return Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()));
        }
    }

    /// 프로세스 종료를 기다립니다.
    pub async fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        self.child
            .wait()
            .await
            .map_err(|e| ProcessError::Wait(e.to_string()))
    }

    /// 파이프를 닫고 kill 시그널을 보낸 뒤 종료를 기다립니다.
    ///
    /// 각 단계의 에러를 모두 모아 반환합니다. 이미 종료된 프로세스에 대한
    /// kill 실패도 포함될 수 있으며 호출자는 이를 로그로만 남깁니다.
    pub async fn shutdown(mut self) -> Vec<ProcessError> {
        let mut errors = Vec::new();

        // stdout을 먼저 닫아 프로세스의 쓰기가 막히지 않게 합니다.
        drop(self.stdout.take());

        if let Err(e) = self.child.start_kill() {
            errors.push(ProcessError::Kill(e.to_string()));
        }

        if let Err(e) = self.child.wait().await {
            errors.push(ProcessError::Wait(e.to_string()));
        }

        errors
    }
}

/// 여러 프로세스 에러를 한 줄 메시지로 합칩니다.
pub fn join_errors(errors: &[ProcessError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_lines_until_eof() {
        let mut process = LogProcess::spawn("printf a\\nb\\r\\nc", None, None).unwrap();
        assert_eq!(process.next_line().await.unwrap().as_deref(), Some("a"));
        assert_eq!(process.next_line().await.unwrap().as_deref(), Some("b"));
        assert_eq!(process.next_line().await.unwrap().as_deref(), Some("c"));
        assert_eq!(process.next_line().await.unwrap(), None);
        assert!(process.wait().await.unwrap().success());
    }

    #[tokio::test]
    async fn over_long_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("producer.sh");
        std::fs::write(
            &script,
            format!(
                "head -c {} /dev/zero | tr '\\0' a\necho\necho ok\n",
                MAX_LINE_BYTES + 10
            ),
        )
        .unwrap();

        let mut process = LogProcess::spawn(&format!("sh {}", script.display()), None, None).unwrap();
        assert_eq!(process.next_line().await.unwrap().as_deref(), Some("ok"));
        assert_eq!(process.next_line().await.unwrap(), None);
        let _ = process.wait().await;
    }

    #[tokio::test]
    async fn line_at_limit_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("producer.sh");
        std::fs::write(
            &script,
            format!("head -c {MAX_LINE_BYTES} /dev/zero | tr '\\0' a\necho\n"),
        )
        .unwrap();

        let mut process = LogProcess::spawn(&format!("sh {}", script.display()), None, None).unwrap();
        let line = process.next_line().await.unwrap().unwrap();
        assert_eq!(line.len(), MAX_LINE_BYTES);
        let _ = process.wait().await;
    }

    #[tokio::test]
    async fn extra_arg_and_marker_are_passed() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("producer.sh");
        std::fs::write(&script, "echo \"$IN_LOG_READER $1\"\n").unwrap();

        let mut process = LogProcess::spawn(
            &format!("sh {}", script.display()),
            Some(dir.path()),
            Some("--since=2024-06-18T00:00:00Z".to_owned()),
        )
        .unwrap();
        let line = process.next_line().await.unwrap();
        assert_eq!(line.as_deref(), Some("1 --since=2024-06-18T00:00:00Z"));
        let _ = process.wait().await;
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let err = LogProcess::spawn("   ", None, None).unwrap_err();
        assert!(matches!(err, ProcessError::EmptyCommand));
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let err = LogProcess::spawn("/nonexistent/proxylog-producer", None, None).unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
        assert!(err.to_string().contains("/nonexistent/proxylog-producer"));
    }

    #[tokio::test]
    async fn shutdown_kills_running_process() {
        let process = LogProcess::spawn("sleep 30", None, None).unwrap();
        let errors = process.shutdown().await;
        assert!(errors.is_empty(), "{}", join_errors(&errors));
    }

    #[test]
    fn join_errors_combines_messages() {
        let msg = join_errors(&[
            ProcessError::Kill("no such process".to_owned()),
            ProcessError::Wait("interrupted".to_owned()),
        ]);
        assert!(msg.contains("no such process"));
        assert!(msg.contains("; "));
    }
}
