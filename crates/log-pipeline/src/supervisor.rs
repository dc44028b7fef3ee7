//! 로그 스트림 수퍼바이저 -- 외부 로그 프로세스의 생명주기 관리
//!
//! [`LogStreamSupervisor`]는 한 번에 하나의 [`LogProcess`]를 소유하고,
//! stdout 라인을 [`LineClassifier`]로 분류하여 출력 채널로 보냅니다.
//!
//! # 상태 전이
//! ```text
//! Stopped -> Launching -> Streaming -> (EOF/crash) EvaluatingRestart
//!                ^                                   |
//!                +------------- backoff -------------+--> Stopped (exhausted | requested)
//! ```
//!
//! - 분류에 실패한 라인은 경고 후 버려지며 재시작 횟수에 영향을 주지 않습니다.
//! - 프로세스 종료는 에러가 아니라 재시작 정책의 입력입니다.
//! - 재시작 한도를 소진하면 출력 채널이 정확히 한 번 닫힙니다.
//!
//! # 사용 예시
//! ```ignore
//! let mut supervisor = LogStreamSupervisor::new(config, classifier);
//! let mut rx = supervisor.start(Some(watermark))?;
//! while let Some(event) = rx.recv().await {
//!     sink.append(&event)?;
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Local, SecondsFormat, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use proxylog_core::error::{PipelineError, ProcessError, ProxylogError};
use proxylog_core::event::ClassifiedEvent;
use proxylog_core::metrics as m;

use crate::config::SupervisorConfig;
use crate::parser::LineClassifier;
use crate::process::{LogProcess, join_errors};

/// 수퍼바이저 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// 실행 중이 아님 (초기 상태, 정지 요청, 재시작 소진)
    Stopped,
    /// 프로세스 실행 중
    Launching,
    /// stdout 스트리밍 중
    Streaming,
    /// 프로세스 종료 후 재시작 여부 판단 중
    EvaluatingRestart,
}

impl SupervisorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Launching => "launching",
            Self::Streaming => "streaming",
            Self::EvaluatingRestart => "evaluating_restart",
        }
    }
}

/// 마지막으로 처리한 엔벨로프 시각 (공유 워터마크)
#[derive(Debug, Clone, Default)]
pub struct Watermark(Arc<std::sync::Mutex<Option<DateTime<Local>>>>);

impl Watermark {
    pub fn get(&self) -> Option<DateTime<Local>> {
        match self.0.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn advance(&self, time: DateTime<Local>) {
        let mut guard = match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(time);
    }
}

/// 로그 스트림 수퍼바이저
pub struct LogStreamSupervisor {
    config: SupervisorConfig,
    classifier: Arc<LineClassifier>,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    watermark: Watermark,
    state_tx: Arc<watch::Sender<SupervisorState>>,
    state_rx: watch::Receiver<SupervisorState>,
    task: Option<JoinHandle<()>>,
}

impl LogStreamSupervisor {
    pub fn new(config: SupervisorConfig, classifier: LineClassifier) -> Self {
        let (state_tx, state_rx) = watch::channel(SupervisorState::Stopped);
        Self {
            config,
            classifier: Arc::new(classifier),
            running: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            watermark: Watermark::default(),
            state_tx: Arc::new(state_tx),
            state_rx,
            task: None,
        }
    }

    /// 첫 프로세스를 실행하고 이벤트 수신 채널을 반환합니다.
    ///
    /// `resume_from`이 있으면 재개 인자(`{resume_arg}{RFC 3339}`)가 명령 뒤에 붙습니다.
    /// 첫 실행 실패는 에러로 반환되며 재시작 정책의 대상이 아닙니다.
    pub fn start(
        &mut self,
        resume_from: Option<DateTime<Local>>,
    ) -> Result<mpsc::Receiver<ClassifiedEvent>, ProxylogError> {
        if self.task.is_some() {
            return Err(PipelineError::AlreadyRunning.into());
        }

        self.state_tx.send_replace(SupervisorState::Launching);
        let process = match self.launch(resume_from) {
            Ok(p) => p,
            Err(e) => {
                self.state_tx.send_replace(SupervisorState::Stopped);
                return Err(e.into());
            }
        };

        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        self.cancel = CancellationToken::new();
        self.running.store(true, Ordering::SeqCst);
        metrics::gauge!(m::DAEMON_JOURNAL_ALIVE).set(1.0);

        let worker = ReadLoop {
            config: self.config.clone(),
            classifier: Arc::clone(&self.classifier),
            running: Arc::clone(&self.running),
            cancel: self.cancel.clone(),
            watermark: self.watermark.clone(),
            state_tx: Arc::clone(&self.state_tx),
            initial_resume: resume_from,
        };
        self.task = Some(tokio::spawn(worker.run(process, tx)));

        info!(
            command = self.config.command.as_str(),
            resume_from = ?resume_from,
            "log stream supervisor started"
        );
        Ok(rx)
    }

    /// 정지를 요청하고 읽기 루프가 끝날 때까지 기다립니다.
    ///
    /// 읽기 루프는 파이프를 닫고 프로세스를 kill/wait 한 뒤 종료합니다.
    /// 그 과정의 에러는 모아서 로그로만 남깁니다.
    pub async fn stop(&mut self) -> Result<(), ProxylogError> {
        let Some(task) = self.task.take() else {
            return Err(PipelineError::NotRunning.into());
        };

        info!("stopping log stream supervisor");
        self.running.store(false, Ordering::SeqCst);
        self.cancel.cancel();

        if let Err(e) = task.await {
            warn!(error = %e, "log stream read loop panicked");
        }
        Ok(())
    }

    /// 정지 플래그 기준의 생존 여부 (실제 OS 프로세스 상태가 아님)
    pub fn is_alive(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SupervisorState {
        *self.state_rx.borrow()
    }

    /// 상태 변경 구독
    pub fn subscribe_state(&self) -> watch::Receiver<SupervisorState> {
        self.state_rx.clone()
    }

    /// 마지막으로 처리한 엔벨로프 이벤트 시각
    pub fn watermark(&self) -> Option<DateTime<Local>> {
        self.watermark.get()
    }

    fn launch(&self, resume_from: Option<DateTime<Local>>) -> Result<LogProcess, ProcessError> {
        LogProcess::spawn(
            &self.config.command,
            self.config.work_dir.as_deref(),
            resume_argument(&self.config.resume_arg, resume_from),
        )
    }
}

impl Drop for LogStreamSupervisor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// 재개 인자를 만듭니다. 접두어가 비었거나 시각이 없으면 `None`.
pub fn resume_argument(prefix: &str, resume_from: Option<DateTime<Local>>) -> Option<String> {
    if prefix.is_empty() {
        return None;
    }
    resume_from.map(|t| {
        format!(
            "{prefix}{}",
            t.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    })
}

/// 읽기 루프가 멈춘 이유
enum Exit {
    /// 정지 요청
    Requested,
    /// stdout EOF
    Eof,
    /// stdout 읽기 에러 (프로세스는 살아 있을 수 있음)
    ReadFailed,
    /// 수신측이 채널을 닫음
    ReceiverClosed,
}

/// 스폰된 읽기 루프가 소유하는 상태
struct ReadLoop {
    config: SupervisorConfig,
    classifier: Arc<LineClassifier>,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    watermark: Watermark,
    state_tx: Arc<watch::Sender<SupervisorState>>,
    initial_resume: Option<DateTime<Local>>,
}

impl ReadLoop {
    async fn run(self, mut process: LogProcess, tx: mpsc::Sender<ClassifiedEvent>) {
        let mut attempts: u32 = 0;

        loop {
            self.state_tx.send_replace(SupervisorState::Streaming);

            let exit = self.stream(&mut process, &tx, &mut attempts).await;
            if matches!(exit, Exit::Requested | Exit::ReceiverClosed) {
                log_shutdown_errors(process.shutdown().await);
                break;
            }

            self.state_tx.send_replace(SupervisorState::EvaluatingRestart);
            if matches!(exit, Exit::ReadFailed) {
                log_shutdown_errors(process.shutdown().await);
            } else {
                // stdout을 닫고도 계속 실행되는 프로세스가 있으므로 정지 요청과 경합
                let waited = tokio::select! {
                    _ = self.cancel.cancelled() => None,
                    status = process.wait() => Some(status),
                };
                match waited {
                    Some(Ok(status)) => {
                        info!(command = process.command(), %status, "log process exited")
                    }
                    Some(Err(e)) => warn!(error = %e, "failed to wait for log process"),
                    None => {
                        log_shutdown_errors(process.shutdown().await);
                        break;
                    }
                }
            }

            if !self.is_running() {
                break;
            }

            attempts += 1;
            if attempts >= self.config.restart_limit {
                error!(
                    attempts,
                    limit = self.config.restart_limit,
                    "log process restart limit reached, closing stream"
                );
                break;
            }

            info!(
                attempt = attempts,
                backoff_ms = self.config.restart_backoff.as_millis() as u64,
                "waiting before relaunching log process"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.restart_backoff) => {}
            }
            if !self.is_running() {
                break;
            }

            self.state_tx.send_replace(SupervisorState::Launching);
            let resume = self.watermark.get().or(self.initial_resume);
            match LogProcess::spawn(
                &self.config.command,
                self.config.work_dir.as_deref(),
                resume_argument(&self.config.resume_arg, resume),
            ) {
                Ok(next) => {
                    metrics::counter!(m::JOURNAL_PROCESS_RESTARTS_TOTAL).increment(1);
                    info!(attempt = attempts, resume_from = ?resume, "log process relaunched");
                    process = next;
                }
                Err(e) => {
                    error!(error = %e, "failed to relaunch log process, closing stream");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        metrics::gauge!(m::DAEMON_JOURNAL_ALIVE).set(0.0);
        self.state_tx.send_replace(SupervisorState::Stopped);
        // tx는 여기서 드롭되어 채널이 닫힙니다.
        drop(tx);
        info!("log stream supervisor finished");
    }

    async fn stream(
        &self,
        process: &mut LogProcess,
        tx: &mpsc::Sender<ClassifiedEvent>,
        attempts: &mut u32,
    ) -> Exit {
        loop {
            if !self.is_running() {
                return Exit::Requested;
            }

            let line = tokio::select! {
                _ = self.cancel.cancelled() => return Exit::Requested,
                line = process.next_line() => line,
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => return Exit::Eof,
                Err(e) => {
                    warn!(error = %e, "failed to read log process output");
                    return Exit::ReadFailed;
                }
            };
            metrics::counter!(m::JOURNAL_LINES_READ_TOTAL).increment(1);

            let event = match self.classifier.classify(&line) {
                Ok(event) => event,
                Err(e) => {
                    metrics::counter!(m::JOURNAL_CLASSIFY_ERRORS_TOTAL).increment(1);
                    warn!(error = %e, "dropping unparseable log line");
                    continue;
                }
            };

            *attempts = 0;
            if event.envelope_timed {
                self.watermark.advance(event.event_time);
            }
            metrics::counter!(m::JOURNAL_EVENTS_CLASSIFIED_TOTAL, m::LABEL_KIND => event.kind.tag())
                .increment(1);

            tokio::select! {
                _ = self.cancel.cancelled() => return Exit::Requested,
                sent = tx.send(event) => {
                    if sent.is_err() {
                        debug!("event receiver dropped");
                        return Exit::ReceiverClosed;
                    }
                }
            }
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }
}

fn log_shutdown_errors(errors: Vec<ProcessError>) {
    if !errors.is_empty() {
        warn!(errors = %join_errors(&errors), "log process shutdown reported errors");
    }
}
