//! 통합 테스트 -- 분류기와 수퍼바이저 전체 흐름 검증
//!
//! 가짜 로그 프로듀서로 `sh` 스크립트를 임시 디렉토리에 만들어 사용합니다.

use std::path::{Path, PathBuf};
use std::time::Duration;

use proptest::prelude::*;
use tokio::sync::mpsc;

use proxylog_core::event::{ClassifiedEvent, EventKind, ProxyRequest};
use proxylog_log_pipeline::supervisor::resume_argument;
use proxylog_log_pipeline::{
    LineClassifier, LogStreamSupervisor, SupervisorConfigBuilder, SupervisorState,
};

const REQUEST_LINE: &str = "Jun 18 00:07:26 my-host dumbproxy[1234]: PROXY   : 2024/06/18 00:07:26 handler.go:138: INFO     Request: 143.178.228.182:64154 => 2.56.204.64:443 \"andre487\" HTTP/1.1 GET http://ifconfig.co/";

const RUNTIME_LINE: &str = "Jun 18 00:07:26 my-host dumbproxy[1234]: MAIN    : 2024/06/18 00:07:26 main.go:1: INFO     Proxy server started";

const MALFORMED_LINE: &str = "Jun 18 00:07:26 my-host dumbproxy[99999999999]: MAIN : broken pid";

/// 스크립트를 쓰고 이를 실행하는 명령 문자열을 반환합니다.
fn write_script(dir: &Path, body: &str) -> String {
    let path = dir.join("producer.sh");
    std::fs::write(&path, format!("#!/bin/sh\nDIR=$(dirname \"$0\")\n{body}\n"))
        .expect("write script");
    format!("sh {}", path.display())
}

fn supervisor(command: String, restart_limit: u32, backoff: Duration) -> LogStreamSupervisor {
    let config = SupervisorConfigBuilder::new()
        .command(command)
        .restart_limit(restart_limit)
        .restart_backoff(backoff)
        .channel_capacity(16)
        .build()
        .expect("valid config");
    LogStreamSupervisor::new(config, LineClassifier::new("dumbproxy").expect("classifier"))
}

async fn drain(mut rx: mpsc::Receiver<ClassifiedEvent>) -> Vec<ClassifiedEvent> {
    tokio::time::timeout(Duration::from_secs(10), async move {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    })
    .await
    .expect("channel should close")
}

fn read_lines(path: PathBuf) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_owned)
        .collect()
}

#[test]
fn example_request_line_classifies_to_proxy_request() {
    let classifier = LineClassifier::new("dumbproxy").unwrap();
    let event = classifier.classify(REQUEST_LINE).unwrap();
    assert_eq!(
        event.kind,
        EventKind::ProxyRequest(ProxyRequest {
            src_ip: "143.178.228.182".parse().unwrap(),
            dest_ip: "2.56.204.64".parse().unwrap(),
            dest_port: 443,
            user: "andre487".to_owned(),
            proto: "HTTP/1.1".to_owned(),
            method: "GET".to_owned(),
            url: "http://ifconfig.co/".to_owned(),
        })
    );
}

#[tokio::test]
async fn streams_events_in_order_and_drops_malformed_lines() {
    let dir = tempfile::tempdir().unwrap();
    let command = write_script(
        dir.path(),
        &format!(
            "echo '{REQUEST_LINE}'\necho '{MALFORMED_LINE}'\necho 'garbage line'\necho '{RUNTIME_LINE}'\nexec sleep 30"
        ),
    );

    let mut sup = supervisor(command, 3, Duration::from_millis(10));
    let mut rx = sup.start(None).unwrap();

    let mut events = Vec::new();
    for _ in 0..3 {
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("event in time")
            .expect("channel open");
        events.push(event);
    }

    assert!(matches!(events[0].kind, EventKind::ProxyRequest(_)));
    assert_eq!(events[1].kind, EventKind::Unmatched);
    assert_eq!(events[1].raw_line, "garbage line");
    assert!(matches!(
        events[2].kind,
        EventKind::RuntimeLog {
            is_error: false,
            ..
        }
    ));
    assert!(sup.is_alive());
    assert_eq!(sup.watermark(), Some(events[2].event_time));

    sup.stop().await.unwrap();
    assert!(!sup.is_alive());
    assert!(drain(rx).await.is_empty());
}

#[tokio::test]
async fn restart_limit_closes_channel_once() {
    let dir = tempfile::tempdir().unwrap();
    let command = write_script(
        dir.path(),
        &format!("echo launch >> \"$DIR/launches\"\necho '{MALFORMED_LINE}'"),
    );

    let mut sup = supervisor(command, 3, Duration::from_millis(10));
    let rx = sup.start(None).unwrap();

    let events = drain(rx).await;
    assert!(events.is_empty());
    assert_eq!(read_lines(dir.path().join("launches")).len(), 3);
    assert!(!sup.is_alive());
    assert_eq!(sup.state(), SupervisorState::Stopped);

    // 이미 끝난 스트림에 대한 stop도 정상 종료
    sup.stop().await.unwrap();
}

#[tokio::test]
async fn relaunch_resumes_from_watermark() {
    let dir = tempfile::tempdir().unwrap();
    let command = write_script(
        dir.path(),
        &format!(
            "if [ ! -f \"$DIR/args\" ]; then first=1; fi\necho \"arg:$1\" >> \"$DIR/args\"\nif [ -n \"$first\" ]; then echo '{RUNTIME_LINE}'; fi"
        ),
    );

    let mut sup = supervisor(command, 3, Duration::from_millis(10));
    let rx = sup.start(None).unwrap();
    let events = drain(rx).await;

    assert_eq!(events.len(), 1);
    let expected = resume_argument("--since=", Some(events[0].event_time)).unwrap();
    let args = read_lines(dir.path().join("args"));
    // 첫 실행 1회 + 재실행 2회 (성공 라인 이후 카운터 리셋)
    assert_eq!(args.len(), 3);
    assert_eq!(args[0], "arg:");
    assert_eq!(args[1], format!("arg:{expected}"));
    assert_eq!(args[2], format!("arg:{expected}"));
}

#[tokio::test]
async fn initial_resume_time_is_passed_to_first_launch() {
    let dir = tempfile::tempdir().unwrap();
    let command = write_script(
        dir.path(),
        "echo \"arg:$1\" >> \"$DIR/args\"\necho \"marker:$IN_LOG_READER\" >> \"$DIR/args\"",
    );

    let resume = chrono::Local::now() - chrono::Duration::days(1);
    let mut sup = supervisor(command, 1, Duration::from_millis(10));
    let rx = sup.start(Some(resume)).unwrap();
    drain(rx).await;

    let args = read_lines(dir.path().join("args"));
    let expected = resume_argument("--since=", Some(resume)).unwrap();
    assert_eq!(args, vec![format!("arg:{expected}"), "marker:1".to_owned()]);
}

#[tokio::test]
async fn stop_during_backoff_returns_promptly() {
    let dir = tempfile::tempdir().unwrap();
    let command = write_script(dir.path(), "exit 1");

    let mut sup = supervisor(command, 5, Duration::from_secs(30));
    let rx = sup.start(None).unwrap();

    let mut state = sup.subscribe_state();
    tokio::time::timeout(
        Duration::from_secs(10),
        state.wait_for(|s| *s == SupervisorState::EvaluatingRestart),
    )
    .await
    .expect("state change in time")
    .expect("sender alive");

    tokio::time::timeout(Duration::from_secs(5), sup.stop())
        .await
        .expect("stop should not wait for backoff")
        .unwrap();
    assert!(drain(rx).await.is_empty());
}

#[tokio::test]
async fn stop_kills_process_that_closed_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let command = write_script(dir.path(), "exec >&-\nexec sleep 30");

    let mut sup = supervisor(command, 3, Duration::from_millis(10));
    let rx = sup.start(None).unwrap();

    // EOF 이후 프로세스 종료를 기다리는 단계
    let mut state = sup.subscribe_state();
    tokio::time::timeout(
        Duration::from_secs(10),
        state.wait_for(|s| *s == SupervisorState::EvaluatingRestart),
    )
    .await
    .expect("state change in time")
    .expect("sender alive");

    tokio::time::timeout(Duration::from_secs(5), sup.stop())
        .await
        .expect("stop should not wait for the process to exit")
        .unwrap();
    assert!(!sup.is_alive());
    assert!(drain(rx).await.is_empty());
}

#[tokio::test]
async fn classifier_unit_name_selects_service_lines() {
    let dir = tempfile::tempdir().unwrap();
    let other_line = RUNTIME_LINE.replace("dumbproxy[", "otherproxy[");
    let command = write_script(
        dir.path(),
        &format!("echo '{other_line}'\necho '{RUNTIME_LINE}'"),
    );

    let config = SupervisorConfigBuilder::new()
        .command(command)
        .restart_limit(1)
        .build()
        .expect("valid config");
    let mut sup =
        LogStreamSupervisor::new(config, LineClassifier::new("otherproxy").expect("classifier"));
    let events = drain(sup.start(None).unwrap()).await;

    assert_eq!(events.len(), 2);
    assert!(matches!(events[0].kind, EventKind::RuntimeLog { .. }));
    assert_eq!(
        events[1].kind,
        EventKind::OtherUnit {
            unit: "dumbproxy".to_owned()
        }
    );
}

proptest! {
    #[test]
    fn lines_without_envelope_are_unmatched(line in "[^\\[]{0,200}") {
        let classifier = LineClassifier::new("dumbproxy").unwrap();
        let event = classifier.classify(&line).unwrap();
        prop_assert_eq!(event.kind, EventKind::Unmatched);
        prop_assert_eq!(event.raw_line, line);
    }

    #[test]
    fn classifier_never_panics(line in ".{0,300}") {
        let classifier = LineClassifier::new("dumbproxy").unwrap();
        let _ = classifier.classify(&line);
    }
}
