//! 라인 분류 모듈 -- 원시 로그 라인을 [`ClassifiedEvent`]로 변환하는 3단계 캐스케이드
//!
//! 각 단계는 독립적인 문법이며 [`Stage`]를 반환합니다.
//!
//! ```text
//! raw line -> EnvelopeGrammar -> RecordGrammar -> dispatch (PROXY/HTTPSRV/MAIN/AUTH)
//!               |                  |                 |
//!            Unmatched         ProxyUnknown      ProxyUnknown
//!            OtherUnit
//! ```
//!
//! 문법 불일치는 폴스루되어 에러가 되지 않습니다.
//! 문법은 일치했지만 필드가 잘못된 경우에만 [`ClassifyError`]가 반환됩니다.
//!
//! # 사용 예시
//! ```
//! use proxylog_log_pipeline::parser::LineClassifier;
//! use proxylog_core::event::EventKind;
//!
//! let classifier = LineClassifier::new("dumbproxy")?;
//! let event = classifier.classify("not a journal line")?;
//! assert_eq!(event.kind, EventKind::Unmatched);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod dispatch;
pub mod envelope;
pub mod record;

pub use dispatch::RequestGrammar;
pub use envelope::{Envelope, EnvelopeGrammar};
pub use record::{RecordGrammar, ServiceRecord};

use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use chrono::{DateTime, Local, NaiveDate, TimeZone};
use proxylog_core::event::{ClassifiedEvent, EventKind};

use crate::error::{ClassifyError, ErrorKind, FieldError, FieldErrors, LogPipelineError};

/// 한 문법 단계의 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage<T> {
    /// 문법 불일치 -- 다음 폴백으로 진행
    NotMatched,
    /// 문법 일치, 모든 필드 정상
    Matched(T),
    /// 문법 일치, 하나 이상의 필드가 잘못됨
    Malformed(FieldErrors),
}

impl<T> Stage<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Stage<U> {
        match self {
            Stage::NotMatched => Stage::NotMatched,
            Stage::Matched(v) => Stage::Matched(f(v)),
            Stage::Malformed(e) => Stage::Malformed(e),
        }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, Stage::Matched(_))
    }

    /// 실패 종류 (일치한 경우 `None`)
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Stage::NotMatched => Some(ErrorKind::NoMatch),
            Stage::Matched(_) => None,
            Stage::Malformed(_) => Some(ErrorKind::FieldParse),
        }
    }
}

/// 캡처된 필드를 타입 변환하면서 실패를 모두 수집합니다.
///
/// 실패한 필드는 기본값으로 채워지고, [`FieldReader::finish`]에서
/// 에러가 하나라도 있으면 `Stage::Malformed`가 됩니다.
#[derive(Debug, Default)]
pub(crate) struct FieldReader {
    errors: FieldErrors,
}

impl FieldReader {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn number<N>(&mut self, field: &'static str, value: &str) -> N
    where
        N: FromStr + Default,
        N::Err: std::fmt::Display,
    {
        match value.parse::<N>() {
            Ok(n) => n,
            Err(e) => {
                self.errors.push(FieldError::new(field, value, e.to_string()));
                N::default()
            }
        }
    }

    /// IP 리터럴을 파싱합니다. IPv6 대괄호 표기(`[::1]`)도 허용합니다.
    pub(crate) fn ip(&mut self, field: &'static str, value: &str) -> IpAddr {
        let bare = value
            .strip_prefix('[')
            .and_then(|v| v.strip_suffix(']'))
            .unwrap_or(value);
        match bare.parse::<IpAddr>() {
            Ok(ip) => ip,
            Err(_) => {
                self.errors
                    .push(FieldError::new(field, value, "invalid IP address"));
                IpAddr::V4(Ipv4Addr::UNSPECIFIED)
            }
        }
    }

    pub(crate) fn push(&mut self, error: FieldError) {
        self.errors.push(error);
    }

    pub(crate) fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub(crate) fn finish<T>(self, value: impl FnOnce() -> T) -> Stage<T> {
        if self.errors.is_empty() {
            Stage::Matched(value())
        } else {
            Stage::Malformed(self.errors)
        }
    }
}

/// 로컬 시각을 구성합니다. 존재하지 않는 날짜/시각이면 `None`.
///
/// DST 전환으로 로컬 시각이 모호하면 이른 쪽, 존재하지 않으면 UTC 해석을 사용합니다.
pub(crate) fn local_time(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
) -> Option<DateTime<Local>> {
    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;
    Some(
        naive
            .and_local_timezone(Local)
            .earliest()
            .unwrap_or_else(|| Local.from_utc_datetime(&naive)),
    )
}

/// 라인 분류기
///
/// 정규식은 생성 시 한 번 컴파일됩니다. 분류 자체는 상태가 없으며
/// 연도 추론을 위한 현재 시각만 외부에서 주입됩니다.
#[derive(Debug, Clone)]
pub struct LineClassifier {
    unit_name: String,
    envelope: EnvelopeGrammar,
    record: RecordGrammar,
    request: RequestGrammar,
}

impl LineClassifier {
    /// 감시 대상 서비스 유닛 이름으로 분류기를 생성합니다.
    pub fn new(unit_name: impl Into<String>) -> Result<Self, LogPipelineError> {
        Ok(Self {
            unit_name: unit_name.into(),
            envelope: EnvelopeGrammar::new()?,
            record: RecordGrammar::new()?,
            request: RequestGrammar::new()?,
        })
    }

    pub fn unit_name(&self) -> &str {
        &self.unit_name
    }

    /// 현재 로컬 시각 기준으로 라인을 분류합니다.
    pub fn classify(&self, line: &str) -> Result<ClassifiedEvent, ClassifyError> {
        self.classify_at(line, Local::now())
    }

    /// 주어진 시각을 "현재"로 간주하고 라인을 분류합니다.
    ///
    /// `now`는 엔벨로프의 연도 추론과 Unmatched 이벤트의 시각에만 쓰입니다.
    pub fn classify_at(
        &self,
        line: &str,
        now: DateTime<Local>,
    ) -> Result<ClassifiedEvent, ClassifyError> {
        let envelope = match self.envelope.extract(line, now) {
            Stage::Matched(envelope) => envelope,
            Stage::NotMatched => {
                tracing::trace!(line, "envelope not matched");
                return Ok(ClassifiedEvent::unmatched(line, now));
            }
            Stage::Malformed(errors) => return Err(ClassifyError::new(line, errors)),
        };

        let mut event = ClassifiedEvent {
            raw_line: line.to_owned(),
            event_time: envelope.time,
            envelope_timed: true,
            host: envelope.host,
            pid: envelope.pid,
            source_file: String::new(),
            source_line: 0,
            kind: EventKind::ProxyUnknown,
        };

        if envelope.unit != self.unit_name {
            event.kind = EventKind::OtherUnit {
                unit: envelope.unit,
            };
            return Ok(event);
        }

        let record = match self.record.extract(&envelope.payload) {
            Stage::Matched(record) => record,
            Stage::NotMatched => {
                tracing::trace!(line, "service record not matched");
                return Ok(event);
            }
            Stage::Malformed(errors) => return Err(ClassifyError::new(line, errors)),
        };

        event.event_time = record.time;
        event.source_file = record.source_file.clone();
        event.source_line = record.source_line;

        match dispatch::dispatch(&self.request, &record) {
            Stage::Matched(kind) => event.kind = kind,
            Stage::NotMatched => {
                tracing::trace!(line, logger = record.logger.as_str(), "payload not matched");
            }
            Stage::Malformed(errors) => return Err(ClassifyError::new(line, errors)),
        }

        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{Datelike, Timelike};
    use proxylog_core::event::{ProxyHttpInfo, ProxyRequest};

    const REQUEST_LINE: &str = "Jun 18 00:07:26 my-host dumbproxy[1234]: PROXY   : 2024/06/18 00:07:26 handler.go:138: INFO     Request: 143.178.228.182:64154 => 2.56.204.64:443 \"andre487\" HTTP/1.1 GET http://ifconfig.co/";

    fn classifier() -> LineClassifier {
        LineClassifier::new("dumbproxy").unwrap()
    }

    fn now() -> DateTime<Local> {
        local_time(2024, 6, 20, 12, 0, 0).unwrap()
    }

    fn wrap(payload: &str) -> String {
        format!("Jun 18 00:07:26 my-host dumbproxy[1234]: {payload}")
    }

    #[test]
    fn empty_line_is_unmatched() {
        let event = classifier().classify_at("", now()).unwrap();
        assert_eq!(event.kind, EventKind::Unmatched);
        assert_eq!(event.event_time, now());
    }

    #[test]
    fn request_line_end_to_end() {
        let event = classifier().classify_at(REQUEST_LINE, now()).unwrap();
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
        assert_eq!(event.host, "my-host");
        assert_eq!(event.pid, 1234);
        assert_eq!(event.source_file, "handler.go");
        assert_eq!(event.source_line, 138);
        assert!(event.envelope_timed);
        assert_eq!(event.event_time.year(), 2024);
        assert_eq!(event.event_time.minute(), 7);
    }

    #[test]
    fn other_unit_is_reported_with_unit_name() {
        let line = "Jun 18 00:07:26 my-host sshd[99]: Accepted publickey for root";
        let event = classifier().classify_at(line, now()).unwrap();
        assert_eq!(
            event.kind,
            EventKind::OtherUnit {
                unit: "sshd".to_owned()
            }
        );
        assert_eq!(event.pid, 99);
    }

    #[test]
    fn unparseable_service_payload_is_proxy_unknown() {
        let line = wrap("Starting proxy server...");
        let event = classifier().classify_at(&line, now()).unwrap();
        assert_eq!(event.kind, EventKind::ProxyUnknown);
        assert!(event.envelope_timed);
    }

    #[test]
    fn http_info_line() {
        let line = wrap(
            "PROXY   : 2024/06/18 00:07:27 handler.go:200: INFO     10.0.0.5:5555 GET http://example.com/ 200 OK",
        );
        let event = classifier().classify_at(&line, now()).unwrap();
        assert_eq!(
            event.kind,
            EventKind::ProxyRequestHttpInfo(ProxyHttpInfo {
                src_ip: "10.0.0.5".parse().unwrap(),
                method: "GET".to_owned(),
                url: "http://example.com/".to_owned(),
                status: 200,
            })
        );
    }

    #[test]
    fn http_info_bad_status_defaults_to_zero() {
        let line = wrap(
            "PROXY   : 2024/06/18 00:07:27 handler.go:200: INFO     10.0.0.5:5555 GET http://example.com/ ??? OK",
        );
        let event = classifier().classify_at(&line, now()).unwrap();
        match event.kind {
            EventKind::ProxyRequestHttpInfo(info) => assert_eq!(info.status, 0),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn proxy_info_with_wrong_token_count_is_unknown() {
        let line = wrap("PROXY   : 2024/06/18 00:07:27 handler.go:200: INFO     something else");
        let event = classifier().classify_at(&line, now()).unwrap();
        assert_eq!(event.kind, EventKind::ProxyUnknown);
    }

    #[test]
    fn proxy_error_level_is_request_error() {
        let line = wrap(
            "PROXY   : 2024/06/18 00:07:27 handler.go:51: ERROR    HTTP fetch error: dial tcp: i/o timeout",
        );
        let event = classifier().classify_at(&line, now()).unwrap();
        assert_eq!(
            event.kind,
            EventKind::ProxyRequestError {
                message: "HTTP fetch error: dial tcp: i/o timeout".to_owned()
            }
        );
        assert!(event.is_error());
    }

    #[test]
    fn runtime_and_auth_error_levels() {
        let c = classifier();

        let info = wrap("MAIN    : 2024/06/18 00:00:01 main.go:400: INFO     Proxy server started.");
        let event = c.classify_at(&info, now()).unwrap();
        assert!(matches!(event.kind, EventKind::RuntimeLog { is_error: false, .. }));

        let critical = wrap("MAIN    : 2024/06/18 00:00:01 main.go:401: CRITICAL Server terminated");
        let event = c.classify_at(&critical, now()).unwrap();
        assert!(matches!(event.kind, EventKind::RuntimeLog { is_error: true, .. }));

        let auth = wrap("AUTH    : 2024/06/18 00:00:01 auth.go:12: ERROR    failed to reload password file");
        let event = c.classify_at(&auth, now()).unwrap();
        assert!(matches!(
            event.kind,
            EventKind::AuthModuleLog { is_error: true, .. }
        ));
    }

    #[test]
    fn http_server_is_always_error() {
        let line = wrap("HTTPSRV : 2024/06/18 00:00:01 server.go:3212: http: TLS handshake error");
        let event = classifier().classify_at(&line, now()).unwrap();
        assert_eq!(
            event.kind,
            EventKind::HttpServerError {
                message: "http: TLS handshake error".to_owned()
            }
        );
    }

    #[test]
    fn unknown_logger_is_proxy_unknown() {
        let line = wrap("ACCESS  : 2024/06/18 00:00:01 access.go:1: INFO     whatever");
        let event = classifier().classify_at(&line, now()).unwrap();
        assert_eq!(event.kind, EventKind::ProxyUnknown);
        assert_eq!(event.source_file, "access.go");
    }

    #[test]
    fn malformed_ips_are_aggregated() {
        let line = REQUEST_LINE
            .replace("143.178.228.182", "328.1.1.1")
            .replace("2.56.204.64", "999.0.0.1");
        let err = classifier().classify_at(&line, now()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FieldParse);
        assert_eq!(err.errors.len(), 2);
        assert!(err.errors.contains_field("src_ip"));
        assert!(err.errors.contains_field("dest_ip"));
        assert_eq!(err.line, line);
    }

    #[test]
    fn request_prefix_without_grammar_match_is_unknown() {
        let line = wrap("PROXY   : 2024/06/18 00:07:26 handler.go:138: INFO     Request: garbage");
        let event = classifier().classify_at(&line, now()).unwrap();
        assert_eq!(event.kind, EventKind::ProxyUnknown);
    }

    #[test]
    fn overflowing_pid_is_field_error() {
        let line = "Jun 18 00:07:26 my-host dumbproxy[99999999999]: hello";
        let err = classifier().classify_at(line, now()).unwrap_err();
        assert!(err.errors.contains_field("pid"));
    }

    #[test]
    fn stage_error_kinds() {
        assert_eq!(Stage::<()>::NotMatched.error_kind(), Some(ErrorKind::NoMatch));
        assert_eq!(Stage::Matched(1).error_kind(), None);
        assert_eq!(
            Stage::<()>::Malformed(FieldErrors::new()).error_kind(),
            Some(ErrorKind::FieldParse)
        );
        assert_eq!(Stage::Matched(2).map(|v| v * 2), Stage::Matched(4));
    }

    #[test]
    fn field_reader_collects_every_failure() {
        let mut reader = FieldReader::new();
        let _: u16 = reader.number("dest_port", "70000");
        let _ = reader.ip("src_ip", "nope");
        let ip = reader.ip("dest_ip", "[::1]");
        assert_eq!(ip, "::1".parse::<IpAddr>().unwrap());
        match reader.finish(|| ()) {
            Stage::Malformed(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected stage: {other:?}"),
        }
    }
}
