//! 분류 이벤트 — 로그 라인 분류 결과의 닫힌 태그 유니온
//!
//! [`ClassifiedEvent`]는 라인 분류기가 만들어 내는 유일한 출력 타입이며,
//! 수퍼바이저 → 싱크 채널을 통해 전달됩니다.
//! 모든 변형은 공통 필드(원본 라인, 이벤트 시각, 호스트, pid, 소스 파일/라인)를 공유하고,
//! 변형별 필드는 [`EventKind`]에 담깁니다.

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// 프록시 요청 라인 (`Request: src:port => dest:port "user" proto METHOD url`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRequest {
    pub src_ip: IpAddr,
    pub dest_ip: IpAddr,
    pub dest_port: u16,
    pub user: String,
    pub proto: String,
    pub method: String,
    pub url: String,
}

/// 프록시 HTTP 처리 결과 라인 (`src:port METHOD url status text`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyHttpInfo {
    pub src_ip: IpAddr,
    pub method: String,
    pub url: String,
    /// 파싱 실패 시 0
    pub status: u16,
}

/// 이벤트 변형별 데이터
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// 엔벨로프 문법과 일치하지 않음
    Unmatched,
    /// 감시 대상이 아닌 유닛의 라인
    OtherUnit { unit: String },
    /// 서비스 라인이지만 페이로드를 해석할 수 없음
    ProxyUnknown,
    ProxyRequest(ProxyRequest),
    ProxyRequestHttpInfo(ProxyHttpInfo),
    ProxyRequestError { message: String },
    HttpServerError { message: String },
    RuntimeLog { is_error: bool, message: String },
    AuthModuleLog { is_error: bool, message: String },
}

impl EventKind {
    /// 저장소와 메트릭 레이블에서 사용하는 안정적인 태그
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Unmatched => "unmatched",
            Self::OtherUnit { .. } => "other_unit",
            Self::ProxyUnknown => "proxy_unknown",
            Self::ProxyRequest(_) => "proxy_request",
            Self::ProxyRequestHttpInfo(_) => "proxy_request_http_info",
            Self::ProxyRequestError { .. } => "proxy_request_error",
            Self::HttpServerError { .. } => "http_server_error",
            Self::RuntimeLog { .. } => "runtime_log",
            Self::AuthModuleLog { .. } => "auth_module_log",
        }
    }

    /// 에러 성격의 이벤트인지 여부
    pub fn is_error(&self) -> bool {
        match self {
            Self::ProxyRequestError { .. } | Self::HttpServerError { .. } => true,
            Self::RuntimeLog { is_error, .. } | Self::AuthModuleLog { is_error, .. } => *is_error,
            _ => false,
        }
    }

    /// 메시지를 담는 변형의 메시지
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::ProxyRequestError { message }
            | Self::HttpServerError { message }
            | Self::RuntimeLog { message, .. }
            | Self::AuthModuleLog { message, .. } => Some(message),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// 분류된 로그 이벤트
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedEvent {
    /// 원본 라인
    pub raw_line: String,
    /// 이벤트 시각 (엔벨로프/서비스 레코드의 시각, Unmatched이면 분류 시각)
    pub event_time: DateTime<Local>,
    /// 엔벨로프에서 추출한 시각인지 여부 (워터마크 전진 조건)
    pub envelope_timed: bool,
    pub host: String,
    pub pid: u32,
    pub source_file: String,
    pub source_line: u32,
    pub kind: EventKind,
}

impl ClassifiedEvent {
    /// 엔벨로프가 일치하지 않은 라인의 이벤트를 생성합니다.
    pub fn unmatched(raw_line: impl Into<String>, now: DateTime<Local>) -> Self {
        Self {
            raw_line: raw_line.into(),
            event_time: now,
            envelope_timed: false,
            host: String::new(),
            pid: 0,
            source_file: String::new(),
            source_line: 0,
            kind: EventKind::Unmatched,
        }
    }

    /// 에러 성격의 이벤트인지 여부
    pub fn is_error(&self) -> bool {
        self.kind.is_error()
    }

    /// 요청 출발지 IP (요청 계열 이벤트만)
    pub fn src_ip(&self) -> Option<IpAddr> {
        match &self.kind {
            EventKind::ProxyRequest(req) => Some(req.src_ip),
            EventKind::ProxyRequestHttpInfo(info) => Some(info.src_ip),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_flags() {
        assert!(
            EventKind::HttpServerError {
                message: "x".to_owned()
            }
            .is_error()
        );
        assert!(
            !EventKind::RuntimeLog {
                is_error: false,
                message: "started".to_owned()
            }
            .is_error()
        );
        assert!(!EventKind::Unmatched.is_error());
    }

    #[test]
    fn tags_are_distinct() {
        let kinds = [
            EventKind::Unmatched,
            EventKind::OtherUnit {
                unit: "sshd".to_owned(),
            },
            EventKind::ProxyUnknown,
            EventKind::ProxyRequestError {
                message: String::new(),
            },
            EventKind::HttpServerError {
                message: String::new(),
            },
        ];
        let mut tags: Vec<_> = kinds.iter().map(EventKind::tag).collect();
        tags.sort_unstable();
        tags.dedup();
        assert_eq!(tags.len(), kinds.len());
    }

    #[test]
    fn unmatched_event_is_not_envelope_timed() {
        let event = ClassifiedEvent::unmatched("garbage", Local::now());
        assert_eq!(event.kind, EventKind::Unmatched);
        assert!(!event.envelope_timed);
        assert!(event.src_ip().is_none());
    }
}
