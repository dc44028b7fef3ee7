//! 로거별 디스패치 -- 서비스 레코드를 최종 [`EventKind`]로 변환
//!
//! 로거 이름과 핸들러의 고정 테이블([`LOGGERS`])을 순서대로 조회합니다.
//! 테이블에 없는 로거는 `NotMatched`(= ProxyUnknown)입니다.

use std::net::{IpAddr, Ipv4Addr};

use regex::Regex;
use tracing::warn;

use proxylog_core::event::{EventKind, ProxyHttpInfo, ProxyRequest};

use super::{FieldReader, Stage, record::ServiceRecord};
use crate::error::FieldError;

const REQUEST_PATTERN: &str = r#"^Request:\s+(?P<src_ip>\S+):\d+\s+=>\s+(?P<dest_ip>\S+):(?P<dest_port>\d+)\s+"(?P<user>[^"]*)"\s+(?P<proto>\S+)\s+(?P<method>[A-Z]+)\s+(?P<url>.+)$"#;

const REQUEST_PREFIX: &str = "Request: ";

type Handler = fn(&RequestGrammar, &ServiceRecord) -> Stage<EventKind>;

/// 로거 이름 -> 핸들러
const LOGGERS: &[(&str, Handler)] = &[
    ("PROXY", proxy),
    ("HTTPSRV", http_server),
    ("MAIN", runtime),
    ("AUTH", auth),
];

/// 프록시 요청 라인 문법
#[derive(Debug, Clone)]
pub struct RequestGrammar {
    re: Regex,
}

impl RequestGrammar {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            re: Regex::new(REQUEST_PATTERN)?,
        })
    }

    /// `Request: src:port => dest:port "user" proto METHOD url`
    pub fn extract(&self, rest: &str) -> Stage<ProxyRequest> {
        let Some(caps) = self.re.captures(rest) else {
            return Stage::NotMatched;
        };

        let mut reader = FieldReader::new();
        let src_ip = reader.ip("src_ip", &caps["src_ip"]);
        let dest_ip = reader.ip("dest_ip", &caps["dest_ip"]);
        let dest_port: u16 = reader.number("dest_port", &caps["dest_port"]);

        reader.finish(|| ProxyRequest {
            src_ip,
            dest_ip,
            dest_port,
            user: caps["user"].to_owned(),
            proto: caps["proto"].to_owned(),
            method: caps["method"].to_owned(),
            url: caps["url"].to_owned(),
        })
    }
}

/// 서비스 레코드를 로거 테이블로 디스패치합니다.
pub fn dispatch(request: &RequestGrammar, record: &ServiceRecord) -> Stage<EventKind> {
    LOGGERS
        .iter()
        .find(|(name, _)| *name == record.logger)
        .map_or(Stage::NotMatched, |(_, handler)| handler(request, record))
}

fn is_error_level(level: &str) -> bool {
    matches!(level, "ERROR" | "CRITICAL")
}

fn proxy(request: &RequestGrammar, record: &ServiceRecord) -> Stage<EventKind> {
    if record.level != "INFO" {
        return Stage::Matched(EventKind::ProxyRequestError {
            message: record.rest.clone(),
        });
    }

    if record.rest.starts_with(REQUEST_PREFIX) {
        return request.extract(&record.rest).map(EventKind::ProxyRequest);
    }

    http_info(&record.rest).map(EventKind::ProxyRequestHttpInfo)
}

/// `src:port METHOD url status text` (정확히 5개 토큰)
fn http_info(rest: &str) -> Stage<ProxyHttpInfo> {
    let parts: Vec<&str> = rest.split(' ').collect();
    let [source, method, url, status, _status_text] = parts.as_slice() else {
        return Stage::NotMatched;
    };

    let mut reader = FieldReader::new();
    let src_ip = match source.rsplit_once(':') {
        Some((ip, _port)) => reader.ip("src_ip", ip),
        None => {
            reader.push(FieldError::new("src_ip", *source, "missing port"));
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        }
    };

    let status = status.parse::<u16>().unwrap_or_else(|e| {
        warn!(status, error = %e, "unable to parse status code");
        0
    });

    reader.finish(|| ProxyHttpInfo {
        src_ip,
        method: (*method).to_owned(),
        url: (*url).to_owned(),
        status,
    })
}

fn http_server(_: &RequestGrammar, record: &ServiceRecord) -> Stage<EventKind> {
    Stage::Matched(EventKind::HttpServerError {
        message: record.rest.clone(),
    })
}

fn runtime(_: &RequestGrammar, record: &ServiceRecord) -> Stage<EventKind> {
    Stage::Matched(EventKind::RuntimeLog {
        is_error: is_error_level(&record.level),
        message: record.rest.clone(),
    })
}

fn auth(_: &RequestGrammar, record: &ServiceRecord) -> Stage<EventKind> {
    Stage::Matched(EventKind::AuthModuleLog {
        is_error: is_error_level(&record.level),
        message: record.rest.clone(),
    })
}
