//! 서비스 레코드 문법 -- 엔벨로프 페이로드 안의 서비스 자체 로그 형식
//!
//! ```text
//! <LOGGER> : <year>/<month>/<day> <hour>:<min>:<sec> <file>:<line>: [<LEVEL>] <rest>
//! PROXY   : 2024/06/18 00:07:26 handler.go:138: INFO     Request: ...
//! ```

use chrono::{DateTime, Local};
use regex::Regex;

use super::{FieldReader, Stage, local_time};
use crate::error::FieldError;

const RECORD_PATTERN: &str = r"^(?P<logger>\w+)\s+:\s+(?P<year>\d+)/(?P<month>\d+)/(?P<day>\d+)\s+(?P<hour>\d+):(?P<minute>\d+):(?P<second>\d+)\s+(?P<file>[^:]+):(?P<line>\d+):(?:\s+(?P<level>[A-Z]+))?\s+(?P<rest>.+)$";

/// 서비스 레코드 추출 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub time: DateTime<Local>,
    /// 로거 컴포넌트 (PROXY, HTTPSRV, MAIN, AUTH, ...)
    pub logger: String,
    pub source_file: String,
    pub source_line: u32,
    /// 레벨 이름 (없으면 빈 문자열)
    pub level: String,
    pub rest: String,
}

/// 서비스 레코드 문법
#[derive(Debug, Clone)]
pub struct RecordGrammar {
    re: Regex,
}

impl RecordGrammar {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            re: Regex::new(RECORD_PATTERN)?,
        })
    }

    pub fn extract(&self, payload: &str) -> Stage<ServiceRecord> {
        let Some(caps) = self.re.captures(payload) else {
            return Stage::NotMatched;
        };

        let mut reader = FieldReader::new();
        let year: i32 = reader.number("year", &caps["year"]);
        let month: u32 = reader.number("month", &caps["month"]);
        let day: u32 = reader.number("day", &caps["day"]);
        let hour: u32 = reader.number("hour", &caps["hour"]);
        let minute: u32 = reader.number("minute", &caps["minute"]);
        let second: u32 = reader.number("second", &caps["second"]);
        let source_line: u32 = reader.number("source_line", &caps["line"]);

        let mut time = Local::now();
        if !reader.has_errors() {
            match local_time(year, month, day, hour, minute, second) {
                Some(t) => time = t,
                None => reader.push(FieldError::new(
                    "record_time",
                    format!("{year}/{month}/{day} {hour}:{minute}:{second}"),
                    "not a valid date/time",
                )),
            }
        }

        reader.finish(|| ServiceRecord {
            time,
            logger: caps["logger"].to_owned(),
            source_file: caps["file"].to_owned(),
            source_line,
            level: caps
                .name("level")
                .map(|m| m.as_str().to_owned())
                .unwrap_or_default(),
            rest: caps["rest"].to_owned(),
        })
    }
}
