//! 엔벨로프 문법 -- journald `short` 출력의 바깥 래퍼
//!
//! ```text
//! <month> <day> <hour>:<min>:<sec> <host> <unit>[<pid>]: <payload>
//! Jun 18 00:07:26 my-host dumbproxy[1234]: PROXY   : 2024/06/18 ...
//! ```
//!
//! 엔벨로프에는 연도가 없으므로 현재 시각으로 추론합니다 ([`infer_year`]).

use chrono::{DateTime, Datelike, Local};
use regex::Regex;

use super::{FieldReader, Stage, local_time};
use crate::error::FieldError;

const ENVELOPE_PATTERN: &str = r"^(?P<month>\w+)\s+(?P<day>\d+)\s+(?P<hour>\d+):(?P<minute>\d+):(?P<second>\d+)\s+(?P<host>\S+)\s+(?P<unit>[\w.-]+)\[(?P<pid>\d+)]:\s+(?P<payload>.+)$";

const MONTH_NAMES: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// 엔벨로프 추출 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// 추론된 연도를 포함한 로컬 시각
    pub time: DateTime<Local>,
    pub host: String,
    pub unit: String,
    pub pid: u32,
    /// 서비스 자체 로그 레코드
    pub payload: String,
}

/// 엔벨로프 문법
#[derive(Debug, Clone)]
pub struct EnvelopeGrammar {
    re: Regex,
}

impl EnvelopeGrammar {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            re: Regex::new(ENVELOPE_PATTERN)?,
        })
    }

    /// 라인에서 엔벨로프를 추출합니다.
    pub fn extract(&self, line: &str, now: DateTime<Local>) -> Stage<Envelope> {
        let Some(caps) = self.re.captures(line) else {
            return Stage::NotMatched;
        };

        let mut reader = FieldReader::new();
        let month = month_from_name(&caps["month"]).unwrap_or_else(|| now.month());
        let day: u32 = reader.number("day", &caps["day"]);
        let hour: u32 = reader.number("hour", &caps["hour"]);
        let minute: u32 = reader.number("minute", &caps["minute"]);
        let second: u32 = reader.number("second", &caps["second"]);
        let pid: u32 = reader.number("pid", &caps["pid"]);

        let mut time = now;
        if !reader.has_errors() {
            match local_time(infer_year(month, now), month, day, hour, minute, second) {
                Some(t) => time = t,
                None => reader.push(FieldError::new(
                    "envelope_time",
                    format!(
                        "{} {} {}:{}:{}",
                        &caps["month"], day, hour, minute, second
                    ),
                    "not a valid date/time",
                )),
            }
        }

        reader.finish(|| Envelope {
            time,
            host: caps["host"].to_owned(),
            unit: caps["unit"].to_owned(),
            pid,
            payload: caps["payload"].to_owned(),
        })
    }
}

/// 3글자 영문 월 이름을 1-12로 변환합니다.
pub fn month_from_name(name: &str) -> Option<u32> {
    MONTH_NAMES
        .iter()
        .position(|m| *m == name)
        .and_then(|i| u32::try_from(i + 1).ok())
}

/// 엔벨로프 월로부터 연도를 추론합니다.
///
/// 현재가 1월이고 엔벨로프가 12월이면 작년, 그 외에는 올해입니다.
pub fn infer_year(envelope_month: u32, now: DateTime<Local>) -> i32 {
    if now.month() == 1 && envelope_month == 12 {
        now.year() - 1
    } else {
        now.year()
    }
}
