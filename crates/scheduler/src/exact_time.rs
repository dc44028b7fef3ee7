//! 와일드카드 정시(time-of-day) 구성
//!
//! 모든 계산은 UTC 기준입니다.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Timelike, Utc};
use serde::{Deserialize, Serialize};

const HOUR: Duration = Duration::from_secs(3600);
const MINUTE: Duration = Duration::from_secs(60);
const DAY: Duration = Duration::from_secs(24 * 3600);

/// 정시 구성. `None`은 와일드카드입니다.
///
/// 영속 형식은 `{"hour":9,"minute":0,"second":null}` 형태의 JSON입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExactTime {
    pub hour: Option<u32>,
    pub minute: Option<u32>,
    pub second: Option<u32>,
}

impl ExactTime {
    pub fn new(hour: Option<u32>, minute: Option<u32>, second: Option<u32>) -> Self {
        Self {
            hour,
            minute,
            second,
        }
    }

    /// 구성 요소 범위를 확인합니다.
    pub fn validate(&self) -> Result<(), String> {
        for (name, value, limit) in [
            ("hour", self.hour, 24),
            ("minute", self.minute, 60),
            ("second", self.second, 60),
        ] {
            if let Some(v) = value {
                if v >= limit {
                    return Err(format!("{name} {v} out of range 0-{}", limit - 1));
                }
            }
        }
        Ok(())
    }

    /// 실행 주기: 시 지정 24h, 분 지정 1h, 초 지정 1m, 전부 와일드카드 1h
    pub fn interval(&self) -> Duration {
        if self.hour.is_some() {
            DAY
        } else if self.minute.is_some() {
            HOUR
        } else if self.second.is_some() {
            MINUTE
        } else {
            HOUR
        }
    }

    /// `now` 이하에서 이 구성이 마지막으로 실행됐어야 할 시각.
    ///
    /// 가장 상위의 지정 요소보다 위에 있는 와일드카드는 `now`의 값을 따르고,
    /// 그 아래의 와일드카드는 0으로 취급합니다. 결과가 `now`보다 뒤라면 한 주기를 뺍니다.
    pub fn need_exec_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let (hour, minute, second) = match (self.hour, self.minute, self.second) {
            (Some(h), m, s) => (h, m.unwrap_or(0), s.unwrap_or(0)),
            (None, Some(m), s) => (now.hour(), m, s.unwrap_or(0)),
            (None, None, Some(s)) => (now.hour(), now.minute(), s),
            (None, None, None) => (now.hour(), 0, 0),
        };

        let Some(candidate) = now
            .date_naive()
            .and_hms_opt(hour, minute, second)
            .map(|t| t.and_utc())
        else {
            return now;
        };

        if candidate > now {
            candidate - interval_delta(self.interval())
        } else {
            candidate
        }
    }
}

pub(crate) fn interval_delta(interval: Duration) -> TimeDelta {
    TimeDelta::seconds(i64::try_from(interval.as_secs()).unwrap_or(i64::MAX / 1000))
}
