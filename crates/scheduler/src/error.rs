//! 스케줄러 에러 타입

use proxylog_core::error::{ConfigError, ProxylogError, StorageError};

/// 태스크 등록 에러
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// 등록 중 영속 상태 읽기/쓰기 실패
    #[error("task '{task}': {source}")]
    Storage {
        task: String,
        #[source]
        source: StorageError,
    },

    /// 범위를 벗어난 정시 구성 요소
    #[error("task '{task}': invalid exact time: {reason}")]
    InvalidTime { task: String, reason: String },
}

impl From<SchedulerError> for ProxylogError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Storage { source, .. } => ProxylogError::Storage(source),
            SchedulerError::InvalidTime { task, reason } => {
                ProxylogError::Config(ConfigError::InvalidValue {
                    field: format!("scheduler.{task}"),
                    reason,
                })
            }
        }
    }
}

/// 태스크 실행 실패
///
/// 스케줄러는 이 에러를 로그로만 남기며 루프를 중단하지 않습니다.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct TaskError(String);

impl TaskError {
    pub fn new(reason: impl std::fmt::Display) -> Self {
        Self(reason.to_string())
    }
}

impl From<StorageError> for TaskError {
    fn from(err: StorageError) -> Self {
        Self::new(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_time_converts_to_config_error() {
        let err: ProxylogError = SchedulerError::InvalidTime {
            task: "report".to_owned(),
            reason: "hour 24 out of range".to_owned(),
        }
        .into();
        assert!(matches!(
            err,
            ProxylogError::Config(ConfigError::InvalidValue { ref field, .. }) if field == "scheduler.report"
        ));
    }

    #[test]
    fn task_error_from_storage() {
        let err: TaskError = StorageError::Query("locked".to_owned()).into();
        assert_eq!(err.to_string(), "query failed: locked");
    }
}
