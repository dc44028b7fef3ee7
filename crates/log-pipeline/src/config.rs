//! 수퍼바이저 설정
//!
//! [`SupervisorConfig`]는 core의 [`JournalConfig`](proxylog_core::config::JournalConfig)를
//! 기반으로 로그 스트림 수퍼바이저 전용 설정을 제공합니다.
//!
//! # 사용 예시
//! ```
//! use proxylog_core::config::ProxylogConfig;
//! use proxylog_log_pipeline::config::SupervisorConfig;
//!
//! let core_config = ProxylogConfig::default();
//! let config = SupervisorConfig::from_core(&core_config.journal);
//! assert_eq!(config.restart_limit, 3);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LogPipelineError;

/// 로그 스트림 수퍼바이저 설정
///
/// 유닛 이름은 [`LineClassifier`](crate::parser::LineClassifier)가 소유합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// 실행 명령 (공백 단위로 분리되어 argv가 됨)
    pub command: String,
    /// 작업 디렉토리 (`None`이면 현재 디렉토리)
    pub work_dir: Option<PathBuf>,
    /// 연속 재시작 한도
    pub restart_limit: u32,
    /// 재시작 전 대기 시간
    pub restart_backoff: Duration,
    /// 출력 채널 용량
    pub channel_capacity: usize,
    /// 재개 인자 접두어 (빈 값이면 재개 인자를 붙이지 않음)
    pub resume_arg: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::from_core(&proxylog_core::config::JournalConfig::default())
    }
}

impl SupervisorConfig {
    /// core의 `JournalConfig`에서 수퍼바이저 설정을 생성합니다.
    pub fn from_core(core: &proxylog_core::config::JournalConfig) -> Self {
        Self {
            command: core.command.clone(),
            work_dir: (!core.work_dir.is_empty()).then(|| PathBuf::from(&core.work_dir)),
            restart_limit: core.restart_limit,
            restart_backoff: Duration::from_secs(core.restart_backoff_secs),
            channel_capacity: core.channel_capacity,
            resume_arg: core.resume_arg.clone(),
        }
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), LogPipelineError> {
        const MAX_CHANNEL_CAPACITY: usize = 1_000_000;

        if self.command.split(' ').all(str::is_empty) {
            return Err(LogPipelineError::Config {
                field: "command".to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }

        if self.restart_limit == 0 {
            return Err(LogPipelineError::Config {
                field: "restart_limit".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        if self.channel_capacity == 0 || self.channel_capacity > MAX_CHANNEL_CAPACITY {
            return Err(LogPipelineError::Config {
                field: "channel_capacity".to_owned(),
                reason: format!("must be 1-{MAX_CHANNEL_CAPACITY}"),
            });
        }

        if let Some(dir) = &self.work_dir {
            if !dir.is_dir() {
                return Err(LogPipelineError::Config {
                    field: "work_dir".to_owned(),
                    reason: format!("{} is not a directory", dir.display()),
                });
            }
        }

        Ok(())
    }
}

/// 수퍼바이저 설정 빌더
#[derive(Default)]
pub struct SupervisorConfigBuilder {
    config: SupervisorConfig,
}

impl SupervisorConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.config.command = command.into();
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = Some(dir.into());
        self
    }

    pub fn restart_limit(mut self, limit: u32) -> Self {
        self.config.restart_limit = limit;
        self
    }

    pub fn restart_backoff(mut self, backoff: Duration) -> Self {
        self.config.restart_backoff = backoff;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    pub fn resume_arg(mut self, prefix: impl Into<String>) -> Self {
        self.config.resume_arg = prefix.into();
        self
    }

    /// 설정을 검증하고 `SupervisorConfig`를 생성합니다.
    pub fn build(self) -> Result<SupervisorConfig, LogPipelineError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
