//! 설정 관리 — proxylog.toml 파싱 및 런타임 설정
//!
//! [`ProxylogConfig`]는 모든 모듈의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`PROXYLOG_JOURNAL_UNIT_NAME=dumbproxy` 형식)
//! 3. 설정 파일 (`proxylog.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), proxylog_core::error::ProxylogError> {
//! use proxylog_core::config::ProxylogConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = ProxylogConfig::load("proxylog.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = ProxylogConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, ProxylogError};

/// proxylog 통합 설정
///
/// `proxylog.toml` 파일의 최상위 구조를 나타냅니다.
/// 각 모듈은 자기 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxylogConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 로그 스트림(journal) 수퍼바이저 설정
    #[serde(default)]
    pub journal: JournalConfig,
    /// 저장소 설정
    #[serde(default)]
    pub storage: StorageConfig,
    /// 스케줄러 설정
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// 리포트 설정
    #[serde(default)]
    pub report: ReportConfig,
    /// vacuum 설정
    #[serde(default)]
    pub vacuum: VacuumConfig,
    /// 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl ProxylogConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ProxylogError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ProxylogError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProxylogError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                ProxylogError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, ProxylogError> {
        toml::from_str(toml_str).map_err(|e| {
            ProxylogError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `PROXYLOG_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "PROXYLOG_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "PROXYLOG_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.data_dir, "PROXYLOG_GENERAL_DATA_DIR");

        // Journal
        override_string(&mut self.journal.unit_name, "PROXYLOG_JOURNAL_UNIT_NAME");
        override_string(&mut self.journal.command, "PROXYLOG_JOURNAL_COMMAND");
        override_string(&mut self.journal.work_dir, "PROXYLOG_JOURNAL_WORK_DIR");
        override_u32(
            &mut self.journal.restart_limit,
            "PROXYLOG_JOURNAL_RESTART_LIMIT",
        );
        override_u64(
            &mut self.journal.restart_backoff_secs,
            "PROXYLOG_JOURNAL_RESTART_BACKOFF_SECS",
        );
        override_usize(
            &mut self.journal.channel_capacity,
            "PROXYLOG_JOURNAL_CHANNEL_CAPACITY",
        );
        override_string(&mut self.journal.resume_arg, "PROXYLOG_JOURNAL_RESUME_ARG");
        override_u32(
            &mut self.journal.max_catchup_days,
            "PROXYLOG_JOURNAL_MAX_CATCHUP_DAYS",
        );

        // Storage
        override_string(&mut self.storage.db_path, "PROXYLOG_STORAGE_DB_PATH");
        override_string(&mut self.storage.cache_path, "PROXYLOG_STORAGE_CACHE_PATH");

        // Scheduler
        override_u64(
            &mut self.scheduler.scan_interval_secs,
            "PROXYLOG_SCHEDULER_SCAN_INTERVAL_SECS",
        );

        // Report
        override_bool(&mut self.report.enabled, "PROXYLOG_REPORT_ENABLED");
        override_i32(&mut self.report.hour, "PROXYLOG_REPORT_HOUR");
        override_i32(&mut self.report.minute, "PROXYLOG_REPORT_MINUTE");
        override_i32(&mut self.report.second, "PROXYLOG_REPORT_SECOND");
        override_string(&mut self.report.output_dir, "PROXYLOG_REPORT_OUTPUT_DIR");

        // Vacuum
        override_u64(
            &mut self.vacuum.interval_secs,
            "PROXYLOG_VACUUM_INTERVAL_SECS",
        );
        override_u32(
            &mut self.vacuum.log_max_age_days,
            "PROXYLOG_VACUUM_LOG_MAX_AGE_DAYS",
        );
        override_u32(
            &mut self.vacuum.cache_max_age_days,
            "PROXYLOG_VACUUM_CACHE_MAX_AGE_DAYS",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "PROXYLOG_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "PROXYLOG_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "PROXYLOG_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), ProxylogError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.journal.unit_name.is_empty() {
            return Err(invalid("journal.unit_name", "must not be empty"));
        }
        if self.journal.command.split_whitespace().next().is_none() {
            return Err(invalid("journal.command", "must not be empty"));
        }
        if self.journal.restart_limit == 0 {
            return Err(invalid("journal.restart_limit", "must be greater than 0"));
        }
        if self.journal.channel_capacity == 0 {
            return Err(invalid("journal.channel_capacity", "must be greater than 0"));
        }
        if self.journal.max_catchup_days == 0 {
            return Err(invalid("journal.max_catchup_days", "must be greater than 0"));
        }

        if self.scheduler.scan_interval_secs == 0 {
            return Err(invalid(
                "scheduler.scan_interval_secs",
                "must be greater than 0",
            ));
        }

        check_time_component("report.hour", self.report.hour, 23)?;
        check_time_component("report.minute", self.report.minute, 59)?;
        check_time_component("report.second", self.report.second, 59)?;

        if self.vacuum.interval_secs == 0 {
            return Err(invalid("vacuum.interval_secs", "must be greater than 0"));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(invalid("metrics.port", "must be greater than 0"));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ProxylogError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

fn check_time_component(field: &str, value: i32, max: i32) -> Result<(), ProxylogError> {
    if value < -1 || value > max {
        return Err(invalid(field, format!("must be -1 (wildcard) or 0-{max}")));
    }
    Ok(())
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// 데이터 디렉토리
    pub data_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            data_dir: "/var/lib/proxylog".to_owned(),
        }
    }
}

/// 로그 스트림 수퍼바이저 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// 감시 대상 서비스의 유닛 이름 (엔벨로프의 unit 필드와 비교)
    pub unit_name: String,
    /// 로그 프로세스 실행 명령 (공백으로 분리)
    pub command: String,
    /// 로그 프로세스 작업 디렉토리 (빈 값이면 현재 디렉토리)
    pub work_dir: String,
    /// 연속 재시작 한도
    pub restart_limit: u32,
    /// 재시작 전 대기 시간 (초)
    pub restart_backoff_secs: u64,
    /// 수퍼바이저 → 싱크 채널 용량
    pub channel_capacity: usize,
    /// 재개 인자 접두어 (RFC 3339 타임스탬프가 뒤에 붙음)
    pub resume_arg: String,
    /// 콜드 스타트 시 최대 재생 기간 (일)
    pub max_catchup_days: u32,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            unit_name: "dumbproxy".to_owned(),
            command: "journalctl -o short -fu dumbproxy.service".to_owned(),
            work_dir: String::new(),
            restart_limit: 3,
            restart_backoff_secs: 2,
            channel_capacity: 1024,
            resume_arg: "--since=".to_owned(),
            max_catchup_days: 7,
        }
    }
}

/// 저장소 설정
///
/// 경로가 비어 있으면 `general.data_dir` 아래 기본 파일명을 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 집계/키-값 DB 경로
    pub db_path: String,
    /// 계산 캐시 DB 경로
    pub cache_path: String,
}

impl StorageConfig {
    /// 집계/키-값 DB의 실제 경로
    pub fn resolved_db_path(&self, general: &GeneralConfig) -> PathBuf {
        resolve_path(&self.db_path, &general.data_dir, "proxylog.db")
    }

    /// 캐시 DB의 실제 경로
    pub fn resolved_cache_path(&self, general: &GeneralConfig) -> PathBuf {
        resolve_path(&self.cache_path, &general.data_dir, "cache.db")
    }
}

fn resolve_path(configured: &str, data_dir: &str, file_name: &str) -> PathBuf {
    if configured.is_empty() {
        Path::new(data_dir).join(file_name)
    } else {
        PathBuf::from(configured)
    }
}

/// 스케줄러 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// tick 간격 (초)
    pub scan_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 10,
        }
    }
}

/// 리포트 설정
///
/// 시/분/초가 `-1`이면 와일드카드입니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// 활성화 여부
    pub enabled: bool,
    pub hour: i32,
    pub minute: i32,
    pub second: i32,
    /// 리포트 파일 출력 디렉토리 (빈 값이면 `{data_dir}/reports`)
    pub output_dir: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hour: 9,
            minute: 0,
            second: 0,
            output_dir: String::new(),
        }
    }
}

impl ReportConfig {
    /// `(hour, minute, second)`를 와일드카드(`None`) 포함 형태로 반환합니다.
    pub fn exact_time(&self) -> (Option<u32>, Option<u32>, Option<u32>) {
        let component = |v: i32| u32::try_from(v).ok();
        (
            component(self.hour),
            component(self.minute),
            component(self.second),
        )
    }

    /// 출력 디렉토리의 실제 경로
    pub fn resolved_output_dir(&self, general: &GeneralConfig) -> PathBuf {
        resolve_path(&self.output_dir, &general.data_dir, "reports")
    }
}

/// vacuum 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VacuumConfig {
    /// vacuum 태스크 실행 간격 (초)
    pub interval_secs: u64,
    /// 로그 레코드 최대 보관 기간 (일)
    pub log_max_age_days: u32,
    /// 캐시 엔트리 최대 미사용 기간 (일)
    pub cache_max_age_days: u32,
}

impl Default for VacuumConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            log_max_age_days: 30,
            cache_max_age_days: 7,
        }
    }
}

/// 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus 엔드포인트 활성화 여부
    pub enabled: bool,
    /// 바인드 주소
    pub listen_addr: String,
    /// 포트
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9464,
        }
    }
}

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_u32(target: &mut u32, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u32>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u32 from env var, ignoring"
            ),
        }
    }
}

fn override_i32(target: &mut i32, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<i32>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse i32 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}
