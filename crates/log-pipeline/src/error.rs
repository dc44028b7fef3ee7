//! 로그 파이프라인 에러 타입
//!
//! [`LogPipelineError`]는 분류기와 수퍼바이저에서 발생하는 에러를 표현합니다.
//! `From<LogPipelineError> for ProxylogError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.
//!
//! 라인 분류 에러는 두 종류로 구분됩니다 ([`ErrorKind`]):
//! - 문법 불일치 (`NoMatch`): 정상 흐름이며 에러로 노출되지 않습니다.
//! - 필드 파싱 실패 (`FieldParse`): 문법은 일치했지만 하위 필드가 잘못됨.
//!   한 라인의 모든 실패 필드가 [`FieldErrors`]로 모여 [`ClassifyError`]가 됩니다.

use std::fmt;

use proxylog_core::error::{ConfigError, PipelineError, ProcessError, ProxylogError};

/// 로그 파이프라인 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum LogPipelineError {
    /// 라인 분류 실패 (필드 파싱 에러)
    #[error(transparent)]
    Classify(#[from] ClassifyError),

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 로그 프로세스 에러
    #[error("process error: {0}")]
    Process(#[from] ProcessError),

    /// 채널 통신 에러
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 정규식 컴파일 에러
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl From<LogPipelineError> for ProxylogError {
    fn from(err: LogPipelineError) -> Self {
        match err {
            LogPipelineError::Classify(e) => ProxylogError::Parse(e.to_string()),
            LogPipelineError::Config { field, reason } => {
                ProxylogError::Config(ConfigError::InvalidValue { field, reason })
            }
            LogPipelineError::Process(e) => ProxylogError::Process(e),
            LogPipelineError::Io(e) => ProxylogError::Io(e),
            other => ProxylogError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}

/// 분류 실패의 안정적인 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 문법 불일치 (폴스루 대상, 에러 아님)
    NoMatch,
    /// 문법은 일치했으나 하위 필드가 잘못됨
    FieldParse,
}

/// 단일 필드 파싱 실패
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// 필드 이름 (src_ip, pid, year, ...)
    pub field: &'static str,
    /// 원본 값
    pub value: String,
    /// 실패 사유
    pub reason: String,
}

impl FieldError {
    pub fn new(field: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}': {}", self.field, self.value, self.reason)
    }
}

/// 한 라인에서 발생한 필드 에러 목록
///
/// `Display`는 모든 항목을 `; `로 연결합니다.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(Vec<FieldError>);

impl FieldErrors {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, error: FieldError) {
        self.0.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }

    /// 지정 필드에 대한 에러가 있는지 여부
    pub fn contains_field(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }
}

impl From<FieldError> for FieldErrors {
    fn from(error: FieldError) -> Self {
        Self(vec![error])
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

/// 라인 분류 에러 -- 일치한 문법 안의 잘못된 필드 전체를 담습니다.
#[derive(Debug, Clone, thiserror::Error)]
#[error("malformed fields ({errors}) in line: {line}")]
pub struct ClassifyError {
    /// 원본 라인
    pub line: String,
    /// 실패한 필드 목록 (비어 있지 않음)
    pub errors: FieldErrors,
}

impl ClassifyError {
    pub fn new(line: impl Into<String>, errors: FieldErrors) -> Self {
        Self {
            line: line.into(),
            errors,
        }
    }

    /// 항상 [`ErrorKind::FieldParse`]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::FieldParse
    }
}
