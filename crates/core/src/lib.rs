//! # proxylog-core
//!
//! proxylog 워크스페이스의 공통 타입을 정의합니다.
//!
//! - [`config`]: `proxylog.toml` 설정 구조체와 로딩/검증
//! - [`error`]: 도메인별 에러 타입
//! - [`event`]: 라인 분류 결과 이벤트
//! - [`metrics`]: Prometheus 메트릭 이름 상수
//! - [`store`]: 영속 키-값 저장소 trait

pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod store;

// --- 주요 타입 re-export ---

// 에러
pub use error::{
    ConfigError, PipelineError, ProcessError, ProxylogError, StorageError,
};

// 설정
pub use config::ProxylogConfig;

// 이벤트
pub use event::{ClassifiedEvent, EventKind, ProxyHttpInfo, ProxyRequest};

// 저장소 trait
pub use store::KvStore;
