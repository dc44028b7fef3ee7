//! # proxylog-store
//!
//! SQLite(`rusqlite`) 기반 영속 계층입니다.
//!
//! - [`db`]: [`MonitorDb`] -- 분류 이벤트 집계 저장소이자 [`KvStore`](proxylog_core::KvStore) 구현
//! - [`cache`]: [`AntiStampedeCache`] -- 트랜잭션 단위 get-or-compute 캐시
//! - [`error`]: 캐시 에러와 rusqlite 에러 변환

pub mod cache;
pub mod db;
pub mod error;

pub use cache::AntiStampedeCache;
pub use db::{Dimension, GroupRow, MonitorDb, REPORT_LAST_ID_KEY, SCHEMA_VERSION};
pub use error::CacheError;
