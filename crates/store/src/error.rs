//! 저장소 에러 -- rusqlite 에러를 core의 [`StorageError`]로 변환

use proxylog_core::error::StorageError;

/// 계산 캐시 에러
///
/// 저장소 실패와 계산 콜백 실패를 구분합니다. 어느 쪽이든 트랜잭션은 롤백되어
/// 캐시 엔트리가 남지 않습니다.
#[derive(Debug, thiserror::Error)]
pub enum CacheError<E> {
    /// 캐시 DB 읽기/쓰기/트랜잭션 실패
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// 계산 콜백 실패
    #[error("compute failed: {0}")]
    Compute(E),
}

pub(crate) fn query_error(e: rusqlite::Error) -> StorageError {
    StorageError::Query(e.to_string())
}

pub(crate) fn connection_error(e: rusqlite::Error) -> StorageError {
    StorageError::Connection(e.to_string())
}

pub(crate) fn poisoned<T>(_: std::sync::PoisonError<T>) -> StorageError {
    StorageError::Connection("connection lock poisoned".to_owned())
}
