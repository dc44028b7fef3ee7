//! 영속 키-값 저장소 trait
//!
//! 스케줄러 상태, 리포트 워터마크, 로그 스트림 워터마크처럼 재시작을 넘어 유지되어야 하는
//! 단일 값들을 저장합니다. 각 get/set은 저장소 계층에서 개별적으로 원자적이라고 가정하며,
//! 컴포넌트 간 다중 키 트랜잭션은 요구하지 않습니다.

use crate::error::StorageError;

/// 단일 키 원자적 get/set 저장소
///
/// 값이 없는 키는 에러가 아니라 기본값(`0`, `""`)으로 읽힙니다.
pub trait KvStore: Send + Sync {
    /// 정수 값을 읽습니다. 없으면 0.
    fn get_int(&self, key: &str) -> Result<i64, StorageError>;

    /// 문자열 값을 읽습니다. 없으면 빈 문자열.
    fn get_string(&self, key: &str) -> Result<String, StorageError>;

    /// 정수 값을 기록합니다 (덮어쓰기).
    fn set_int(&self, key: &str, value: i64) -> Result<(), StorageError>;

    /// 문자열 값을 기록합니다 (덮어쓰기).
    fn set_string(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

impl<T: KvStore + ?Sized> KvStore for std::sync::Arc<T> {
    fn get_int(&self, key: &str) -> Result<i64, StorageError> {
        (**self).get_int(key)
    }

    fn get_string(&self, key: &str) -> Result<String, StorageError> {
        (**self).get_string(key)
    }

    fn set_int(&self, key: &str, value: i64) -> Result<(), StorageError> {
        (**self).set_int(key, value)
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set_string(key, value)
    }
}
