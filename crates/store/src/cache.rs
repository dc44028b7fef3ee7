//! 스탬피드 방지 계산 캐시
//!
//! 같은 키에 대한 동시 요청이 외부 조회를 중복 실행하지 않도록,
//! 조회부터 계산, 저장까지를 하나의 EXCLUSIVE 트랜잭션 안에서 수행합니다.
//! 두 번째 요청자는 첫 트랜잭션이 끝날 때까지 대기한 뒤 저장된 값을 읽습니다.
//!
//! 캐시는 집계 DB와 분리된 자체 SQLite 파일을 사용합니다.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tracing::{debug, warn};

use proxylog_core::error::StorageError;
use proxylog_core::metrics as m;

use crate::error::{CacheError, connection_error, poisoned, query_error};

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// SQLite 기반 get-or-compute 캐시
pub struct AntiStampedeCache {
    conn: Mutex<Connection>,
}

impl AntiStampedeCache {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::Connection(format!("{}: {e}", parent.display())))?;
            }
        }

        let conn = Connection::open(path).map_err(connection_error)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(connection_error)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT NOT NULL PRIMARY KEY,
                value TEXT NOT NULL,
                last_access INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS cache_last_access ON cache_entries (last_access);",
        )
        .map_err(query_error)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(poisoned)
    }

    /// 캐시된 값을 반환하거나, 없으면 `compute`로 계산해 저장합니다.
    ///
    /// 히트 시 최근 접근 시각을 갱신합니다. `compute`가 실패하면 트랜잭션을 롤백하므로
    /// 엔트리가 남지 않고 다음 호출이 다시 계산합니다.
    pub fn get_or_compute<F, E>(&self, key: &str, compute: F) -> Result<String, CacheError<E>>
    where
        F: FnOnce() -> Result<String, E>,
    {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Exclusive)
            .map_err(query_error)?;
        let now = Utc::now().timestamp();

        let cached: Option<String> = tx
            .query_row(
                "SELECT value FROM cache_entries WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(query_error)?;

        if let Some(value) = cached {
            tx.execute(
                "UPDATE cache_entries SET last_access = ?2 WHERE key = ?1",
                params![key, now],
            )
            .map_err(query_error)?;
            tx.commit().map_err(query_error)?;
            metrics::counter!(m::CACHE_HITS_TOTAL).increment(1);
            return Ok(value);
        }

        metrics::counter!(m::CACHE_MISSES_TOTAL).increment(1);
        let value = match compute() {
            Ok(value) => value,
            Err(e) => {
                // tx 드롭 시 롤백
                metrics::counter!(m::CACHE_COMPUTE_FAILURES_TOTAL).increment(1);
                warn!(key, "cache compute failed, rolling back");
                return Err(CacheError::Compute(e));
            }
        };

        tx.execute(
            "INSERT INTO cache_entries (key, value, last_access) VALUES (?1, ?2, ?3)",
            params![key, value, now],
        )
        .map_err(query_error)?;
        tx.commit().map_err(query_error)?;

        debug!(key, "cache entry stored");
        Ok(value)
    }

    /// 최근 접근 시각이 `max_age`보다 오래된 엔트리를 삭제합니다.
    pub fn vacuum_older_than(&self, max_age: Duration) -> Result<usize, StorageError> {
        let age = chrono::Duration::from_std(max_age)
            .map_err(|e| StorageError::Query(format!("invalid vacuum age: {e}")))?;
        self.delete_accessed_before(Utc::now() - age)
    }

    pub fn delete_accessed_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let deleted = self
            .lock()?
            .execute(
                "DELETE FROM cache_entries WHERE last_access < ?1",
                params![cutoff.timestamp()],
            )
            .map_err(query_error)?;
        debug!(deleted, "cache entries vacuumed");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::Cell;

    fn open_temp() -> (tempfile::TempDir, AntiStampedeCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = AntiStampedeCache::open(&dir.path().join("cache.db")).unwrap();
        (dir, cache)
    }

    #[test]
    fn second_call_uses_cached_value() {
        let (_dir, cache) = open_temp();
        let calls = Cell::new(0);
        let compute = || {
            calls.set(calls.get() + 1);
            Ok::<_, String>("one.one.one.one".to_owned())
        };

        assert_eq!(cache.get_or_compute("dns:reverse:1.1.1.1", compute).unwrap(), "one.one.one.one");
        assert_eq!(cache.get_or_compute("dns:reverse:1.1.1.1", compute).unwrap(), "one.one.one.one");
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn failed_compute_leaves_no_entry() {
        let (_dir, cache) = open_temp();

        let err = cache
            .get_or_compute("k", || Err::<String, _>("timeout".to_owned()))
            .unwrap_err();
        assert!(matches!(err, CacheError::Compute(ref e) if e == "timeout"));

        let calls = Cell::new(0);
        let value = cache
            .get_or_compute("k", || {
                calls.set(calls.get() + 1);
                Ok::<_, String>("v".to_owned())
            })
            .unwrap();
        assert_eq!(value, "v");
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn keys_are_independent() {
        let (_dir, cache) = open_temp();
        cache.get_or_compute("a", || Ok::<_, String>("1".to_owned())).unwrap();
        let b = cache.get_or_compute("b", || Ok::<_, String>("2".to_owned())).unwrap();
        assert_eq!(b, "2");
    }

    #[test]
    fn vacuum_removes_stale_entries() {
        let (_dir, cache) = open_temp();
        cache.get_or_compute("a", || Ok::<_, String>("1".to_owned())).unwrap();

        assert_eq!(cache.vacuum_older_than(Duration::from_secs(3600)).unwrap(), 0);
        let deleted = cache
            .delete_accessed_before(Utc::now() + chrono::Duration::seconds(5))
            .unwrap();
        assert_eq!(deleted, 1);

        let calls = Cell::new(0);
        cache
            .get_or_compute("a", || {
                calls.set(calls.get() + 1);
                Ok::<_, String>("1".to_owned())
            })
            .unwrap();
        assert_eq!(calls.get(), 1);
    }
}
