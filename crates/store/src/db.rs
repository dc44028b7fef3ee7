//! 집계 로그 저장소 + KV 저장소
//!
//! [`MonitorDb`]는 하나의 SQLite 파일에 두 테이블을 둡니다.
//!
//! - `kv_data`: 스케줄러 상태, 리포트/스트림 워터마크 등 단일 값 ([`KvStore`] 구현)
//! - `log_records`: 분류된 이벤트 한 건당 한 행 (리포트 집계, vacuum 대상)
//!
//! 열 때 `schema_version`을 확인하며, 알 수 없는 버전이면 시작을 거부합니다.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use proxylog_core::error::StorageError;
use proxylog_core::event::{ClassifiedEvent, EventKind};
use proxylog_core::metrics as m;
use proxylog_core::store::KvStore;

use crate::error::{connection_error, poisoned, query_error};

/// 현재 스키마 버전
pub const SCHEMA_VERSION: i64 = 1;

/// 리포트 워터마크 KV 키 (마지막으로 리포트에 포함된 레코드 id)
pub const REPORT_LAST_ID_KEY: &str = "report:last_id";

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS kv_data (
        name TEXT NOT NULL PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS log_records (
        id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
        ts INTEGER NOT NULL,
        kind TEXT NOT NULL,
        event_ts INTEGER NOT NULL,
        host TEXT NOT NULL,
        pid INTEGER NOT NULL,
        src_ip TEXT NOT NULL,
        dest_ip TEXT NOT NULL,
        dest_port INTEGER NOT NULL,
        user TEXT NOT NULL,
        proto TEXT NOT NULL,
        method TEXT NOT NULL,
        url TEXT NOT NULL,
        status INTEGER NOT NULL,
        is_error INTEGER NOT NULL,
        message TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS id_src_ip ON log_records (id, src_ip);
    CREATE INDEX IF NOT EXISTS id_user ON log_records (id, user);
    CREATE INDEX IF NOT EXISTS id_dest_ip ON log_records (id, dest_ip);
    CREATE INDEX IF NOT EXISTS ts ON log_records (ts);
";

/// 집계 차원
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    SrcIp,
    User,
    DestIp,
}

impl Dimension {
    fn column(self) -> &'static str {
        match self {
            Self::SrcIp => "src_ip",
            Self::User => "user",
            Self::DestIp => "dest_ip",
        }
    }
}

/// 차원별 집계 결과 한 행
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRow {
    /// 차원 값 (IP 문자열 또는 사용자 이름)
    pub value: String,
    /// 레코드 수
    pub count: i64,
    /// 그룹 내 최대 레코드 id (다음 리포트 워터마크 후보)
    pub last_id: i64,
    pub first_event_time: DateTime<Utc>,
    pub last_event_time: DateTime<Utc>,
}

/// SQLite 기반 집계 저장소
pub struct MonitorDb {
    conn: Mutex<Connection>,
}

impl MonitorDb {
    /// DB 파일을 열고 스키마를 준비합니다.
    ///
    /// 저장된 `schema_version`이 [`SCHEMA_VERSION`]과 다르면
    /// [`StorageError::SchemaVersion`]을 반환합니다.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::Connection(format!("{}: {e}", parent.display())))?;
            }
        }

        let conn = Connection::open(path).map_err(connection_error)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(connection_error)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))
            .map_err(connection_error)?;
        conn.execute_batch(SCHEMA).map_err(query_error)?;

        conn.execute(
            "INSERT OR IGNORE INTO kv_data (name, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )
        .map_err(query_error)?;

        let found: i64 = conn
            .query_row(
                "SELECT CAST(value AS INTEGER) FROM kv_data WHERE name = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .map_err(query_error)?;
        if found != SCHEMA_VERSION {
            return Err(StorageError::SchemaVersion {
                found,
                expected: SCHEMA_VERSION,
            });
        }

        info!(path = %path.display(), "monitor db opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(poisoned)
    }

    /// 이벤트 한 건을 추가하고 새 레코드 id를 반환합니다.
    pub fn append(&self, event: &ClassifiedEvent) -> Result<i64, StorageError> {
        let row = RecordRow::from_event(event);
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO log_records
                (ts, kind, event_ts, host, pid, src_ip, dest_ip, dest_port,
                 user, proto, method, url, status, is_error, message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                Utc::now().timestamp(),
                event.kind.tag(),
                event.event_time.timestamp(),
                event.host,
                event.pid,
                row.src_ip,
                row.dest_ip,
                row.dest_port,
                row.user,
                row.proto,
                row.method,
                row.url,
                row.status,
                event.is_error(),
                row.message,
            ],
        )
        .map_err(query_error)?;

        metrics::counter!(m::STORE_RECORDS_APPENDED_TOTAL).increment(1);
        Ok(conn.last_insert_rowid())
    }

    /// `id > from_id`이고 차원 값이 비어 있지 않은 레코드를 차원별로 집계합니다.
    ///
    /// 결과는 레코드 수 내림차순입니다.
    pub fn group_report(
        &self,
        dimension: Dimension,
        from_id: i64,
    ) -> Result<Vec<GroupRow>, StorageError> {
        let column = dimension.column();
        let sql = format!(
            "SELECT {column}, COUNT(*) AS reqs, MAX(id), MIN(event_ts), MAX(event_ts)
             FROM log_records
             WHERE id > ?1 AND {column} != ''
             GROUP BY {column}
             ORDER BY reqs DESC, {column} ASC"
        );

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql).map_err(query_error)?;
        let rows = stmt
            .query_map(params![from_id], |row| {
                let first_ts: i64 = row.get(3)?;
                let last_ts: i64 = row.get(4)?;
                Ok(GroupRow {
                    value: row.get(0)?,
                    count: row.get(1)?,
                    last_id: row.get(2)?,
                    first_event_time: from_epoch(first_ts),
                    last_event_time: from_epoch(last_ts),
                })
            })
            .map_err(query_error)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row.map_err(query_error)?);
        }
        Ok(result)
    }

    pub fn src_ip_report(&self, from_id: i64) -> Result<Vec<GroupRow>, StorageError> {
        self.group_report(Dimension::SrcIp, from_id)
    }

    pub fn user_report(&self, from_id: i64) -> Result<Vec<GroupRow>, StorageError> {
        self.group_report(Dimension::User, from_id)
    }

    pub fn dest_report(&self, from_id: i64) -> Result<Vec<GroupRow>, StorageError> {
        self.group_report(Dimension::DestIp, from_id)
    }

    /// 수집 시각이 `max_age`보다 오래된 레코드를 삭제하고 삭제 수를 반환합니다.
    pub fn vacuum_older_than(&self, max_age: Duration) -> Result<usize, StorageError> {
        let age = chrono::Duration::from_std(max_age)
            .map_err(|e| StorageError::Query(format!("invalid vacuum age: {e}")))?;
        self.delete_ingested_before(Utc::now() - age)
    }

    /// 수집 시각이 `cutoff` 이전인 레코드를 삭제합니다.
    pub fn delete_ingested_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let deleted = self
            .lock()?
            .execute(
                "DELETE FROM log_records WHERE ts < ?1",
                params![cutoff.timestamp()],
            )
            .map_err(query_error)?;

        metrics::counter!(m::STORE_RECORDS_VACUUMED_TOTAL).increment(deleted as u64);
        debug!(deleted, cutoff = %cutoff, "log records vacuumed");
        Ok(deleted)
    }

    /// 리포트 워터마크 (없으면 0)
    pub fn report_last_id(&self) -> Result<i64, StorageError> {
        self.get_int(REPORT_LAST_ID_KEY)
    }

    pub fn set_report_last_id(&self, id: i64) -> Result<(), StorageError> {
        self.set_int(REPORT_LAST_ID_KEY, id)
    }

    fn get_value(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.lock()?
            .query_row(
                "SELECT value FROM kv_data WHERE name = ?1 LIMIT 1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(query_error)
    }

    fn set_value(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.lock()?
            .execute(
                "REPLACE INTO kv_data (name, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(query_error)?;
        Ok(())
    }
}

impl KvStore for MonitorDb {
    fn get_int(&self, key: &str) -> Result<i64, StorageError> {
        match self.get_value(key)? {
            Some(value) => value.trim().parse().map_err(|e| {
                StorageError::Serialization(format!("kv '{key}' is not an integer: {e}"))
            }),
            None => Ok(0),
        }
    }

    fn get_string(&self, key: &str) -> Result<String, StorageError> {
        Ok(self.get_value(key)?.unwrap_or_default())
    }

    fn set_int(&self, key: &str, value: i64) -> Result<(), StorageError> {
        self.set_value(key, &value.to_string())
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.set_value(key, value)
    }
}

fn from_epoch(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

/// 이벤트 종류별 선택 컬럼
#[derive(Default)]
struct RecordRow {
    src_ip: String,
    dest_ip: String,
    dest_port: u16,
    user: String,
    proto: String,
    method: String,
    url: String,
    status: u16,
    message: String,
}

impl RecordRow {
    fn from_event(event: &ClassifiedEvent) -> Self {
        let message = event.kind.message().unwrap_or_default().to_owned();
        match &event.kind {
            EventKind::ProxyRequest(req) => Self {
                src_ip: req.src_ip.to_string(),
                dest_ip: req.dest_ip.to_string(),
                dest_port: req.dest_port,
                user: req.user.clone(),
                proto: req.proto.clone(),
                method: req.method.clone(),
                url: req.url.clone(),
                ..Self::default()
            },
            EventKind::ProxyRequestHttpInfo(info) => Self {
                src_ip: info.src_ip.to_string(),
                method: info.method.clone(),
                url: info.url.clone(),
                status: info.status,
                ..Self::default()
            },
            _ => Self {
                message,
                ..Self::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Local;
    use proxylog_core::event::ProxyRequest;

    fn open_temp() -> (tempfile::TempDir, MonitorDb) {
        let dir = tempfile::tempdir().unwrap();
        let db = MonitorDb::open(&dir.path().join("proxylog.db")).unwrap();
        (dir, db)
    }

    fn request(src: &str, dest: &str, user: &str) -> ClassifiedEvent {
        ClassifiedEvent {
            raw_line: String::new(),
            event_time: Local::now(),
            envelope_timed: true,
            host: "my-host".to_owned(),
            pid: 1234,
            source_file: "handler.go".to_owned(),
            source_line: 138,
            kind: EventKind::ProxyRequest(ProxyRequest {
                src_ip: src.parse().unwrap(),
                dest_ip: dest.parse().unwrap(),
                dest_port: 443,
                user: user.to_owned(),
                proto: "HTTP/1.1".to_owned(),
                method: "GET".to_owned(),
                url: "http://ifconfig.co/".to_owned(),
            }),
        }
    }

    #[test]
    fn kv_defaults_when_absent() {
        let (_dir, db) = open_temp();
        assert_eq!(db.get_int("missing").unwrap(), 0);
        assert_eq!(db.get_string("missing").unwrap(), "");
    }

    #[test]
    fn kv_set_overwrites() {
        let (_dir, db) = open_temp();
        db.set_int("scheduler:report:LastExecTime", 10).unwrap();
        db.set_int("scheduler:report:LastExecTime", 20).unwrap();
        assert_eq!(db.get_int("scheduler:report:LastExecTime").unwrap(), 20);

        db.set_string("params", "{\"hour\":9}").unwrap();
        assert_eq!(db.get_string("params").unwrap(), "{\"hour\":9}");
    }

    #[test]
    fn non_integer_value_is_serialization_error() {
        let (_dir, db) = open_temp();
        db.set_string("k", "abc").unwrap();
        assert!(matches!(
            db.get_int("k"),
            Err(StorageError::Serialization(_))
        ));
    }

    #[test]
    fn reopen_keeps_data_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("proxylog.db");
        {
            let db = MonitorDb::open(&path).unwrap();
            db.set_report_last_id(42).unwrap();
        }
        let db = MonitorDb::open(&path).unwrap();
        assert_eq!(db.report_last_id().unwrap(), 42);
    }

    #[test]
    fn unknown_schema_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxylog.db");
        {
            let db = MonitorDb::open(&path).unwrap();
            db.set_string("schema_version", "2").unwrap();
        }
        match MonitorDb::open(&path) {
            Err(StorageError::SchemaVersion { found, expected }) => {
                assert_eq!(found, 2);
                assert_eq!(expected, SCHEMA_VERSION);
            }
            other => panic!("unexpected result: {:?}", other.err()),
        }
    }

    #[test]
    fn append_returns_increasing_ids() {
        let (_dir, db) = open_temp();
        let first = db.append(&request("10.0.0.1", "1.1.1.1", "alice")).unwrap();
        let second = db.append(&request("10.0.0.1", "1.1.1.1", "alice")).unwrap();
        assert!(second > first);
    }

    #[test]
    fn group_reports_skip_empty_dimension_and_respect_from_id() {
        let (_dir, db) = open_temp();
        let first = db.append(&request("10.0.0.1", "1.1.1.1", "alice")).unwrap();
        db.append(&request("10.0.0.2", "1.1.1.1", "")).unwrap();
        db.append(&request("10.0.0.2", "8.8.8.8", "bob")).unwrap();
        let last = db
            .append(&ClassifiedEvent::unmatched("noise", Local::now()))
            .unwrap();

        let src = db.src_ip_report(0).unwrap();
        assert_eq!(src.len(), 2);
        assert_eq!(src[0].value, "10.0.0.2");
        assert_eq!(src[0].count, 2);
        assert_eq!(src[1].value, "10.0.0.1");
        assert_eq!(src[1].last_id, first);

        let users = db.user_report(0).unwrap();
        let names: Vec<_> = users.iter().map(|r| r.value.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob"]);

        let dest = db.dest_report(first).unwrap();
        assert_eq!(dest.len(), 2);
        assert!(dest.iter().all(|r| r.count == 1));
        assert!(dest.iter().all(|r| r.last_id < last));

        assert!(db.src_ip_report(last).unwrap().is_empty());
    }

    #[test]
    fn vacuum_deletes_by_ingest_time() {
        let (_dir, db) = open_temp();
        db.append(&request("10.0.0.1", "1.1.1.1", "alice")).unwrap();
        db.append(&request("10.0.0.2", "1.1.1.1", "bob")).unwrap();

        assert_eq!(db.vacuum_older_than(Duration::from_secs(3600)).unwrap(), 0);
        let deleted = db
            .delete_ingested_before(Utc::now() + chrono::Duration::seconds(5))
            .unwrap();
        assert_eq!(deleted, 2);
        assert!(db.src_ip_report(0).unwrap().is_empty());
    }
}
