//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `proxylog_`
//! - 모듈명: `journal_`, `scheduler_`, `cache_`, `store_`
//! - 접미어: `_total` (counter), 없음 (gauge)

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 이벤트 종류 레이블 키 (proxy_request, runtime_log, ...)
pub const LABEL_KIND: &str = "kind";

/// 태스크 이름 레이블 키
pub const LABEL_TASK: &str = "task";

/// 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

// ─── Journal (로그 스트림) 메트릭 ───────────────────────────────────

/// Journal: 프로세스 stdout에서 읽은 라인 수 (counter)
pub const JOURNAL_LINES_READ_TOTAL: &str = "proxylog_journal_lines_read_total";

/// Journal: 분류된 이벤트 수 (counter, label: kind)
pub const JOURNAL_EVENTS_CLASSIFIED_TOTAL: &str = "proxylog_journal_events_classified_total";

/// Journal: 필드 파싱 에러로 버려진 라인 수 (counter)
pub const JOURNAL_CLASSIFY_ERRORS_TOTAL: &str = "proxylog_journal_classify_errors_total";

/// Journal: 프로세스 재시작 수 (counter)
pub const JOURNAL_PROCESS_RESTARTS_TOTAL: &str = "proxylog_journal_process_restarts_total";

// ─── Scheduler 메트릭 ──────────────────────────────────────────────

/// Scheduler: 실행된 태스크 수 (counter, labels: task, result)
pub const SCHEDULER_TASK_RUNS_TOTAL: &str = "proxylog_scheduler_task_runs_total";

// ─── Cache 메트릭 ──────────────────────────────────────────────────

/// Cache: 히트 수 (counter)
pub const CACHE_HITS_TOTAL: &str = "proxylog_cache_hits_total";

/// Cache: 미스 수 (counter)
pub const CACHE_MISSES_TOTAL: &str = "proxylog_cache_misses_total";

/// Cache: 계산 실패로 롤백된 수 (counter)
pub const CACHE_COMPUTE_FAILURES_TOTAL: &str = "proxylog_cache_compute_failures_total";

// ─── Store 메트릭 ──────────────────────────────────────────────────

/// Store: 추가된 로그 레코드 수 (counter)
pub const STORE_RECORDS_APPENDED_TOTAL: &str = "proxylog_store_records_appended_total";

/// Store: vacuum으로 삭제된 레코드 수 (counter)
pub const STORE_RECORDS_VACUUMED_TOTAL: &str = "proxylog_store_records_vacuumed_total";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 로그 스트림 활성 여부 (gauge, 1 = alive)
pub const DAEMON_JOURNAL_ALIVE: &str = "proxylog_daemon_journal_alive";

/// 모든 메트릭의 설명을 등록합니다.
///
/// 메트릭 레코더 설치 직후 한 번 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    describe_counter!(
        JOURNAL_LINES_READ_TOTAL,
        "Total number of raw lines read from the log process stdout"
    );
    describe_counter!(
        JOURNAL_EVENTS_CLASSIFIED_TOTAL,
        "Classified events per kind"
    );
    describe_counter!(
        JOURNAL_CLASSIFY_ERRORS_TOTAL,
        "Lines dropped because a matched grammar had malformed fields"
    );
    describe_counter!(
        JOURNAL_PROCESS_RESTARTS_TOTAL,
        "Number of log process relaunches"
    );

    describe_counter!(
        SCHEDULER_TASK_RUNS_TOTAL,
        "Scheduled task executions per task and result"
    );

    describe_counter!(CACHE_HITS_TOTAL, "Compute cache hits");
    describe_counter!(CACHE_MISSES_TOTAL, "Compute cache misses");
    describe_counter!(
        CACHE_COMPUTE_FAILURES_TOTAL,
        "Compute callbacks that failed and were rolled back"
    );

    describe_counter!(
        STORE_RECORDS_APPENDED_TOTAL,
        "Log records appended to the aggregate store"
    );
    describe_counter!(
        STORE_RECORDS_VACUUMED_TOTAL,
        "Log records deleted by age-based vacuum"
    );

    describe_gauge!(
        DAEMON_JOURNAL_ALIVE,
        "1 while the log stream supervisor is running"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_use_prefix() {
        for name in [
            JOURNAL_LINES_READ_TOTAL,
            JOURNAL_EVENTS_CLASSIFIED_TOTAL,
            JOURNAL_CLASSIFY_ERRORS_TOTAL,
            JOURNAL_PROCESS_RESTARTS_TOTAL,
            SCHEDULER_TASK_RUNS_TOTAL,
            CACHE_HITS_TOTAL,
            CACHE_MISSES_TOTAL,
            CACHE_COMPUTE_FAILURES_TOTAL,
            STORE_RECORDS_APPENDED_TOTAL,
            STORE_RECORDS_VACUUMED_TOTAL,
            DAEMON_JOURNAL_ALIVE,
        ] {
            assert!(name.starts_with("proxylog_"), "{name}");
        }
    }

    #[test]
    fn describe_all_without_recorder_does_not_panic() {
        describe_all();
    }
}
