//! Daemon assembly and lifecycle management.
//!
//! The [`Orchestrator`] wires the log stream supervisor into the monitor
//! database, registers the report and vacuum tasks with the persistent
//! scheduler, and runs until a shutdown signal arrives.
//!
//! # Startup Order
//!
//! 1. Log stream supervisor (resumed from the persisted watermark)
//! 2. Event sink (drains the supervisor channel into `MonitorDb`)
//! 3. Scheduler loop
//! 4. Log level signal worker (SIGUSR1 / SIGUSR2)
//!
//! # Shutdown Order
//!
//! 1. Supervisor stop (closes the event channel)
//! 2. Event sink flush (persists `journal:watermark`)
//! 3. Scheduler stop (waits for the running task, if any)

use std::fmt::Display;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Local, TimeDelta, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use proxylog_core::config::ProxylogConfig;
use proxylog_core::error::StorageError;
use proxylog_core::event::ClassifiedEvent;
use proxylog_core::store::KvStore;
use proxylog_log_pipeline::{LineClassifier, LogStreamSupervisor, SupervisorConfig};
use proxylog_scheduler::{ExactTime, PersistentTaskScheduler, TaskError};
use proxylog_store::{AntiStampedeCache, MonitorDb};

use crate::logging::LogLevelControl;
use crate::metrics_server;
use crate::report::{FileDelivery, ReportGenerator};
use crate::resolver::{DnsResolver, SystemReverseLookup};

/// KV key holding the epoch seconds of the last stored envelope-timed event.
pub const JOURNAL_WATERMARK_KEY: &str = "journal:watermark";

pub const REPORT_TASK: &str = "report";
pub const LOG_VACUUM_TASK: &str = "log-records-vacuum";
pub const CACHE_VACUUM_TASK: &str = "cache-vacuum";

const SECS_PER_DAY: u64 = 24 * 3600;

type Scheduler = PersistentTaskScheduler<Arc<MonitorDb>>;

/// Where a cold start resumes reading the log stream.
///
/// The persisted watermark is used unless it is absent or older than
/// `now - max_catchup_days`, in which case the floor is used.
pub fn cold_start_watermark(
    store: &impl KvStore,
    now: DateTime<Utc>,
    max_catchup_days: u32,
) -> Result<DateTime<Local>, StorageError> {
    let floor = now - TimeDelta::days(i64::from(max_catchup_days));
    let stored = store.get_int(JOURNAL_WATERMARK_KEY)?;

    let resume = match DateTime::from_timestamp(stored, 0) {
        Some(t) if stored > 0 && t >= floor => t,
        _ => floor,
    };
    Ok(resume.with_timezone(&Local))
}

/// The main daemon orchestrator.
pub struct Orchestrator {
    config: ProxylogConfig,
    db: Arc<MonitorDb>,
    supervisor: LogStreamSupervisor,
    scheduler: Arc<Scheduler>,
    log_control: Option<LogLevelControl>,
}

impl Orchestrator {
    /// Load configuration from `config_path` and build the orchestrator.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = ProxylogConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config, None)
    }

    /// Build from an already-loaded configuration.
    ///
    /// Opening either database is fatal. The metrics recorder is installed
    /// here when enabled, before any component records.
    pub fn build_from_config(
        config: ProxylogConfig,
        log_control: Option<LogLevelControl>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
        }

        let db_path = config.storage.resolved_db_path(&config.general);
        let db = Arc::new(MonitorDb::open(&db_path).map_err(|e| {
            anyhow::anyhow!("failed to open monitor db {}: {}", db_path.display(), e)
        })?);

        let cache_path = config.storage.resolved_cache_path(&config.general);
        let cache = Arc::new(AntiStampedeCache::open(&cache_path).map_err(|e| {
            anyhow::anyhow!("failed to open cache db {}: {}", cache_path.display(), e)
        })?);

        let supervisor_config = SupervisorConfig::from_core(&config.journal);
        supervisor_config
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid journal config: {}", e))?;
        let classifier = LineClassifier::new(config.journal.unit_name.as_str())
            .map_err(|e| anyhow::anyhow!("failed to build line classifier: {}", e))?;
        let supervisor = LogStreamSupervisor::new(supervisor_config, classifier);

        let scheduler = build_scheduler(&config, &db, &cache)?;
        tracing::info!(tasks = ?scheduler.task_names(), "orchestrator initialized");

        Ok(Self {
            config,
            db,
            supervisor,
            scheduler: Arc::new(scheduler),
            log_control,
        })
    }

    /// Run until SIGTERM or SIGINT.
    pub async fn run(self) -> Result<()> {
        let signals = ShutdownSignals::install()?;
        self.run_until(async move {
            let signal = signals.recv().await;
            tracing::info!(signal, "shutdown signal received");
        })
        .await
    }

    /// Run until `shutdown` completes, then stop every component in order.
    ///
    /// An exhausted or unlaunchable log stream does not end the run;
    /// scheduled tasks keep running until shutdown.
    pub async fn run_until<F: Future>(mut self, shutdown: F) -> Result<()> {
        let resume_from =
            cold_start_watermark(&self.db, Utc::now(), self.config.journal.max_catchup_days)
                .map_err(|e| anyhow::anyhow!("failed to read journal watermark: {}", e))?;

        let shutting_down = Arc::new(AtomicBool::new(false));
        let sink_task = match self.supervisor.start(Some(resume_from)) {
            Ok(events) => {
                let sink = EventSink {
                    db: Arc::clone(&self.db),
                    shutting_down: Arc::clone(&shutting_down),
                };
                Some(tokio::task::spawn_blocking(move || sink.drain(events)))
            }
            Err(e) => {
                tracing::error!(error = %e, "log stream unavailable, running scheduled tasks only");
                None
            }
        };

        let scheduler = Arc::clone(&self.scheduler);
        let scheduler_task = tokio::spawn(async move { scheduler.run().await });

        let signal_cancel = CancellationToken::new();
        let signal_task = self
            .log_control
            .clone()
            .map(|control| tokio::spawn(log_level_worker(control, signal_cancel.clone())));

        tracing::info!(resume_from = %resume_from, "proxylog-daemon running");
        shutdown.await;

        shutting_down.store(true, Ordering::SeqCst);
        if let Some(sink_task) = sink_task {
            if let Err(e) = self.supervisor.stop().await {
                tracing::warn!(error = %e, "log stream supervisor stop");
            }
            match sink_task.await {
                Ok(stored) => tracing::info!(stored, "event sink flushed"),
                Err(e) => tracing::error!(error = %e, "event sink panicked"),
            }
        }

        self.scheduler.stop();
        if let Err(e) = scheduler_task.await {
            tracing::error!(error = %e, "scheduler loop panicked");
        }

        signal_cancel.cancel();
        if let Some(task) = signal_task {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "log level signal worker failed"),
                Err(e) => tracing::warn!(error = %e, "log level signal worker panicked"),
            }
        }

        tracing::info!("proxylog-daemon shut down");
        Ok(())
    }

    /// Names of the registered scheduler tasks, in execution order.
    pub fn task_names(&self) -> Vec<&str> {
        self.scheduler.task_names()
    }

    pub fn config(&self) -> &ProxylogConfig {
        &self.config
    }
}

fn build_scheduler(
    config: &ProxylogConfig,
    db: &Arc<MonitorDb>,
    cache: &Arc<AntiStampedeCache>,
) -> Result<Scheduler> {
    let mut scheduler = Scheduler::new(
        Arc::clone(db),
        Duration::from_secs(config.scheduler.scan_interval_secs),
    );

    if config.report.enabled {
        let resolver = Arc::new(DnsResolver::new(
            Arc::clone(cache),
            Arc::new(SystemReverseLookup),
        ));
        let delivery = FileDelivery::new(config.report.resolved_output_dir(&config.general));
        let generator = Arc::new(ReportGenerator::new(
            Arc::clone(db),
            resolver,
            Box::new(delivery),
        ));

        let (hour, minute, second) = config.report.exact_time();
        scheduler
            .schedule_exact_time(REPORT_TASK, ExactTime::new(hour, minute, second), move || {
                let generator = Arc::clone(&generator);
                run_blocking(move || generator.generate())
            })
            .map_err(|e| anyhow::anyhow!("failed to schedule report: {}", e))?;
    }

    let vacuum_interval = Duration::from_secs(config.vacuum.interval_secs);

    let log_max_age = days(config.vacuum.log_max_age_days);
    let log_db = Arc::clone(db);
    scheduler.schedule(LOG_VACUUM_TASK, vacuum_interval, move || {
        let db = Arc::clone(&log_db);
        run_blocking(move || db.vacuum_older_than(log_max_age))
    });

    let cache_max_age = days(config.vacuum.cache_max_age_days);
    let vacuum_cache = Arc::clone(cache);
    scheduler.schedule(CACHE_VACUUM_TASK, vacuum_interval, move || {
        let cache = Arc::clone(&vacuum_cache);
        run_blocking(move || cache.vacuum_older_than(cache_max_age))
    });

    Ok(scheduler)
}

fn days(n: u32) -> Duration {
    Duration::from_secs(u64::from(n) * SECS_PER_DAY)
}

/// Run synchronous database work off the async runtime.
async fn run_blocking<T, E, F>(work: F) -> Result<(), TaskError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Display + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(TaskError::new(e)),
        Err(e) => Err(TaskError::new(format!("blocking task panicked: {e}"))),
    }
}

/// Drains the supervisor channel into the monitor database.
struct EventSink {
    db: Arc<MonitorDb>,
    shutting_down: Arc<AtomicBool>,
}

impl EventSink {
    /// Append every event until the channel closes, then persist the
    /// watermark. Returns the number of stored events.
    fn drain(self, mut events: mpsc::Receiver<ClassifiedEvent>) -> usize {
        let mut stored = 0;
        let mut watermark: Option<DateTime<Local>> = None;

        while let Some(event) = events.blocking_recv() {
            match self.db.append(&event) {
                Ok(_) => {
                    stored += 1;
                    if event.envelope_timed {
                        watermark = Some(event.event_time);
                    }
                }
                Err(e) => tracing::error!(kind = event.kind.tag(), error = %e, "can't store event"),
            }
        }

        if let Some(time) = watermark {
            match self.db.set_int(JOURNAL_WATERMARK_KEY, time.timestamp()) {
                Ok(()) => tracing::debug!(watermark = %time, "journal watermark persisted"),
                Err(e) => tracing::error!(error = %e, "can't persist journal watermark"),
            }
        }

        if !self.shutting_down.load(Ordering::SeqCst) {
            tracing::error!(stored, "log stream ended; no new events will be stored until restart");
        }
        stored
    }
}

/// SIGUSR1 switches to verbose logging, SIGUSR2 restores the configured level.
async fn log_level_worker(control: LogLevelControl, cancel: CancellationToken) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut usr1 = signal(SignalKind::user_defined1())
        .map_err(|e| anyhow::anyhow!("failed to install SIGUSR1 handler: {}", e))?;
    let mut usr2 = signal(SignalKind::user_defined2())
        .map_err(|e| anyhow::anyhow!("failed to install SIGUSR2 handler: {}", e))?;

    loop {
        let result = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            _ = usr1.recv() => control.verbose(),
            _ = usr2.recv() => control.restore(),
        };
        match result {
            Ok(()) => tracing::info!(filter = ?control.current(), "log level changed"),
            Err(e) => tracing::warn!(error = %e, "log level change failed"),
        }
    }
}

/// SIGTERM / SIGINT handlers, installed before startup.
struct ShutdownSignals {
    sigterm: tokio::signal::unix::Signal,
    sigint: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    fn install() -> Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            sigterm: signal(SignalKind::terminate())
                .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?,
            sigint: signal(SignalKind::interrupt())
                .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?,
        })
    }

    /// Name of the signal that arrived first.
    async fn recv(mut self) -> &'static str {
        tokio::select! {
            _ = self.sigterm.recv() => "SIGTERM",
            _ = self.sigint.recv() => "SIGINT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;

    fn open_db() -> (tempfile::TempDir, MonitorDb) {
        let dir = tempfile::tempdir().unwrap();
        let db = MonitorDb::open(&dir.path().join("proxylog.db")).unwrap();
        (dir, db)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 18, 12, 0, 0).unwrap()
    }

    #[test]
    fn cold_start_without_watermark_uses_floor() {
        let (_dir, db) = open_db();
        let resume = cold_start_watermark(&db, now(), 7).unwrap();
        assert_eq!(resume.with_timezone(&Utc), now() - TimeDelta::days(7));
    }

    #[test]
    fn cold_start_uses_recent_watermark() {
        let (_dir, db) = open_db();
        let stored = now() - TimeDelta::hours(3);
        db.set_int(JOURNAL_WATERMARK_KEY, stored.timestamp()).unwrap();

        let resume = cold_start_watermark(&db, now(), 7).unwrap();
        assert_eq!(resume.with_timezone(&Utc), stored);
    }

    #[test]
    fn cold_start_clamps_stale_watermark() {
        let (_dir, db) = open_db();
        let stored = now() - TimeDelta::days(30);
        db.set_int(JOURNAL_WATERMARK_KEY, stored.timestamp()).unwrap();

        let resume = cold_start_watermark(&db, now(), 7).unwrap();
        assert_eq!(resume.with_timezone(&Utc), now() - TimeDelta::days(7));
    }

    #[tokio::test]
    async fn run_blocking_maps_errors() {
        assert!(run_blocking(|| Ok::<_, String>(3)).await.is_ok());
        let err = run_blocking(|| Err::<(), _>("disk full".to_owned()))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "disk full");
    }
}
