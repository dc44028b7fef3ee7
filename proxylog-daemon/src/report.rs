//! Usage report generation.
//!
//! A report covers every log record appended since the previous report,
//! tracked through the `report:last_id` watermark in the monitor database.
//! Rendering is plain text; delivery goes through [`ReportDelivery`].

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{info, warn};

use proxylog_core::error::StorageError;
use proxylog_store::{GroupRow, MonitorDb};

use crate::resolver::{DnsResolver, unresolved};

/// Report generation failure.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("report storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("report delivery to {target} failed: {reason}")]
    Delivery { target: String, reason: String },
}

/// A rendered report ready for delivery.
#[derive(Debug, Clone)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    /// Records with an id above this value are covered.
    pub from_id: i64,
    /// Highest record id covered, `None` for an empty report.
    pub last_id: Option<i64>,
    pub body: String,
}

/// Report sink.
pub trait ReportDelivery: Send + Sync {
    fn deliver(&self, report: &Report) -> Result<(), ReportError>;
}

/// Writes each report to `report-<UTC timestamp>.txt` in a directory.
#[derive(Debug, Clone)]
pub struct FileDelivery {
    dir: PathBuf,
}

impl FileDelivery {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn file_path(&self, generated_at: DateTime<Utc>) -> PathBuf {
        self.dir.join(format!(
            "report-{}.txt",
            generated_at.format("%Y%m%dT%H%M%SZ")
        ))
    }
}

impl ReportDelivery for FileDelivery {
    fn deliver(&self, report: &Report) -> Result<(), ReportError> {
        let path = self.file_path(report.generated_at);
        let delivery_error = |e: std::io::Error| ReportError::Delivery {
            target: path.display().to_string(),
            reason: e.to_string(),
        };

        std::fs::create_dir_all(&self.dir).map_err(delivery_error)?;
        std::fs::write(&path, &report.body).map_err(delivery_error)?;
        info!(path = %path.display(), "report written");
        Ok(())
    }
}

/// Builds and delivers usage reports.
pub struct ReportGenerator {
    db: Arc<MonitorDb>,
    resolver: Arc<DnsResolver>,
    delivery: Box<dyn ReportDelivery>,
}

impl ReportGenerator {
    pub fn new(
        db: Arc<MonitorDb>,
        resolver: Arc<DnsResolver>,
        delivery: Box<dyn ReportDelivery>,
    ) -> Self {
        Self {
            db,
            resolver,
            delivery,
        }
    }

    /// Generate and deliver one report.
    ///
    /// The watermark moves to the highest covered record id only after a
    /// successful delivery, so a failed delivery is retried with the same
    /// records next time. An empty report is still delivered.
    pub fn generate(&self) -> Result<Report, ReportError> {
        let from_id = self.db.report_last_id()?;
        let sources = self.db.src_ip_report(from_id)?;
        let users = self.db.user_report(from_id)?;
        let destinations = self.db.dest_report(from_id)?;

        let last_id = sources
            .iter()
            .chain(&users)
            .chain(&destinations)
            .map(|row| row.last_id)
            .max();

        let generated_at = Utc::now();
        let mut body = String::new();
        let _ = writeln!(
            body,
            "Proxy usage report generated {}",
            generated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        let _ = writeln!(body, "Records after id {from_id}");

        render_section(&mut body, "Source IPs", &sources, |row| row.value.clone());
        render_section(&mut body, "Users", &users, |row| row.value.clone());
        render_section(&mut body, "Destinations", &destinations, |row| {
            format!("{} ({})", self.resolve(&row.value), row.value)
        });

        let report = Report {
            generated_at,
            from_id,
            last_id,
            body,
        };
        self.delivery.deliver(&report)?;

        if let Some(id) = last_id {
            self.db.set_report_last_id(id)?;
        }
        info!(
            from_id,
            last_id = ?last_id,
            sources = sources.len(),
            users = users.len(),
            destinations = destinations.len(),
            "report delivered"
        );
        Ok(report)
    }

    fn resolve(&self, ip: &str) -> String {
        match self.resolver.resolve(ip) {
            Ok(name) => name,
            Err(e) => {
                warn!(ip, error = %e, "reverse lookup failed");
                unresolved(ip)
            }
        }
    }
}

fn render_section(
    body: &mut String,
    title: &str,
    rows: &[GroupRow],
    label: impl Fn(&GroupRow) -> String,
) {
    let _ = writeln!(body);
    let _ = writeln!(body, "== {title} ==");
    if rows.is_empty() {
        let _ = writeln!(body, "(no records)");
        return;
    }
    for row in rows {
        let _ = writeln!(
            body,
            "{:>8}  {}  [{} .. {}]",
            row.count,
            label(row),
            row.first_event_time.to_rfc3339_opts(SecondsFormat::Secs, true),
            row.last_event_time.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
    }
}
