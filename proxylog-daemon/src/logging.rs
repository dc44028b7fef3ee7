//! Logging initialization for proxylog-daemon.
//!
//! Configures `tracing-subscriber` based on the `[general]` section
//! of `ProxylogConfig`. The level filter is installed behind a
//! [`reload`] layer so it can be changed at runtime through a
//! [`LogLevelControl`] handle (SIGUSR1 / SIGUSR2).

use anyhow::Result;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, reload};

use proxylog_core::config::GeneralConfig;

/// Level used while verbose logging is toggled on.
const VERBOSE_LEVEL: &str = "debug";

/// Runtime-adjustable log level.
///
/// Cloned into the signal worker; every clone controls the same filter.
#[derive(Clone)]
pub struct LogLevelControl {
    handle: reload::Handle<EnvFilter, Registry>,
    base: String,
}

impl LogLevelControl {
    pub fn new(handle: reload::Handle<EnvFilter, Registry>, base: impl Into<String>) -> Self {
        Self {
            handle,
            base: base.into(),
        }
    }

    /// Replace the active filter with `directives`.
    pub fn set(&self, directives: &str) -> Result<()> {
        let filter = EnvFilter::try_new(directives)
            .map_err(|e| anyhow::anyhow!("invalid log filter '{}': {}", directives, e))?;
        self.handle
            .reload(filter)
            .map_err(|e| anyhow::anyhow!("failed to reload log filter: {}", e))
    }

    /// Switch to verbose (`debug`) logging.
    pub fn verbose(&self) -> Result<()> {
        self.set(VERBOSE_LEVEL)
    }

    /// Restore the configured level.
    pub fn restore(&self) -> Result<()> {
        self.set(&self.base)
    }

    /// Current filter directives.
    pub fn current(&self) -> Option<String> {
        self.handle.with_current(ToString::to_string).ok()
    }
}

/// Initialize the global tracing subscriber.
///
/// Must be called exactly once, before any tracing macros are used.
/// `RUST_LOG` takes precedence over `config.log_level`.
///
/// # Formats
///
/// * `"json"` - Machine-parseable JSON lines (default for production)
/// * `"pretty"` - Human-readable output (for development)
pub fn init_tracing(config: &GeneralConfig) -> Result<LogLevelControl> {
    let base = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    let env_filter = EnvFilter::try_new(&base)
        .map_err(|e| anyhow::anyhow!("invalid log level '{}': {}", base, e))?;
    let (filter, handle) = reload::Layer::new(env_filter);

    match config.log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .map_err(|e| {
                    anyhow::anyhow!("failed to initialize JSON tracing subscriber: {}", e)
                })?;
        }
        "pretty" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .map_err(|e| {
                    anyhow::anyhow!("failed to initialize pretty tracing subscriber: {}", e)
                })?;
        }
        _ => {
            return Err(anyhow::anyhow!(
                "unknown log format '{}', expected 'json' or 'pretty'",
                config.log_format
            ));
        }
    }

    Ok(LogLevelControl::new(handle, base))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggles_between_verbose_and_base() {
        let (_layer, handle) = reload::Layer::<EnvFilter, Registry>::new(EnvFilter::new("warn"));
        let control = LogLevelControl::new(handle, "warn");

        control.verbose().unwrap();
        assert_eq!(control.current().as_deref(), Some("debug"));

        control.restore().unwrap();
        assert_eq!(control.current().as_deref(), Some("warn"));
    }

    #[test]
    fn invalid_directive_is_rejected() {
        let (_layer, handle) = reload::Layer::<EnvFilter, Registry>::new(EnvFilter::new("info"));
        let control = LogLevelControl::new(handle, "info");
        assert!(control.set("proxylog=loud").is_err());
        assert_eq!(control.current().as_deref(), Some("info"));
    }

    #[test]
    fn unknown_format_is_rejected() {
        let config = GeneralConfig {
            log_format: "xml".to_owned(),
            ..GeneralConfig::default()
        };
        assert!(init_tracing(&config).is_err());
    }
}
