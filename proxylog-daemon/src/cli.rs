//! CLI argument definitions for proxylog-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// proxylog monitoring daemon.
///
/// Tails the proxy service log through an external log process, stores
/// classified events, and runs scheduled reports and maintenance.
#[derive(Parser, Debug)]
#[command(name = "proxylog-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to proxylog.toml configuration file.
    #[arg(short, long, default_value = "/etc/proxylog/proxylog.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = DaemonCli::parse_from(["proxylog-daemon"]);
        assert_eq!(cli.config, PathBuf::from("/etc/proxylog/proxylog.toml"));
        assert!(cli.log_level.is_none());
        assert!(!cli.validate);
    }

    #[test]
    fn overrides() {
        let cli = DaemonCli::parse_from([
            "proxylog-daemon",
            "-c",
            "/tmp/p.toml",
            "--log-level",
            "debug",
            "--log-format",
            "pretty",
            "--validate",
        ]);
        assert_eq!(cli.config, PathBuf::from("/tmp/p.toml"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.log_format.as_deref(), Some("pretty"));
        assert!(cli.validate);
    }
}
