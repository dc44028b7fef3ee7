use anyhow::Result;
use clap::Parser;

use proxylog_core::config::ProxylogConfig;
use proxylog_daemon::cli::DaemonCli;
use proxylog_daemon::logging::init_tracing;
use proxylog_daemon::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    // 파일 -> 환경변수 -> CLI 플래그 순으로 적용
    let mut config = ProxylogConfig::from_file(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load config {}: {}", cli.config.display(), e))?;
    config.apply_env_overrides();
    if let Some(level) = cli.log_level {
        config.general.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.general.log_format = format;
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

    if cli.validate {
        println!("configuration OK: {}", cli.config.display());
        return Ok(());
    }

    let log_control = init_tracing(&config.general)?;
    tracing::info!(
        config = %cli.config.display(),
        version = env!("CARGO_PKG_VERSION"),
        "proxylog-daemon starting"
    );

    let orchestrator = Orchestrator::build_from_config(config, Some(log_control))?;
    orchestrator.run().await
}
