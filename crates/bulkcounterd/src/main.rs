//! Bulk Counter Daemon
//!
//! Main entry point for bulkcounterd.

use anyhow::Context;
use bulkcounterd::{BulkCounterDaemon, BulkCounterdConfig, DEFAULT_CONFIG_PATH};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// SONiC bulk counter polling daemon
#[derive(Parser, Debug)]
#[command(name = "bulkcounterd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level or filter directive, overrides the config file
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Poll rounds to run before exiting (0 runs until signaled)
    #[arg(short = 'n', long, default_value = "0")]
    iterations: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = BulkCounterdConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(level) = args.log_level {
        config.daemon.log_level = level;
    }
    config.validate()?;

    init_logging(&config.daemon.log_level)?;
    info!(config = %args.config.display(), "bulkcounterd: Starting bulk counter daemon");

    let shutdown = setup_signal_handlers();
    let daemon = BulkCounterDaemon::new(config)?;

    match daemon.run(args.iterations, shutdown).await {
        Ok(report) => {
            let summary = serde_json::to_string(&report)?;
            info!(report = %summary, "bulkcounterd: Daemon exiting normally");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "bulkcounterd: Daemon exiting with error");
            Err(e.into())
        }
    }
}

/// Initialize structured logging
fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(level).context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to set logger: {}", e))
}

/// Setup signal handlers for graceful shutdown
fn setup_signal_handlers() -> Arc<AtomicBool> {
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_clone = shutdown_flag.clone();

    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("bulkcounterd: Received SIGINT/SIGTERM");
            shutdown_flag_clone.store(true, Ordering::Relaxed);
        }
    });

    shutdown_flag
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["bulkcounterd"]);
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert_eq!(args.iterations, 0);
        assert!(args.log_level.is_none());
    }

    #[test]
    fn test_args_overrides() {
        let args = Args::parse_from([
            "bulkcounterd",
            "--config",
            "/tmp/bc.toml",
            "-l",
            "debug",
            "--iterations",
            "5",
        ]);
        assert_eq!(args.config, PathBuf::from("/tmp/bc.toml"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert_eq!(args.iterations, 5);
    }
}
