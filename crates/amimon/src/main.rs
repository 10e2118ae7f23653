//! amimon: realtime PBX telemetry monitor
//!
//! Connects to the manager interface of an Asterisk PBX, correlates the
//! live channel table into logical calls, tracks presence/break state and
//! queue health, and pushes one consolidated JSON snapshot per poll cycle
//! to every WebSocket subscriber.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use amimon_monitor_engine::{CdrDatabase, Monitor, MonitorConfig};

mod push;

#[derive(Debug, Parser)]
#[command(name = "amimon", about = "Realtime PBX telemetry monitor", version)]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Override the push listener bind address (host:port).
    #[arg(long)]
    listen: Option<String>,

    /// Log level when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn load_config(path: &PathBuf) -> anyhow::Result<MonitorConfig> {
    match std::fs::read_to_string(path) {
        Ok(raw) => {
            let config = serde_json::from_str(&raw)
                .with_context(|| format!("invalid configuration in {}", path.display()))?;
            info!("loaded configuration from {}", path.display());
            Ok(config)
        }
        Err(e) => {
            warn!(
                "could not read {} ({}); using built-in defaults",
                path.display(),
                e
            );
            Ok(MonitorConfig::default())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("amimon={0},amimon_monitor_engine={0},amimon_ami_core={0}", args.log_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = load_config(&args.config)?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    info!(
        "starting amimon v{} (manager {}:{}, push {})",
        env!("CARGO_PKG_VERSION"),
        config.manager.host,
        config.manager.port,
        config.listen
    );

    let mut monitor = Monitor::new(config.clone());
    if let Some(url) = &config.cdr_url {
        match CdrDatabase::connect(url, config.normalized_gateways()).await {
            Ok(db) => monitor = monitor.with_history(Arc::new(db)),
            Err(e) => warn!("CDR database unavailable, historical counters disabled: {}", e),
        }
    } else {
        info!("no CDR database configured; historical counters disabled");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (poll, events) = monitor.run(shutdown_rx.clone());
    let push = tokio::spawn(push::serve(
        config.listen.clone(),
        monitor.hub(),
        shutdown_rx,
    ));

    tokio::signal::ctrl_c()
        .await
        .context("failed to install shutdown handler")?;
    info!("shutdown requested");
    shutdown_tx.send(true).ok();

    let _ = poll.await;
    let _ = events.await;
    match push.await {
        Ok(Err(e)) => warn!("push listener error during shutdown: {}", e),
        Err(e) => warn!("push listener task failed: {}", e),
        Ok(Ok(())) => {}
    }
    info!("shutdown complete");
    Ok(())
}
