//! Polling engine entry point: parse CLI args, load configuration, start
//! the supervisor, and run until interrupted.
//!
//! Grounded on `Args`/`initialize_logging` (core/bootstrap.rs) for the
//! clap-derive argument shape and tracing-subscriber setup, trimmed to
//! drop the SQLite config-manager and REST API bootstrap that belong to
//! out-of-scope collaborators.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pollsrv::collaborators::{FanOutBus, Persistence};
use pollsrv::error::Result;
use pollsrv::sample::Sample;
use pollsrv::stats::PortStatusView;
use pollsrv::{AppConfig, EngineSupervisor};

#[derive(Parser)]
#[command(
    name = "pollsrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Multi-port Modbus field gateway polling engine"
)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/pollsrv.yaml", env = "POLLSRV_CONFIG")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info", env = "POLLSRV_LOG_LEVEL")]
    log_level: String,

    /// Directory for rolling daily log files; logs go to stdout when unset
    #[arg(long, env = "POLLSRV_LOG_DIR")]
    log_dir: Option<String>,

    /// Validate configuration and exit without starting the engine
    #[arg(long)]
    validate: bool,
}

/// Logs every reading instead of persisting it. A real deployment wires
/// in its own `Persistence` backed by whatever store owns that concern;
/// this is the default so the engine still runs standalone.
struct LoggingPersistence;

#[async_trait]
impl Persistence for LoggingPersistence {
    async fn save_reading(&self, sample: &Sample) -> Result<()> {
        info!(
            device = %sample.device_name, port = %sample.port_name,
            registers = sample.registers.len(), status = ?sample.device_status,
            "reading"
        );
        Ok(())
    }

    async fn save_port_stats(&self, port_name: &str, timestamp: DateTime<Utc>, status: &PortStatusView) -> Result<()> {
        info!(
            port = %port_name, timestamp = %timestamp, state = ?status.state,
            success_rate = status.success_rate, "port stats"
        );
        Ok(())
    }

    async fn cleanup(&self, _older_than_secs: u64) -> Result<()> {
        Ok(())
    }
}

/// Logs every published sample instead of fanning it out to real-time
/// subscribers. A real deployment wires in its own `FanOutBus` backed by
/// whatever websocket/MQTT layer owns that concern.
struct LoggingFanOutBus;

#[async_trait]
impl FanOutBus for LoggingFanOutBus {
    async fn publish(&self, sample: &Sample) -> Result<()> {
        tracing::trace!(device = %sample.device_name, port = %sample.port_name, "sample published");
        Ok(())
    }
}

/// Initializes the global subscriber. With `log_dir` set, writes land in a
/// daily-rolling file through a non-blocking writer; otherwise they go to
/// stdout. The returned guard must stay alive for the process lifetime —
/// dropping it flushes and stops the background writer thread.
fn init_logging(log_level: &str, log_dir: Option<&str>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "pollsrv.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt().with_env_filter(filter).with_writer(writer).init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(&args.log_level, args.log_dir.as_deref());

    let config = AppConfig::load(&args.config)?;
    info!(ports = config.ports.len(), "configuration loaded");

    if args.validate {
        info!("configuration is valid, exiting (--validate)");
        return Ok(());
    }

    let persistence = Arc::new(LoggingPersistence);
    let fan_out = Arc::new(LoggingFanOutBus);
    let supervisor = EngineSupervisor::start(config, persistence, fan_out)?;

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => warn!(error = %e, "failed to listen for shutdown signal, stopping anyway"),
    }

    supervisor.stop().await;
    info!("engine stopped");
    Ok(())
}
