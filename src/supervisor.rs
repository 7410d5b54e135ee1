//! Engine Supervisor — owns every Port Runner and the Write-Buffer,
//! and is the external API surface: `start`/`stop`, `status`/`status_all`,
//! `write_register`.
//!
//! Grounded on `PortManager.start`/`get_all_ports_status`/`write_register`
//! (port_manager.py) for the "one runner per configured port, keyed by
//! name" shape and on the teacher's transport constructors
//! (protocols/modbus/tcp.rs, rtu.rs) for building a concrete `Transport`
//! from a `TransportConfig` variant.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::collaborators::{FanOutBus, Persistence};
use crate::config::{AppConfig, PortConfig, RegisterKind, TransportConfig};
use crate::error::{PollError, Result};
use crate::runner::{self, RunnerHandle, SharedTransport};
use crate::stats::{PortStats, PortStatusView, RunnerState};
use crate::transport::rtu_tcp::RtuOverTcpTransport;
use crate::transport::serial::SerialTransport;
use crate::transport::tcp::TcpTransport;
use crate::transport::Transport;
use crate::write_buffer::{self, WriteBufferConfig};

/// How often the supervisor snapshots every port's live stats and hands
/// them to persistence as `PortStats` rows. Not specified numerically by
/// the component design; chosen to match the write-buffer's default flush
/// cadence (`write_buffer::DEFAULT_FLUSH_INTERVAL`).
const STATS_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(10);

/// A port's handles needed to read a `PortStatusView` without holding the
/// supervisor's `ports` map across an await.
#[derive(Clone)]
struct PortSnapshotHandle {
    name: String,
    state: Arc<RwLock<RunnerState>>,
    stats: Arc<RwLock<PortStats>>,
    last_error: Arc<RwLock<Option<String>>>,
}

/// A single register or coil write, already validated against the
/// register's kind.
#[derive(Debug, Clone, Copy)]
pub enum WriteValue {
    Register(u16),
    Coil(bool),
}

struct PortEntry {
    config: PortConfig,
    handle: RunnerHandle,
}

/// Build a concrete transport from a port's configured variant.
fn build_transport(config: &PortConfig) -> Result<Box<dyn Transport>> {
    let connect_timeout = Duration::from_millis(config.timeout_ms);
    match &config.transport {
        TransportConfig::Tcp { host, port } => {
            Ok(Box::new(TcpTransport::new(host, *port, connect_timeout)?))
        }
        TransportConfig::RtuOverTcp { host, port } => {
            Ok(Box::new(RtuOverTcpTransport::new(host, *port, connect_timeout)?))
        }
        TransportConfig::RtuSerial {
            device,
            baud_rate,
            parity,
            stop_bits,
            byte_size,
        } => Ok(Box::new(SerialTransport::new(
            device.clone(),
            *baud_rate,
            *parity,
            *stop_bits,
            *byte_size,
            connect_timeout,
        ))),
    }
}

/// Owns every port's runner plus the shared write-buffer task.
pub struct EngineSupervisor {
    ports: HashMap<String, PortEntry>,
    write_buffer_stop: Arc<Notify>,
    write_buffer_task: JoinHandle<()>,
    stats_snapshot_stop: Arc<Notify>,
    stats_snapshot_task: JoinHandle<()>,
}

impl EngineSupervisor {
    /// Start one Port Runner per enabled port, plus the write-buffer
    /// flusher and the periodic stats-snapshot task. Disabled ports are
    /// recorded in config but never spawned.
    pub fn start(config: AppConfig, persistence: Arc<dyn Persistence>, fan_out: Arc<dyn FanOutBus>) -> Result<Self> {
        let (sample_tx, sample_rx) = mpsc::channel(1024);
        let write_buffer_stop = Arc::new(Notify::new());
        let write_buffer_task = write_buffer::spawn(
            sample_rx,
            persistence.clone(),
            WriteBufferConfig::default(),
            write_buffer_stop.clone(),
        );

        let mut ports = HashMap::new();
        let mut snapshot_handles = Vec::new();
        for port_config in config.ports {
            if !port_config.enabled {
                continue;
            }
            let transport: SharedTransport = Arc::new(Mutex::new(build_transport(&port_config)?));
            let handle = runner::spawn(port_config.clone(), transport, sample_tx.clone(), fan_out.clone());
            info!(port = %port_config.name, "port runner started");
            snapshot_handles.push(PortSnapshotHandle {
                name: port_config.name.clone(),
                state: handle.state.clone(),
                stats: handle.stats.clone(),
                last_error: handle.last_error.clone(),
            });
            ports.insert(port_config.name.clone(), PortEntry { config: port_config, handle });
        }

        let stats_snapshot_stop = Arc::new(Notify::new());
        let stats_snapshot_task =
            spawn_stats_snapshot(snapshot_handles, persistence, stats_snapshot_stop.clone());

        Ok(Self {
            ports,
            write_buffer_stop,
            write_buffer_task,
            stats_snapshot_stop,
            stats_snapshot_task,
        })
    }

    /// Stop every port runner, then the stats-snapshot task, then flush and
    /// stop the write-buffer.
    pub async fn stop(self) {
        for (name, entry) in self.ports {
            info!(port = %name, "stopping port runner");
            entry.handle.stop().await;
        }
        self.stats_snapshot_stop.notify_waiters();
        let _ = self.stats_snapshot_task.await;
        self.write_buffer_stop.notify_waiters();
        let _ = self.write_buffer_task.await;
    }

    pub async fn status(&self, port_name: &str) -> Result<PortStatusView> {
        let entry = self
            .ports
            .get(port_name)
            .ok_or_else(|| PollError::unknown_port(port_name))?;
        let state = *entry.handle.state.read().await;
        let stats = entry.handle.stats.read().await;
        let last_error = entry.handle.last_error.read().await.clone();
        Ok(PortStatusView::from_stats(state, &stats, last_error))
    }

    pub async fn status_all(&self) -> HashMap<String, PortStatusView> {
        let mut out = HashMap::new();
        for (name, entry) in &self.ports {
            let state = *entry.handle.state.read().await;
            let stats = entry.handle.stats.read().await;
            let last_error = entry.handle.last_error.read().await.clone();
            out.insert(name.clone(), PortStatusView::from_stats(state, &stats, last_error));
        }
        out
    }

    /// Route a write to the named device's port, resolving `device_name` to
    /// its configured `unit_address` and rejecting writes to read-only
    /// register kinds (Input/Discrete) before touching the transport.
    pub async fn write_register(
        &self,
        port_name: &str,
        device_name: &str,
        kind: RegisterKind,
        address: u16,
        value: WriteValue,
    ) -> Result<()> {
        if kind.is_bit_oriented() != matches!(value, WriteValue::Coil(_)) {
            return Err(PollError::internal("write value shape does not match register kind"));
        }
        if matches!(kind, RegisterKind::Input | RegisterKind::Discrete) {
            return Err(PollError::read_only(format!(
                "{} registers are read-only",
                kind.as_str()
            )));
        }

        let entry = self
            .ports
            .get(port_name)
            .ok_or_else(|| PollError::unknown_port(port_name))?;

        let unit_address = find_device(&entry.config, device_name)?;

        let mut transport = entry.handle.transport.lock().await;
        match value {
            WriteValue::Register(v) => transport.write_register(unit_address, address, v).await,
            WriteValue::Coil(v) => transport.write_coil(unit_address, address, v).await,
        }
    }
}

/// Periodically snapshot every port's live stats and hand them to
/// persistence as timestamped `PortStats` rows, mirroring `status_all`'s
/// read pattern over cloned handles so it never borrows the supervisor
/// across an await.
fn spawn_stats_snapshot(
    ports: Vec<PortSnapshotHandle>,
    persistence: Arc<dyn Persistence>,
    stop: Arc<Notify>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STATS_SNAPSHOT_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = stop.notified() => break,
                _ = ticker.tick() => {
                    let timestamp = Utc::now();
                    for port in &ports {
                        let state = *port.state.read().await;
                        let stats = port.stats.read().await;
                        let last_error = port.last_error.read().await.clone();
                        let view = PortStatusView::from_stats(state, &stats, last_error);
                        if let Err(e) = persistence.save_port_stats(&port.name, timestamp, &view).await {
                            warn!(port = %port.name, error = %e, "failed to save port stats snapshot");
                        }
                    }
                }
            }
        }
    })
}

fn find_device(config: &PortConfig, device_name: &str) -> Result<u8> {
    config
        .devices
        .iter()
        .find(|d| d.name == device_name)
        .map(|d| d.unit_address)
        .ok_or_else(|| PollError::unknown_device(device_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;

    fn port_config() -> PortConfig {
        PortConfig {
            name: "p1".into(),
            transport: TransportConfig::Tcp { host: "127.0.0.1".into(), port: 502 },
            timeout_ms: 1000,
            max_retries: 3,
            retry_delay_ms: 1000,
            enabled: true,
            default_byte_order: crate::config::ByteOrder::Big,
            default_word_order: crate::config::ByteOrder::Big,
            devices: vec![DeviceConfig {
                name: "meter1".into(),
                unit_address: 3,
                poll_interval_ms: 1000,
                timeout_ms: 200,
                enabled: true,
                registers: vec![],
            }],
        }
    }

    #[test]
    fn find_device_resolves_unit_address_by_name() {
        assert_eq!(find_device(&port_config(), "meter1").unwrap(), 3);
    }

    #[test]
    fn find_device_errors_for_unknown_name() {
        assert!(matches!(
            find_device(&port_config(), "missing"),
            Err(PollError::UnknownDevice(_))
        ));
    }
}
