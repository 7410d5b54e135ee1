//! Port Runner — owns one port's transport and drives its connect/poll/
//! retry state machine as a background task.
//!
//! Grounded on `UniversalPollingEngine::start_polling_task`
//! (combase/polling.rs): a spawned loop gated by a shared running flag,
//! `tokio::time::interval`-style pacing, and stats updated after every
//! cycle regardless of outcome. The retry/backoff wrapper follows
//! `@async_retry` (port_manager.py) literally: `max_retries` caps
//! *retries*, so a fresh connect makes `max_retries + 1` total attempts
//! before giving up.
//!
//! The transport lives behind `Arc<Mutex<..>>` rather than being owned
//! outright by the run loop, so the supervisor's out-of-band
//! `WriteRegister` calls can borrow the same connection between poll
//! cycles instead of needing a second socket per port.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::collaborators::FanOutBus;
use crate::config::PortConfig;
use crate::poller::{poll_once, PortDefaults};
use crate::sample::{DeviceStatus, Sample};
use crate::stats::{PortStats, RunnerState};
use crate::transport::Transport;

const INTER_DEVICE_GAP: Duration = Duration::from_millis(10);

pub type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

/// Shared, externally-observable handle to a running port.
pub struct RunnerHandle {
    pub stats: Arc<RwLock<PortStats>>,
    pub state: Arc<RwLock<RunnerState>>,
    pub last_error: Arc<RwLock<Option<String>>>,
    pub transport: SharedTransport,
    stop: Arc<Notify>,
    task: JoinHandle<()>,
}

impl RunnerHandle {
    /// Request a graceful stop and wait for the run loop to exit.
    pub async fn stop(self) {
        self.stop.notify_waiters();
        let _ = self.task.await;
    }
}

/// Spawn the background task driving `config`'s connect/poll loop.
/// Decoded samples are forwarded to `sample_tx` as they are produced, one
/// message per device per cycle — the Write-Buffer consumes the other end —
/// and published by reference to `fan_out` for live subscribers.
pub fn spawn(
    config: PortConfig,
    transport: SharedTransport,
    sample_tx: mpsc::Sender<Sample>,
    fan_out: Arc<dyn FanOutBus>,
) -> RunnerHandle {
    let stats = Arc::new(RwLock::new(PortStats::new()));
    let state = Arc::new(RwLock::new(RunnerState::Stopped));
    let last_error = Arc::new(RwLock::new(None));
    let stop = Arc::new(Notify::new());

    let task_stats = stats.clone();
    let task_state = state.clone();
    let task_last_error = last_error.clone();
    let task_stop = stop.clone();
    let task_transport = transport.clone();

    let task = tokio::spawn(async move {
        run(
            config,
            task_transport,
            task_stats,
            task_state,
            task_last_error,
            task_stop,
            sample_tx,
            fan_out,
        )
        .await;
    });

    RunnerHandle {
        stats,
        state,
        last_error,
        transport,
        stop,
        task,
    }
}

async fn run(
    config: PortConfig,
    transport: SharedTransport,
    stats: Arc<RwLock<PortStats>>,
    state: Arc<RwLock<RunnerState>>,
    last_error: Arc<RwLock<Option<String>>>,
    stop: Arc<Notify>,
    sample_tx: mpsc::Sender<Sample>,
    fan_out: Arc<dyn FanOutBus>,
) {
    let defaults = PortDefaults {
        byte_order: config.default_byte_order,
        word_order: config.default_word_order,
    };

    'session: loop {
        if connect_with_retry(&config, &transport, &state, &last_error, &stop).await.is_err() {
            return;
        }

        *state.write().await = RunnerState::Running;
        info!(port = %config.name, "port runner entering running state");

        let mut cycle_count: u64 = 0;

        loop {
            let cycle_started = Instant::now();
            let cancelled = tokio::select! {
                _ = stop.notified() => true,
                _ = run_cycle(&config, &transport, &stats, &sample_tx, &fan_out, &defaults) => false,
            };
            if cancelled {
                *state.write().await = RunnerState::Stopped;
                return;
            }
            let cycle_time = cycle_started.elapsed();

            let still_connected = transport.lock().await.is_connected();
            if !still_connected {
                warn!(port = %config.name, "transport disconnected mid-session, reconnecting");
                *state.write().await = RunnerState::Connecting;
                continue 'session;
            }

            cycle_count += 1;
            if cycle_count % 100 == 0 {
                let snapshot = stats.read().await;
                info!(
                    port = %config.name,
                    cycles = cycle_count,
                    success_rate = snapshot.success_rate(),
                    "periodic poll summary"
                );
            }

            let pacing = config
                .min_device_poll_interval_ms()
                .map(Duration::from_millis)
                .unwrap_or(Duration::from_secs(1));

            let sleep_for = pacing.checked_sub(cycle_time).unwrap_or(Duration::ZERO);
            if sleep_for.is_zero() && cycle_time > pacing {
                warn!(
                    port = %config.name,
                    cycle_ms = cycle_time.as_millis(),
                    pacing_ms = pacing.as_millis(),
                    "poll cycle exceeded the configured interval, proceeding immediately"
                );
            }

            tokio::select! {
                _ = stop.notified() => {
                    *state.write().await = RunnerState::Stopped;
                    return;
                }
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
    }
}

/// Attempt to connect, retrying up to `config.max_retries` times with a
/// `config.retry_delay_ms` backoff between attempts. Returns `Err(())`
/// once every attempt (the first try plus every retry) has failed.
async fn connect_with_retry(
    config: &PortConfig,
    transport: &SharedTransport,
    state: &Arc<RwLock<RunnerState>>,
    last_error: &Arc<RwLock<Option<String>>>,
    stop: &Arc<Notify>,
) -> std::result::Result<(), ()> {
    for attempt in 0..=config.max_retries {
        *state.write().await = RunnerState::Connecting;
        debug!(port = %config.name, attempt, "connecting port transport");

        let connect_result = transport.lock().await.connect().await;
        match connect_result {
            Ok(()) => return Ok(()),
            Err(e) => {
                *last_error.write().await = Some(e.to_string());
                if attempt == config.max_retries {
                    error!(port = %config.name, error = %e, "exhausted connection retries");
                    *state.write().await = RunnerState::Error;
                    return Err(());
                }
                warn!(port = %config.name, attempt, error = %e, "connect failed, backing off");
                *state.write().await = RunnerState::Backoff;
                tokio::select! {
                    _ = stop.notified() => {
                        *state.write().await = RunnerState::Stopped;
                        return Err(());
                    }
                    _ = tokio::time::sleep(Duration::from_millis(config.retry_delay_ms)) => {}
                }
            }
        }
    }
    Err(())
}

async fn run_cycle(
    config: &PortConfig,
    transport: &SharedTransport,
    stats: &Arc<RwLock<PortStats>>,
    sample_tx: &mpsc::Sender<Sample>,
    fan_out: &Arc<dyn FanOutBus>,
    defaults: &PortDefaults,
) {
    let enabled_devices: Vec<_> = config.devices.iter().filter(|d| d.enabled).collect();
    let last_index = enabled_devices.len().saturating_sub(1);

    for (index, device) in enabled_devices.iter().enumerate() {
        let poll_started = Instant::now();
        let mut guard = transport.lock().await;
        let outcome = poll_once(&mut **guard, device, &config.name, *defaults).await;
        drop(guard);

        match outcome {
            Ok(sample) => {
                let success = sample.device_status == DeviceStatus::Online;
                let latency_ms = poll_started.elapsed().as_secs_f64() * 1000.0;
                stats.write().await.record_poll(&device.name, success, latency_ms);

                if let Err(e) = fan_out.publish(&sample).await {
                    warn!(port = %config.name, device = %device.name, error = %e, "fan-out publish failed");
                }
                if sample_tx.send(sample).await.is_err() {
                    debug!(port = %config.name, "sample receiver dropped, write-buffer stopped");
                }
            }
            Err(e) => {
                error!(port = %config.name, device = %device.name, error = %e, "device poll failed");
                stats.write().await.record_poll(&device.name, false, 0.0);
            }
        }

        if index != last_index {
            tokio::time::sleep(INTER_DEVICE_GAP).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ByteOrder, DataType, DeviceConfig, RegisterConfig, RegisterKind, TransportConfig};
    use crate::transport::mock::{MockTransport, MockTransportConfig};
    use tracing_test::traced_test;

    fn port_config(max_retries: u32, retry_delay_ms: u64) -> PortConfig {
        PortConfig {
            name: "p1".into(),
            transport: TransportConfig::Tcp {
                host: "127.0.0.1".into(),
                port: 502,
            },
            timeout_ms: 200,
            max_retries,
            retry_delay_ms,
            enabled: true,
            default_byte_order: ByteOrder::Big,
            default_word_order: ByteOrder::Big,
            devices: vec![DeviceConfig {
                name: "dev".into(),
                unit_address: 1,
                poll_interval_ms: 1000,
                timeout_ms: 100,
                enabled: true,
                registers: vec![RegisterConfig {
                    kind: RegisterKind::Holding,
                    address: 0,
                    name: "r0".into(),
                    unit: String::new(),
                    data_type: DataType::Int16,
                    scale: 1.0,
                    offset: 0.0,
                    precision: 2,
                    byte_order: None,
                    word_order: None,
                    read_only: true,
                }],
            }],
        }
    }

    fn shared(transport: MockTransport) -> SharedTransport {
        Arc::new(Mutex::new(Box::new(transport)))
    }

    // S6: maxRetries=2, retryDelay=1s, every attempt fails -> Error after
    // 3 total connect attempts and >=2s elapsed, no device polls recorded.
    #[tokio::test(start_paused = true)]
    async fn s6_exhausted_retries_reach_error_state() {
        let config = port_config(2, 1000);
        let transport = shared(MockTransport::new(MockTransportConfig {
            should_fail_connection: true,
            ..Default::default()
        }));

        let stats = Arc::new(RwLock::new(PortStats::new()));
        let state = Arc::new(RwLock::new(RunnerState::Stopped));
        let last_error = Arc::new(RwLock::new(None));
        let stop = Arc::new(Notify::new());

        let start = tokio::time::Instant::now();
        let result = connect_with_retry(&config, &transport, &state, &last_error, &stop).await;
        let elapsed = start.elapsed();

        assert!(result.is_err());
        assert_eq!(*state.read().await, RunnerState::Error);
        assert!(elapsed >= Duration::from_secs(2));
        assert_eq!(stats.read().await.total_polls, 0);
    }

    #[tokio::test]
    async fn connect_succeeds_on_first_try_without_backoff() {
        let config = port_config(3, 1000);
        let transport = shared(MockTransport::new(MockTransportConfig::default()));
        let state = Arc::new(RwLock::new(RunnerState::Stopped));
        let last_error = Arc::new(RwLock::new(None));
        let stop = Arc::new(Notify::new());

        let result = connect_with_retry(&config, &transport, &state, &last_error, &stop).await;
        assert!(result.is_ok());
        assert_eq!(*state.read().await, RunnerState::Connecting);
    }

    struct NullFanOut;

    #[async_trait::async_trait]
    impl FanOutBus for NullFanOut {
        async fn publish(&self, _sample: &Sample) -> crate::error::Result<()> {
            Ok(())
        }
    }

    #[traced_test]
    #[tokio::test]
    async fn entering_running_state_is_logged() {
        let config = port_config(0, 10);
        let transport = shared(MockTransport::new(MockTransportConfig::default()));
        let (sample_tx, mut sample_rx) = mpsc::channel(8);
        let handle = spawn(config, transport, sample_tx, Arc::new(NullFanOut));

        tokio::time::timeout(Duration::from_millis(200), sample_rx.recv())
            .await
            .expect("poll cycle should produce a sample")
            .expect("channel should stay open");

        assert!(logs_contain("port runner entering running state"));
        handle.stop().await;
    }
}
