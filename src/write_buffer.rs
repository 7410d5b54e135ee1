//! Write-Buffer — accumulates decoded samples and flushes them to
//! persistence, either once `max_size` is reached or on a fixed interval,
//! whichever comes first.
//!
//! Grounded on `add_to_buffer`/`flush_buffer`/`buffer_flush_task`
//! (port_manager.py): a plain append-ordered list per flush cycle, an
//! immediate flush when the size threshold is hit, and a ticking
//! background task as the fallback. Flushed samples are never requeued on
//! a persistence failure — that is the at-most-once guarantee the engine
//! offers downstream.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::collaborators::Persistence;
use crate::sample::Sample;

const DEFAULT_MAX_SIZE: usize = 1000;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

pub struct WriteBufferConfig {
    pub max_size: usize,
    pub flush_interval: Duration,
}

impl Default for WriteBufferConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

async fn flush(pending: &mut Vec<Sample>, persistence: &Arc<dyn Persistence>) {
    if pending.is_empty() {
        return;
    }
    let batch = std::mem::take(pending);
    let count = batch.len();
    let writes = batch.into_iter().map(|sample| {
        let persistence = persistence.clone();
        async move {
            if let Err(e) = persistence.save_reading(&sample).await {
                error!(
                    device = %sample.device_name, port = %sample.port_name, error = %e,
                    "dropping sample: persistence save failed"
                );
            }
        }
    });
    futures::future::join_all(writes).await;
    debug!(count, "write-buffer flushed");
}

/// Drive the write-buffer's lifetime: consume samples from `sample_rx`
/// (fed by every port runner), flush on size or interval triggers, and
/// flush whatever remains once the channel closes or a stop is requested.
pub fn spawn(
    mut sample_rx: mpsc::Receiver<Sample>,
    persistence: Arc<dyn Persistence>,
    config: WriteBufferConfig,
    stop: Arc<Notify>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut pending = Vec::with_capacity(config.max_size);
        let mut ticker = tokio::time::interval(config.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = stop.notified() => {
                    flush(&mut pending, &persistence).await;
                    break;
                }
                maybe_sample = sample_rx.recv() => {
                    match maybe_sample {
                        Some(sample) => {
                            pending.push(sample);
                            if pending.len() >= config.max_size {
                                flush(&mut pending, &persistence).await;
                            }
                        }
                        None => {
                            warn!("sample channel closed, flushing remainder and stopping write-buffer");
                            flush(&mut pending, &persistence).await;
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    flush(&mut pending, &persistence).await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::DeviceStatus;
    use crate::stats::PortStatusView;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingPersistence {
        saved: AtomicUsize,
    }

    #[async_trait]
    impl Persistence for RecordingPersistence {
        async fn save_reading(&self, _sample: &Sample) -> crate::error::Result<()> {
            self.saved.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn save_port_stats(
            &self,
            _port_name: &str,
            _timestamp: DateTime<Utc>,
            _status: &PortStatusView,
        ) -> crate::error::Result<()> {
            Ok(())
        }

        async fn cleanup(&self, _older_than_secs: u64) -> crate::error::Result<()> {
            Ok(())
        }
    }

    fn sample(device: &str) -> Sample {
        Sample {
            device_name: device.to_string(),
            port_name: "p1".to_string(),
            captured_at: Utc::now(),
            registers: HashMap::new(),
            device_status: DeviceStatus::Online,
            poll_duration_ms: 1,
        }
    }

    #[tokio::test]
    async fn flush_on_size_threshold() {
        let persistence = Arc::new(RecordingPersistence { saved: AtomicUsize::new(0) });
        let (tx, rx) = mpsc::channel(16);
        let stop = Arc::new(Notify::new());
        let handle = spawn(
            rx,
            persistence.clone(),
            WriteBufferConfig {
                max_size: 2,
                flush_interval: Duration::from_secs(3600),
            },
            stop.clone(),
        );

        tx.send(sample("a")).await.unwrap();
        tx.send(sample("b")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(persistence.saved.load(Ordering::SeqCst), 2);

        stop.notify_waiters();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn stop_flushes_remainder() {
        let persistence = Arc::new(RecordingPersistence { saved: AtomicUsize::new(0) });
        let (tx, rx) = mpsc::channel(16);
        let stop = Arc::new(Notify::new());
        let handle = spawn(
            rx,
            persistence.clone(),
            WriteBufferConfig {
                max_size: 1000,
                flush_interval: Duration::from_secs(3600),
            },
            stop.clone(),
        );

        tx.send(sample("a")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        stop.notify_waiters();
        handle.await.unwrap();

        assert_eq!(persistence.saved.load(Ordering::SeqCst), 1);
    }
}
