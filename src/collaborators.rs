//! Contract-only collaborators: persistence and fan-out are owned by
//! other subsystems, but the polling engine depends on their shape to
//! hand off samples and stats. These traits are never implemented here —
//! a caller supplies a concrete `Arc<dyn Persistence>`/`Arc<dyn FanOutBus>`
//! wired up elsewhere in the deployment.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::sample::Sample;
use crate::stats::PortStatusView;

/// Durable storage for readings and port statistics.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn save_reading(&self, sample: &Sample) -> Result<()>;
    async fn save_port_stats(&self, port_name: &str, timestamp: DateTime<Utc>, status: &PortStatusView) -> Result<()>;
    async fn cleanup(&self, older_than_secs: u64) -> Result<()>;
}

/// Outbound fan-out of freshly decoded samples (websocket, MQTT, etc).
#[async_trait]
pub trait FanOutBus: Send + Sync {
    async fn publish(&self, sample: &Sample) -> Result<()>;
}
