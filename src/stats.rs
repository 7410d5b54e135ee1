//! Statistics Recorder — per-port counters, response-time window, and
//! derived connectivity status.
//!
//! Grounded on `BaseCommStats`/`BaseConnectionStats`
//! (combase/stats.rs) for the running-average and counter shape, and on
//! `PortStatistics`/`get_port_status` (port_manager.py) for the
//! bounded-latency-window and derived-status rule.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

const RESPONSE_WINDOW_CAPACITY: usize = 100;

/// Per-device counters nested inside a port's statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub last_latency_ms: f64,
}

/// Derived connectivity status for a port, computed from its counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerState {
    Stopped,
    Connecting,
    Running,
    Backoff,
    Disconnected,
    Error,
}

/// Statistics for a single port, owned by its Port Runner.
#[derive(Debug, Clone)]
pub struct PortStats {
    pub total_polls: u64,
    pub successful_polls: u64,
    pub failed_polls: u64,
    pub error_count: u64,
    pub last_success_at: Option<SystemTime>,
    pub last_error_at: Option<SystemTime>,
    response_window: VecDeque<f64>,
    pub connected_devices: HashSet<String>,
    pub per_device: HashMap<String, DeviceStats>,
}

impl Default for PortStats {
    fn default() -> Self {
        Self::new()
    }
}

impl PortStats {
    pub fn new() -> Self {
        Self {
            total_polls: 0,
            successful_polls: 0,
            failed_polls: 0,
            error_count: 0,
            last_success_at: None,
            last_error_at: None,
            response_window: VecDeque::with_capacity(RESPONSE_WINDOW_CAPACITY),
            connected_devices: HashSet::new(),
            per_device: HashMap::new(),
        }
    }

    /// Record the outcome of one device poll. `sum(perDevice.total) ==
    /// port.totalPolls` is maintained by calling this exactly once per
    /// device poll, per cycle (pinned open-question decision, see
    /// DESIGN.md).
    pub fn record_poll(&mut self, device_name: &str, success: bool, latency_ms: f64) {
        self.total_polls += 1;
        let device = self.per_device.entry(device_name.to_string()).or_default();
        device.total += 1;

        if success {
            self.successful_polls += 1;
            device.successful += 1;
            device.last_latency_ms = latency_ms;
            self.last_success_at = Some(SystemTime::now());
            self.connected_devices.insert(device_name.to_string());

            if self.response_window.len() == RESPONSE_WINDOW_CAPACITY {
                self.response_window.pop_front();
            }
            self.response_window.push_back(latency_ms);
        } else {
            self.failed_polls += 1;
            device.failed += 1;
            self.error_count += 1;
            self.last_error_at = Some(SystemTime::now());
        }
    }

    pub fn avg_response_time_ms(&self) -> f64 {
        if self.response_window.is_empty() {
            return 0.0;
        }
        self.response_window.iter().sum::<f64>() / self.response_window.len() as f64
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_polls == 0 {
            return 0.0;
        }
        100.0 * self.successful_polls as f64 / self.total_polls as f64
    }

    /// Derived connectivity status: error dominates, then disconnected,
    /// then running. A fresh session with zero polls is `Disconnected`.
    pub fn derived_status(&self) -> RunnerState {
        let error_heavy = self.error_count > 10 && self.successful_polls == 0;
        let error_ratio_high = self.error_count as f64 > self.successful_polls as f64 / 2.0;
        if error_heavy || error_ratio_high {
            RunnerState::Error
        } else if self.connected_devices.is_empty() {
            RunnerState::Disconnected
        } else {
            RunnerState::Running
        }
    }

    /// Forget session-scoped counters at the start of a new runner
    /// session (e.g. after the supervisor explicitly resets a port).
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Point-in-time, externally-visible view of a port's status — the DTO
/// returned by `Status`/`StatusAll`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortStatusView {
    pub state: RunnerState,
    pub total_polls: u64,
    pub successful_polls: u64,
    pub failed_polls: u64,
    pub success_rate: f64,
    pub avg_response_time_ms: f64,
    pub connected_devices: usize,
    pub last_success_at: Option<SystemTime>,
    pub last_error_at: Option<SystemTime>,
    pub last_error: Option<String>,
}

impl PortStatusView {
    pub fn from_stats(state: RunnerState, stats: &PortStats, last_error: Option<String>) -> Self {
        Self {
            state,
            total_polls: stats.total_polls,
            successful_polls: stats.successful_polls,
            failed_polls: stats.failed_polls,
            success_rate: stats.success_rate(),
            avg_response_time_ms: stats.avg_response_time_ms(),
            connected_devices: stats.connected_devices.len(),
            last_success_at: stats.last_success_at,
            last_error_at: stats.last_error_at,
            last_error,
        }
    }
}
