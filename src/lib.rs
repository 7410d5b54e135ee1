//! Multi-port Modbus field gateway polling engine.
//!
//! The engine connects to one or more Modbus ports in parallel, polls
//! each port's devices sequentially, decodes raw registers into typed
//! readings, and hands them off to a write-buffer for downstream
//! persistence. See [`supervisor::EngineSupervisor`] for the external API.

pub mod coalescer;
pub mod collaborators;
pub mod config;
pub mod decoder;
pub mod error;
pub mod poller;
pub mod runner;
pub mod sample;
pub mod stats;
pub mod supervisor;
pub mod transport;
pub mod write_buffer;

pub use config::AppConfig;
pub use error::{PollError, Result};
pub use sample::Sample;
pub use supervisor::EngineSupervisor;
