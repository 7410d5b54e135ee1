//! Mock transport for exercising the poller and runner without real I/O.
//!
//! Grounded on `MockTransport`/`MockTransportConfig`
//! (core/transport/mock.rs): injectable connection failure, an
//! `Arc<RwLock<..>>`-guarded interior state, and a scripted-failure queue
//! so a test can force exactly the Nth read to fail (needed to reproduce
//! partial-cycle and retry-exhaustion scenarios).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::config::RegisterKind;
use crate::error::{PollError, Result};

use super::{ReadRequest, ReadResponse, Transport};

#[derive(Debug, Clone)]
pub struct MockTransportConfig {
    pub name: String,
    pub connection_delay: Duration,
    pub should_fail_connection: bool,
}

impl Default for MockTransportConfig {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            connection_delay: Duration::ZERO,
            should_fail_connection: false,
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    connected: bool,
    connect_attempts: u64,
    words: HashMap<(RegisterKind, u16), u16>,
    bits: HashMap<(RegisterKind, u16), bool>,
    /// Queued outcomes for upcoming `read_block` calls; `true` forces a
    /// failure, consumed front-to-back. Empty means "always succeed".
    read_failure_script: VecDeque<bool>,
    sent_registers: Vec<(u8, u16, u16)>,
    sent_coils: Vec<(u8, u16, bool)>,
}

#[derive(Debug)]
pub struct MockTransport {
    config: MockTransportConfig,
    state: Arc<RwLock<MockState>>,
}

impl MockTransport {
    pub fn new(config: MockTransportConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(MockState::default())),
        }
    }

    pub async fn set_register(&self, kind: RegisterKind, address: u16, value: u16) {
        self.state.write().await.words.insert((kind, address), value);
    }

    pub async fn set_bit(&self, kind: RegisterKind, address: u16, value: bool) {
        self.state.write().await.bits.insert((kind, address), value);
    }

    /// Push one scripted outcome for a future `read_block` call.
    pub async fn queue_read_outcome(&self, should_fail: bool) {
        self.state.write().await.read_failure_script.push_back(should_fail);
    }

    pub async fn connect_attempts(&self) -> u64 {
        self.state.read().await.connect_attempts
    }

    pub async fn sent_registers(&self) -> Vec<(u8, u16, u16)> {
        self.state.read().await.sent_registers.clone()
    }

    pub async fn sent_coils(&self) -> Vec<(u8, u16, bool)> {
        self.state.read().await.sent_coils.clone()
    }

    async fn read_block_single(&mut self, request: ReadRequest) -> Result<ReadResponse> {
        let mut state = self.state.write().await;
        if !state.connected {
            return Err(PollError::connection_lost("mock transport not connected"));
        }
        if let Some(true) = state.read_failure_script.pop_front() {
            return Err(PollError::timeout("mock transport scripted read failure"));
        }

        match request.kind {
            RegisterKind::Holding | RegisterKind::Input => {
                let words = (request.start..request.start + request.count)
                    .map(|addr| *state.words.get(&(request.kind, addr)).unwrap_or(&0))
                    .collect();
                Ok(ReadResponse::Words(words))
            }
            RegisterKind::Coil | RegisterKind::Discrete => {
                let bits = (request.start..request.start + request.count)
                    .map(|addr| *state.bits.get(&(request.kind, addr)).unwrap_or(&false))
                    .collect();
                Ok(ReadResponse::Bits(bits))
            }
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<()> {
        if !self.config.connection_delay.is_zero() {
            tokio::time::sleep(self.config.connection_delay).await;
        }
        let mut state = self.state.write().await;
        state.connect_attempts += 1;
        if self.config.should_fail_connection {
            return Err(PollError::connection_lost(format!(
                "{} refused connection",
                self.config.name
            )));
        }
        state.connected = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.state.write().await.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.try_read().map(|s| s.connected).unwrap_or(false)
    }

    async fn read_block(&mut self, request: ReadRequest) -> Result<ReadResponse> {
        let kind = request.kind;
        let mut parts = Vec::new();
        for sub_request in super::split_request(request) {
            parts.push(self.read_block_single(sub_request).await?);
        }
        Ok(super::merge_responses(kind, parts))
    }

    async fn write_register(&mut self, unit: u8, address: u16, value: u16) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.connected {
            return Err(PollError::connection_lost("mock transport not connected"));
        }
        state.words.insert((RegisterKind::Holding, address), value);
        state.sent_registers.push((unit, address, value));
        Ok(())
    }

    async fn write_coil(&mut self, unit: u8, address: u16, value: bool) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.connected {
            return Err(PollError::connection_lost("mock transport not connected"));
        }
        state.bits.insert((RegisterKind::Coil, address), value);
        state.sent_coils.push((unit, address, value));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_failure_is_reported() {
        let mut transport = MockTransport::new(MockTransportConfig {
            should_fail_connection: true,
            ..Default::default()
        });
        let result = transport.connect().await;
        assert!(result.is_err());
        assert_eq!(transport.connect_attempts().await, 1);
    }

    #[tokio::test]
    async fn scripted_read_failure_consumes_one_slot() {
        let mut transport = MockTransport::new(MockTransportConfig::default());
        transport.connect().await.unwrap();
        transport.queue_read_outcome(true).await;

        let request = ReadRequest {
            unit: 1,
            kind: RegisterKind::Holding,
            start: 0,
            count: 2,
        };
        assert!(transport.read_block(request).await.is_err());
        assert!(transport.read_block(request).await.is_ok());
    }

    #[tokio::test]
    async fn unset_registers_default_to_zero() {
        let mut transport = MockTransport::new(MockTransportConfig::default());
        transport.connect().await.unwrap();
        let request = ReadRequest {
            unit: 1,
            kind: RegisterKind::Holding,
            start: 0,
            count: 3,
        };
        let response = transport.read_block(request).await.unwrap();
        match response {
            ReadResponse::Words(words) => assert_eq!(words, vec![0, 0, 0]),
            _ => panic!("expected words"),
        }
    }
}
