//! Modbus TCP transport.
//!
//! Grounded on `ModbusTcpClient::connect` (protocols/modbus/tcp.rs): parse
//! the socket address once, wrap the connect call in a timeout, and log at
//! debug/info/error around the lifecycle. `Slave` is switched per call
//! rather than fixed at connect time, since one port's TCP socket serves
//! every unit address configured on it.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tokio_modbus::client::{tcp, Context, Reader, Writer};
use tokio_modbus::slave::{Slave, SlaveContext};
use tracing::{debug, error, info};

use crate::error::{PollError, Result};

use super::{ReadRequest, ReadResponse, Transport};
use crate::config::RegisterKind;

#[derive(Debug)]
pub struct TcpTransport {
    addr: SocketAddr,
    connect_timeout: Duration,
    context: Option<Context>,
}

impl TcpTransport {
    pub fn new(host: &str, port: u16, connect_timeout: Duration) -> Result<Self> {
        let addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|e| PollError::config_invalid(format!("invalid TCP address {host}:{port}: {e}")))?;
        Ok(Self {
            addr,
            connect_timeout,
            context: None,
        })
    }

    async fn read_block_single(&mut self, request: ReadRequest) -> Result<ReadResponse> {
        let context = self
            .context
            .as_mut()
            .ok_or_else(|| PollError::connection_lost("tcp transport not connected"))?;
        context.set_slave(Slave(request.unit));

        match request.kind {
            RegisterKind::Holding => {
                let words = context
                    .read_holding_registers(request.start, request.count)
                    .await
                    .map_err(|e| PollError::protocol_exception(e.to_string()))?;
                Ok(ReadResponse::Words(words))
            }
            RegisterKind::Input => {
                let words = context
                    .read_input_registers(request.start, request.count)
                    .await
                    .map_err(|e| PollError::protocol_exception(e.to_string()))?;
                Ok(ReadResponse::Words(words))
            }
            RegisterKind::Coil => {
                let bits = context
                    .read_coils(request.start, request.count)
                    .await
                    .map_err(|e| PollError::protocol_exception(e.to_string()))?;
                Ok(ReadResponse::Bits(bits))
            }
            RegisterKind::Discrete => {
                let bits = context
                    .read_discrete_inputs(request.start, request.count)
                    .await
                    .map_err(|e| PollError::protocol_exception(e.to_string()))?;
                Ok(ReadResponse::Bits(bits))
            }
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.context.is_some() {
            return Ok(());
        }
        debug!(addr = %self.addr, "connecting modbus tcp transport");
        let result = timeout(self.connect_timeout, tcp::connect(self.addr)).await;
        match result {
            Ok(Ok(context)) => {
                info!(addr = %self.addr, "modbus tcp transport connected");
                self.context = Some(context);
                Ok(())
            }
            Ok(Err(e)) => {
                error!(addr = %self.addr, error = %e, "modbus tcp connect failed");
                Err(PollError::connection_lost(format!("tcp connect {}: {e}", self.addr)))
            }
            Err(_) => {
                error!(addr = %self.addr, "modbus tcp connect timed out");
                Err(PollError::timeout(format!("tcp connect {}", self.addr)))
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.context.is_some() {
            debug!(addr = %self.addr, "closing modbus tcp transport");
            self.context = None;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.context.is_some()
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
        let context = self
            .context
            .as_mut()
            .ok_or_else(|| PollError::connection_lost("tcp transport not connected"))?;
        context.set_slave(Slave(unit));
        context
            .write_single_register(address, value)
            .await
            .map_err(|e| PollError::protocol_exception(e.to_string()))
    }

    async fn write_coil(&mut self, unit: u8, address: u16, value: bool) -> Result<()> {
        let context = self
            .context
            .as_mut()
            .ok_or_else(|| PollError::connection_lost("tcp transport not connected"))?;
        context.set_slave(Slave(unit));
        context
            .write_single_coil(address, value)
            .await
            .map_err(|e| PollError::protocol_exception(e.to_string()))
    }
}
