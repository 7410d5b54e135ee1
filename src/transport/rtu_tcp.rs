//! RTU-over-TCP transport: RTU framing (address + PDU + CRC-16) carried
//! directly over a TCP socket, with no MBAP header. Used for serial
//! gateways that bridge a Modbus RTU bus onto a TCP port without
//! translating to true Modbus TCP framing.
//!
//! Grounded on `ModbusTcpClient` (protocols/modbus/tcp.rs) for the
//! connect/timeout/logging shape, and on `tokio_modbus::client::rtu` for
//! attaching an RTU codec to an arbitrary async byte stream — here a
//! `TcpStream` rather than a serial port.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_modbus::client::{rtu, Context, Reader, Writer};
use tokio_modbus::slave::{Slave, SlaveContext};
use tracing::{debug, error, info};

use crate::error::{PollError, Result};

use super::{ReadRequest, ReadResponse, Transport};
use crate::config::RegisterKind;

#[derive(Debug)]
pub struct RtuOverTcpTransport {
    addr: SocketAddr,
    connect_timeout: Duration,
    context: Option<Context>,
}

impl RtuOverTcpTransport {
    pub fn new(host: &str, port: u16, connect_timeout: Duration) -> Result<Self> {
        let addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|e| PollError::config_invalid(format!("invalid RTU-over-TCP address {host}:{port}: {e}")))?;
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
            .ok_or_else(|| PollError::connection_lost("rtu-over-tcp transport not connected"))?;
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
impl Transport for RtuOverTcpTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.context.is_some() {
            return Ok(());
        }
        debug!(addr = %self.addr, "connecting rtu-over-tcp transport");
        let result = timeout(self.connect_timeout, TcpStream::connect(self.addr)).await;
        let stream = match result {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                error!(addr = %self.addr, error = %e, "rtu-over-tcp connect failed");
                return Err(PollError::connection_lost(format!("rtu-over-tcp connect {}: {e}", self.addr)));
            }
            Err(_) => {
                error!(addr = %self.addr, "rtu-over-tcp connect timed out");
                return Err(PollError::timeout(format!("rtu-over-tcp connect {}", self.addr)));
            }
        };
        // Slave is reassigned per call via `set_slave`; 1 is a placeholder
        // that attach_slave requires up front.
        let context = rtu::attach_slave(stream, Slave(1));
        info!(addr = %self.addr, "rtu-over-tcp transport connected");
        self.context = Some(context);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.context.is_some() {
            debug!(addr = %self.addr, "closing rtu-over-tcp transport");
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
            .ok_or_else(|| PollError::connection_lost("rtu-over-tcp transport not connected"))?;
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
            .ok_or_else(|| PollError::connection_lost("rtu-over-tcp transport not connected"))?;
        context.set_slave(Slave(unit));
        context
            .write_single_coil(address, value)
            .await
            .map_err(|e| PollError::protocol_exception(e.to_string()))
    }
}
