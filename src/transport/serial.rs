//! Modbus RTU-serial transport.
//!
//! Grounded on `ModbusRtuClient::new`/`connect` (protocols/modbus/rtu.rs)
//! for the serial port builder and data/stop-bit/parity mapping, adapted
//! to the config surface's `Parity` enum and completed with a real
//! `rtu::attach_slave` call rather than the teacher's placeholder.

use std::time::Duration;

use async_trait::async_trait;
use tokio_modbus::client::{rtu, Context, Reader, Writer};
use tokio_modbus::slave::{Slave, SlaveContext};
use tokio_serial::SerialStream;
use tracing::{debug, error, info};

use crate::config::Parity;
use crate::error::{PollError, Result};

use super::{ReadRequest, ReadResponse, Transport};
use crate::config::RegisterKind;

#[derive(Debug)]
pub struct SerialTransport {
    device: String,
    baud_rate: u32,
    parity: Parity,
    stop_bits: u8,
    byte_size: u8,
    timeout: Duration,
    context: Option<Context>,
}

fn to_tokio_parity(parity: Parity) -> tokio_serial::Parity {
    match parity {
        Parity::N => tokio_serial::Parity::None,
        Parity::E => tokio_serial::Parity::Even,
        Parity::O => tokio_serial::Parity::Odd,
    }
}

fn to_tokio_stop_bits(stop_bits: u8) -> tokio_serial::StopBits {
    match stop_bits {
        2 => tokio_serial::StopBits::Two,
        _ => tokio_serial::StopBits::One,
    }
}

fn to_tokio_data_bits(byte_size: u8) -> tokio_serial::DataBits {
    match byte_size {
        5 => tokio_serial::DataBits::Five,
        6 => tokio_serial::DataBits::Six,
        7 => tokio_serial::DataBits::Seven,
        _ => tokio_serial::DataBits::Eight,
    }
}

impl SerialTransport {
    pub fn new(
        device: impl Into<String>,
        baud_rate: u32,
        parity: Parity,
        stop_bits: u8,
        byte_size: u8,
        timeout: Duration,
    ) -> Self {
        Self {
            device: device.into(),
            baud_rate,
            parity,
            stop_bits,
            byte_size,
            timeout,
            context: None,
        }
    }

    async fn read_block_single(&mut self, request: ReadRequest) -> Result<ReadResponse> {
        let context = self
            .context
            .as_mut()
            .ok_or_else(|| PollError::connection_lost("serial transport not connected"))?;
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
impl Transport for SerialTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.context.is_some() {
            return Ok(());
        }
        debug!(device = %self.device, baud = self.baud_rate, "opening modbus rtu serial port");

        let builder = tokio_serial::new(&self.device, self.baud_rate)
            .data_bits(to_tokio_data_bits(self.byte_size))
            .stop_bits(to_tokio_stop_bits(self.stop_bits))
            .parity(to_tokio_parity(self.parity))
            .timeout(self.timeout);

        let stream = SerialStream::open(&builder).map_err(|e| {
            error!(device = %self.device, error = %e, "failed to open serial port");
            PollError::connection_lost(format!("open serial port {}: {e}", self.device))
        })?;

        // Slave is reassigned per call via `set_slave`; 1 is a placeholder
        // that attach_slave requires up front.
        let context = rtu::attach_slave(stream, Slave(1));
        info!(device = %self.device, "modbus rtu serial port connected");
        self.context = Some(context);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.context.is_some() {
            debug!(device = %self.device, "closing modbus rtu serial port");
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
            .ok_or_else(|| PollError::connection_lost("serial transport not connected"))?;
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
            .ok_or_else(|| PollError::connection_lost("serial transport not connected"))?;
        context.set_slave(Slave(unit));
        context
            .write_single_coil(address, value)
            .await
            .map_err(|e| PollError::protocol_exception(e.to_string()))
    }
}
