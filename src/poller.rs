//! Device Poller — reads one device's planned blocks and decodes them
//! into a `Sample`, applying the partial-failure policy: a block that
//! fails to read drops only the registers it would have covered, the
//! cycle still returns whatever other blocks succeeded.
//!
//! Grounded on `poll_device`/`process_register_block` (port_manager.py)
//! for the per-block read-then-decode loop and on `ModbusClientBase`'s
//! timeout wrapping (protocols/modbus/client.rs, referenced via tcp.rs)
//! for bounding each block read at the device's configured timeout.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::warn;

use crate::coalescer::{plan_blocks, Block};
use crate::config::{ByteOrder, DataType, DeviceConfig, RegisterConfig, RegisterKind};
use crate::error::{PollError, Result};
use crate::sample::{register_key, DecodedValue, DeviceStatus, Sample};
use crate::transport::{ReadRequest, ReadResponse, Transport};

/// Per-port defaults a device's registers fall back to when they don't
/// specify their own byte/word order.
#[derive(Debug, Clone, Copy)]
pub struct PortDefaults {
    pub byte_order: ByteOrder,
    pub word_order: ByteOrder,
}

/// Read and decode every register of `device` in one poll cycle.
///
/// A block that fails to read only drops the registers it would have
/// covered; the cycle still decodes whatever other blocks succeeded. If,
/// after every planned block has been attempted, not a single register was
/// decoded — every block failed, every decode attempt failed, or the
/// device has no registers to begin with — the cycle as a whole is a
/// failure: this returns `Err(PollError::NoData)` rather than an empty
/// `Sample`, since a `Sample` with no registers is not a valid decoded
/// device reading.
pub async fn poll_once(
    transport: &mut dyn Transport,
    device: &DeviceConfig,
    port_name: &str,
    defaults: PortDefaults,
) -> Result<Sample> {
    let started = Instant::now();
    let plan = plan_blocks(&device.registers);

    let mut registers = HashMap::new();

    for (kind, blocks) in &plan {
        for block in blocks {
            let request = ReadRequest {
                unit: device.unit_address,
                kind: *kind,
                start: block.start,
                count: block.count,
            };

            let read = tokio::time::timeout(
                Duration::from_millis(device.timeout_ms),
                transport.read_block(request),
            )
            .await;

            let response = match read {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    warn!(
                        device = %device.name, port = %port_name, kind = ?kind,
                        start = block.start, count = block.count, error = %e,
                        "block read failed, skipping its registers this cycle"
                    );
                    continue;
                }
                Err(_) => {
                    warn!(
                        device = %device.name, port = %port_name, kind = ?kind,
                        start = block.start, count = block.count,
                        "block read timed out, skipping its registers this cycle"
                    );
                    continue;
                }
            };

            decode_block_into(*kind, block, &response, &device.registers, defaults, &mut registers);
        }
    }

    if registers.is_empty() {
        return Err(PollError::no_data(format!(
            "device {device} on port {port_name} yielded no decodable registers this cycle",
            device = device.name
        )));
    }

    Ok(Sample {
        device_name: device.name.clone(),
        port_name: port_name.to_string(),
        captured_at: Utc::now(),
        registers,
        device_status: DeviceStatus::Online,
        poll_duration_ms: started.elapsed().as_millis() as u64,
    })
}

fn decode_block_into(
    kind: RegisterKind,
    block: &Block,
    response: &ReadResponse,
    all_registers: &[RegisterConfig],
    defaults: PortDefaults,
    out: &mut HashMap<String, DecodedValue>,
) {
    let block_end = block.start as u32 + block.count as u32;
    let covered = all_registers
        .iter()
        .filter(|r| r.kind == kind && r.address >= block.start && (r.end_address() as u32) < block_end);

    for reg in covered {
        let offset = (reg.address - block.start) as usize;
        let words: Vec<u16> = match response {
            ReadResponse::Words(words) => {
                if reg.data_type.is_32bit() {
                    match (words.get(offset), words.get(offset + 1)) {
                        (Some(&a), Some(&b)) => vec![a, b],
                        _ => continue,
                    }
                } else {
                    match words.get(offset) {
                        Some(&a) => vec![a],
                        None => continue,
                    }
                }
            }
            ReadResponse::Bits(bits) => match bits.get(offset) {
                Some(&b) => vec![b as u16],
                None => continue,
            },
        };

        let byte_order = reg.byte_order(defaults.byte_order);
        let word_order = reg.word_order(defaults.word_order);
        match crate::decoder::decode(
            &words,
            reg.data_type,
            byte_order,
            word_order,
            reg.scale,
            reg.offset,
            reg.precision,
        ) {
            Ok(value) => {
                let value = value.with_metadata(reg.unit.clone(), reg.name.clone());
                out.insert(register_key(kind, reg.address), value);
            }
            Err(e) => {
                warn!(register = %reg.name, error = %e, "decode error, register omitted from sample");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegisterKind;
    use crate::transport::mock::{MockTransport, MockTransportConfig};

    fn reg(kind: RegisterKind, address: u16, data_type: DataType) -> RegisterConfig {
        RegisterConfig {
            kind,
            address,
            name: format!("r{address}"),
            unit: String::new(),
            data_type,
            scale: 1.0,
            offset: 0.0,
            precision: 2,
            byte_order: None,
            word_order: None,
            read_only: true,
        }
    }

    fn defaults() -> PortDefaults {
        PortDefaults {
            byte_order: ByteOrder::Big,
            word_order: ByteOrder::Big,
        }
    }

    // S5: two blocks planned, one times out; cycle still returns the other.
    #[tokio::test]
    async fn partial_block_failure_keeps_successful_registers() {
        let mut transport = MockTransport::new(MockTransportConfig::default());
        transport.connect().await.unwrap();
        transport.set_register(RegisterKind::Holding, 10, 42).await;
        transport.set_register(RegisterKind::Holding, 20, 7).await;
        // first block read (address 10) succeeds, second (address 20) times out
        transport.queue_read_outcome(false).await;
        transport.queue_read_outcome(true).await;

        let device = DeviceConfig {
            name: "dev".into(),
            unit_address: 1,
            poll_interval_ms: 1000,
            timeout_ms: 200,
            enabled: true,
            registers: vec![
                reg(RegisterKind::Holding, 10, DataType::Int16),
                reg(RegisterKind::Holding, 20, DataType::Int16),
            ],
        };

        let sample = poll_once(&mut transport, &device, "port1", defaults()).await.unwrap();
        assert_eq!(sample.device_status, DeviceStatus::Online);
        assert_eq!(sample.registers.len(), 1);
        assert!(sample.registers.contains_key(&register_key(RegisterKind::Holding, 10)));
        assert!(!sample.registers.contains_key(&register_key(RegisterKind::Holding, 20)));
    }

    #[tokio::test]
    async fn all_blocks_failing_yields_no_data() {
        let mut transport = MockTransport::new(MockTransportConfig::default());
        transport.connect().await.unwrap();
        transport.queue_read_outcome(true).await;

        let device = DeviceConfig {
            name: "dev".into(),
            unit_address: 1,
            poll_interval_ms: 1000,
            timeout_ms: 200,
            enabled: true,
            registers: vec![reg(RegisterKind::Holding, 10, DataType::Int16)],
        };

        let err = poll_once(&mut transport, &device, "port1", defaults()).await.unwrap_err();
        assert!(matches!(err, PollError::NoData(_)));
    }

    #[tokio::test]
    async fn device_with_no_registers_yields_no_data() {
        let mut transport = MockTransport::new(MockTransportConfig::default());
        transport.connect().await.unwrap();

        let device = DeviceConfig {
            name: "dev".into(),
            unit_address: 1,
            poll_interval_ms: 1000,
            timeout_ms: 200,
            enabled: true,
            registers: vec![],
        };

        let err = poll_once(&mut transport, &device, "port1", defaults()).await.unwrap_err();
        assert!(matches!(err, PollError::NoData(_)));
    }
}
