//! Numeric Decoder — turns raw Modbus words into typed, scaled values.
//!
//! Grounded on the byte-order handling in `parse_modbus_value`
//! (modbus_polling.rs), generalized to cover every `DataType` and to keep
//! the pre-reorder raw words alongside the decoded value.

use crate::config::{ByteOrder, DataType};
use crate::error::{PollError, Result};
use crate::sample::DecodedValue;

fn swap_u16(word: u16) -> u16 {
    word.rotate_left(8)
}

/// Decode a single 16-bit register into a signed/unsigned/bool value.
fn decode_16bit(word: u16, data_type: DataType, byte_order: ByteOrder) -> Result<(i64, u16)> {
    let effective = if byte_order == ByteOrder::Little {
        swap_u16(word)
    } else {
        word
    };

    let value = match data_type {
        DataType::Int16 => effective as i16 as i64,
        DataType::UInt16 => effective as i64,
        DataType::Bool => (effective != 0) as i64,
        DataType::Int32 | DataType::UInt32 | DataType::Float32 => {
            return Err(PollError::decode(format!(
                "{data_type:?} requires two registers, got one"
            )))
        }
    };
    Ok((value, word))
}

/// Decode a pair of 16-bit registers into a 32-bit signed/unsigned/float value.
///
/// `(w0, w1)` are the raw words exactly as read from the device, in address
/// order. Word order is applied first (selecting which word holds the high
/// half), then byte order is applied independently to each word before
/// composing the 32-bit big-endian pattern.
fn decode_32bit(
    w0: u16,
    w1: u16,
    data_type: DataType,
    byte_order: ByteOrder,
    word_order: ByteOrder,
) -> Result<(f64, (u16, u16))> {
    let (mut high, mut low) = if word_order == ByteOrder::Little {
        (w1, w0)
    } else {
        (w0, w1)
    };

    if byte_order == ByteOrder::Little {
        high = swap_u16(high);
        low = swap_u16(low);
    }

    let bits: u32 = ((high as u32) << 16) | (low as u32);

    let value = match data_type {
        DataType::Int32 => bits as i32 as f64,
        DataType::UInt32 => bits as f64,
        DataType::Float32 => f32::from_bits(bits) as f64,
        DataType::Int16 | DataType::UInt16 | DataType::Bool => {
            return Err(PollError::decode(format!(
                "{data_type:?} does not use two registers"
            )))
        }
    };
    Ok((value, (w0, w1)))
}

fn round_half_to_even(value: f64, precision: i32) -> f64 {
    if precision < 0 {
        return value;
    }
    let factor = 10f64.powi(precision);
    (value * factor).round_ties_even() / factor
}

/// Decode and scale one register's worth (or one 32-bit pair's worth) of
/// raw words per `config::RegisterConfig`'s semantics.
///
/// `words` must contain exactly 1 word for 16-bit/bool types or exactly 2
/// words (in address order) for 32-bit types, else `InsufficientWords` is
/// reported via `PollError::DecodeError`.
pub fn decode(
    words: &[u16],
    data_type: DataType,
    byte_order: ByteOrder,
    word_order: ByteOrder,
    scale: f64,
    offset: f64,
    precision: i32,
) -> Result<DecodedValue> {
    if data_type.is_32bit() {
        if words.len() < 2 {
            return Err(PollError::decode(format!(
                "insufficient words for {data_type:?}: need 2, got {}",
                words.len()
            )));
        }
        let (raw_value, raw_words) = decode_32bit(words[0], words[1], data_type, byte_order, word_order)?;
        let scaled = raw_value * scale + offset;
        let value = round_half_to_even(scaled, precision);
        return Ok(DecodedValue::numeric(value, data_type, raw_words.0, Some(raw_words.1)));
    }

    if words.is_empty() {
        return Err(PollError::decode("insufficient words: need 1, got 0"));
    }
    let (raw_value, raw_word) = decode_16bit(words[0], data_type, byte_order)?;

    if data_type == DataType::Bool {
        return Ok(DecodedValue::boolean(raw_value != 0, raw_word));
    }

    let scaled = raw_value as f64 * scale + offset;
    let value = round_half_to_even(scaled, precision);
    Ok(DecodedValue::numeric(value, data_type, raw_word, None))
}

#[cfg(test)]
mod tests {
    use super::*;

    // S1: float32, big-endian words/bytes, registers [0x4048, 0xF5C3], scale=1, offset=0, precision=3 -> 3.142
    #[test]
    fn s1_float_big_endian() {
        let result = decode(
            &[0x4048, 0xF5C3],
            DataType::Float32,
            ByteOrder::Big,
            ByteOrder::Big,
            1.0,
            0.0,
            3,
        )
        .unwrap();
        assert_eq!(result.as_f64().unwrap(), 3.142);
    }

    // S2: same value, word order little, registers [0xF5C3, 0x4048] -> 3.142
    #[test]
    fn s2_float_little_word_order() {
        let result = decode(
            &[0xF5C3, 0x4048],
            DataType::Float32,
            ByteOrder::Big,
            ByteOrder::Little,
            1.0,
            0.0,
            3,
        )
        .unwrap();
        assert_eq!(result.as_f64().unwrap(), 3.142);
    }

    // S3: int16 byte-swap, raw word 0x00FF, byteOrder little -> swap -> 0xFF00 -> -256;
    // scale=0.1, offset=0, precision=2 -> -25.60
    #[test]
    fn s3_int16_byte_swap() {
        let result = decode(
            &[0x00FF],
            DataType::Int16,
            ByteOrder::Little,
            ByteOrder::Big,
            0.1,
            0.0,
            2,
        )
        .unwrap();
        assert_eq!(result.as_f64().unwrap(), -25.6);
    }

    #[test]
    fn bool_is_not_scaled() {
        let result = decode(&[0x0001], DataType::Bool, ByteOrder::Big, ByteOrder::Big, 5.0, 1.0, 2)
            .unwrap();
        assert!(result.as_bool().unwrap());
    }

    #[test]
    fn insufficient_words_for_32bit_errors() {
        let result = decode(&[0x0001], DataType::Float32, ByteOrder::Big, ByteOrder::Big, 1.0, 0.0, 2);
        assert!(matches!(result, Err(PollError::DecodeError(_))));
    }

    #[test]
    fn raw_value_is_preserved_before_reordering() {
        let result = decode(
            &[0xF5C3, 0x4048],
            DataType::Float32,
            ByteOrder::Big,
            ByteOrder::Little,
            1.0,
            0.0,
            3,
        )
        .unwrap();
        assert_eq!(result.raw, (0xF5C3, Some(0x4048)));
    }
}
