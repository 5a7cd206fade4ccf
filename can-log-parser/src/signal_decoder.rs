//! Signal Decoding Engine
//!
//! Extracts signal values from frame payloads based on the signal
//! definitions of the spec database. Handles bit extraction, byte order,
//! physical value conversion and enumeration labels.

use crate::spec::{ByteOrder, MessageSpec, SignalSpec};
use crate::types::{DecodedSignal, ParseIssue, SignalValue};

/// The payload is too short for a signal's bit range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortPayload {
    pub needed_bits: usize,
    pub available_bits: usize,
}

/// Signals of one message, plus the problems met while decoding them
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MessageSignals {
    pub signals: Vec<DecodedSignal>,
    pub issues: Vec<ParseIssue>,
}

/// Message decoder - extracts signals from frame payloads
pub struct MessageDecoder;

impl MessageDecoder {
    /// Decode every signal of `message` from `payload`
    ///
    /// Signals are independent: one that does not fit the payload is
    /// reported as `PayloadTooShort` and the rest are still decoded.
    /// `line` is only used to label the issues.
    pub fn decode_message(payload: &[u8], message: &MessageSpec, line: usize) -> MessageSignals {
        let mut out = MessageSignals::default();

        for signal in &message.signals {
            match Self::decode_signal(payload, signal) {
                Ok(decoded) => {
                    if signal.has_enumeration() && decoded.value.as_label().is_none() {
                        out.issues.push(ParseIssue::UnmappedEnumValue {
                            line,
                            pgn: message.pgn,
                            signal: signal.name.clone(),
                            raw: decoded.raw_value,
                        });
                    }
                    out.signals.push(decoded);
                }
                Err(short) => out.issues.push(ParseIssue::PayloadTooShort {
                    line,
                    pgn: message.pgn,
                    signal: signal.name.clone(),
                    needed_bits: short.needed_bits,
                    available_bits: short.available_bits,
                }),
            }
        }

        out
    }

    /// Decode a single signal from payload data
    pub fn decode_signal(payload: &[u8], signal: &SignalSpec) -> Result<DecodedSignal, ShortPayload> {
        let raw_value = Self::extract_raw(payload, signal)?;

        let value = match signal.label_for(raw_value) {
            Some(label) => SignalValue::Label(label.to_string()),
            None => Self::physical_value(signal, raw_value),
        };

        Ok(DecodedSignal {
            name: signal.name.clone(),
            value,
            unit: signal.unit.clone(),
            raw_value,
        })
    }

    /// `raw * scale + offset`; an unscaled signal stays an integer
    pub fn physical_value(signal: &SignalSpec, raw_value: u64) -> SignalValue {
        if signal.scale == 1.0 && signal.offset == 0.0 {
            SignalValue::Integer(raw_value)
        } else {
            SignalValue::Float(raw_value as f64 * signal.scale + signal.offset)
        }
    }

    /// Extract the raw unsigned value of a signal
    pub fn extract_raw(payload: &[u8], signal: &SignalSpec) -> Result<u64, ShortPayload> {
        let start_bit = signal.start_bit as usize;
        let length = signal.bit_length as usize;
        Self::check_fits(payload, signal)?;

        Ok(match signal.byte_order {
            ByteOrder::LittleEndian => Self::extract_little_endian(payload, start_bit, length),
            ByteOrder::BigEndian => Self::extract_big_endian(payload, start_bit, length),
        })
    }

    /// Write `raw` into `payload` with the same layout rules as extraction
    ///
    /// Bits of `raw` above the signal length are discarded.
    pub fn encode_raw(payload: &mut [u8], signal: &SignalSpec, raw: u64) -> Result<(), ShortPayload> {
        Self::check_fits(payload, signal)?;
        let start_bit = signal.start_bit as usize;
        let length = signal.bit_length as usize;

        for i in 0..length {
            let (bit_pos, value_bit) = match signal.byte_order {
                ByteOrder::LittleEndian => (start_bit + i, i),
                ByteOrder::BigEndian => (start_bit + i, length - 1 - i),
            };
            let byte_idx = bit_pos / 8;
            let bit_in_byte = match signal.byte_order {
                ByteOrder::LittleEndian => bit_pos % 8,
                ByteOrder::BigEndian => 7 - (bit_pos % 8),
            };

            let mask = 1u8 << bit_in_byte;
            if (raw >> value_bit) & 0x01 == 1 {
                payload[byte_idx] |= mask;
            } else {
                payload[byte_idx] &= !mask;
            }
        }

        Ok(())
    }

    fn check_fits(payload: &[u8], signal: &SignalSpec) -> Result<(), ShortPayload> {
        let needed_bits = signal.end_bit();
        let available_bits = payload.len() * 8;
        if needed_bits > available_bits {
            return Err(ShortPayload {
                needed_bits,
                available_bits,
            });
        }
        Ok(())
    }

    /// Extract signal with little-endian (Intel) bit order
    ///
    /// - Start bit points to the LSB of the value
    /// - Payload bit `p` is bit `p % 8` of byte `p / 8`
    /// - The value grows towards higher-numbered bytes
    fn extract_little_endian(data: &[u8], start_bit: usize, length: usize) -> u64 {
        let mut result: u64 = 0;

        for i in 0..length {
            let bit_pos = start_bit + i;
            let byte_idx = bit_pos / 8;
            let bit_in_byte = bit_pos % 8;

            let bit_value = (data[byte_idx] >> bit_in_byte) & 0x01;
            result |= (bit_value as u64) << i;
        }

        result
    }

    /// Extract signal with big-endian (Motorola) bit order
    ///
    /// - Start bit points to the MSB of the value
    /// - Payload bit `p` is bit `7 - p % 8` of byte `p / 8`
    fn extract_big_endian(data: &[u8], start_bit: usize, length: usize) -> u64 {
        let mut result: u64 = 0;

        for i in 0..length {
            let bit_pos = start_bit + i;
            let byte_idx = bit_pos / 8;
            let bit_in_byte = 7 - (bit_pos % 8);

            let bit_value = (data[byte_idx] >> bit_in_byte) & 0x01;
            result |= (bit_value as u64) << (length - 1 - i);
        }

        result
    }
}
