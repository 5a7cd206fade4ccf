//! DBC spec sources
//!
//! Converts a Vector DBC file into message specs keyed by PGN. Only J1939
//! messages on extended IDs can be placed; a DBC lists one message per
//! arbitration ID, so the same PGN from a second source address is skipped.

use std::collections::HashSet;

use super::database::{ByteOrder, MessageSpec, SignalSpec};
use super::source::LoadedSpec;
use crate::protocol::{J1939Id, ARBITRATION_ID_MASK, STANDARD_ID_MASK};
use crate::types::{ConstructionError, SpecIssue, MAX_PAYLOAD_LEN};

/// Bit 31 of a DBC message ID marks an extended frame
const DBC_EXTENDED_FLAG: u32 = 0x8000_0000;

/// True if `text` reads as a DBC file rather than JSON
pub fn looks_like_dbc(text: &str) -> bool {
    text.trim_start().starts_with("VERSION")
        || text.lines().any(|line| line.trim_start().starts_with("BO_ "))
}

pub fn load(text: &str) -> Result<LoadedSpec, ConstructionError> {
    let dbc = can_dbc::DBC::from_slice(text.as_bytes()).map_err(|e| {
        ConstructionError::InvalidSpec(SpecIssue::source(format!("invalid DBC file: {:?}", e)))
    })?;

    let mut loaded = LoadedSpec::default();
    let mut seen = HashSet::new();

    for dbc_msg in dbc.messages() {
        let raw_id = dbc_msg.message_id().0;
        let id = raw_id & ARBITRATION_ID_MASK;
        let name = dbc_msg.message_name();

        if raw_id & DBC_EXTENDED_FLAG == 0 && id <= STANDARD_ID_MASK {
            log::warn!("DBC message '{}': standard id 0x{:03X} has no PGN, skipping", name, id);
            loaded.skipped_signals += dbc_msg.signals().len();
            continue;
        }

        let pgn = J1939Id::from_raw(id).pgn();
        if !seen.insert(pgn) {
            log::warn!(
                "DBC message '{}' (0x{:08X}): PGN {} already defined, skipping",
                name,
                id,
                pgn
            );
            loaded.skipped_signals += dbc_msg.signals().len();
            continue;
        }

        let (message, skipped) = convert_message(dbc_msg, pgn);
        loaded.skipped_signals += skipped;
        loaded.messages.push(message);
    }

    log::info!(
        "DBC converted: {} PGNs, {} signals skipped",
        loaded.messages.len(),
        loaded.skipped_signals
    );
    Ok(loaded)
}

fn convert_message(dbc_msg: &can_dbc::Message, pgn: u32) -> (MessageSpec, usize) {
    let mut signals = Vec::new();
    let mut skipped = 0;

    for dbc_sig in dbc_msg.signals() {
        match convert_signal(dbc_sig) {
            Ok(signal) => signals.push(signal),
            Err(reason) => {
                log::warn!("PGN {}: skipping signal '{}': {}", pgn, dbc_sig.name(), reason);
                skipped += 1;
            }
        }
    }

    let size = *dbc_msg.message_size();
    let message = MessageSpec {
        pgn,
        name: dbc_msg.message_name().to_string(),
        acronym: None,
        expected_length: usize::try_from(size).ok().filter(|s| *s <= MAX_PAYLOAD_LEN),
        signals,
    };
    (message, skipped)
}

fn convert_signal(dbc_sig: &can_dbc::Signal) -> Result<SignalSpec, String> {
    if !matches!(
        dbc_sig.multiplexer_indicator(),
        can_dbc::MultiplexIndicator::Plain | can_dbc::MultiplexIndicator::Multiplexor
    ) {
        return Err("multiplexed signal".to_string());
    }
    if matches!(dbc_sig.value_type(), can_dbc::ValueType::Signed) {
        return Err("signed values are not supported".to_string());
    }

    let start = *dbc_sig.start_bit();
    let (byte_order, start_bit) = match dbc_sig.byte_order() {
        can_dbc::ByteOrder::LittleEndian => (ByteOrder::LittleEndian, start),
        // DBC counts the Motorola start bit LSB=0 within its byte
        can_dbc::ByteOrder::BigEndian => (ByteOrder::BigEndian, (start / 8) * 8 + (7 - start % 8)),
    };

    let start_bit = u16::try_from(start_bit).map_err(|_| format!("start bit {} out of range", start))?;
    let bit_length = u16::try_from(*dbc_sig.signal_size())
        .map_err(|_| format!("length {} out of range", dbc_sig.signal_size()))?;

    Ok(SignalSpec {
        name: dbc_sig.name().to_string(),
        spn: None,
        start_bit,
        bit_length,
        byte_order,
        scale: *dbc_sig.factor(),
        offset: *dbc_sig.offset(),
        unit: if dbc_sig.unit().is_empty() {
            None
        } else {
            Some(dbc_sig.unit().to_string())
        },
        values: None,
    })
}
