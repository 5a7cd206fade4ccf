//! Spec database
//!
//! An immutable, indexed message catalog for one protocol. It is built once
//! from a spec source and then only read; the parser shares it between all
//! decode calls.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::types::{ConstructionError, SpecIssue};

/// Largest PGN representable with the data page bits (18 bits)
pub const MAX_PGN: u32 = 0x3_FFFF;

/// Number of bits in a classic CAN payload
pub const MAX_SIGNAL_BITS: u16 = 64;

/// A complete message (parameter group) definition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageSpec {
    pub pgn: u32,
    /// Message name
    pub name: String,
    /// Short label (J1939 acronym such as "CCVS")
    pub acronym: Option<String>,
    /// Expected payload size in bytes, if fixed
    pub expected_length: Option<usize>,
    /// All signals in this message, in definition order
    pub signals: Vec<SignalSpec>,
}

/// A signal (SPN) definition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalSpec {
    pub name: String,
    /// Suspect Parameter Number, when the source provides one
    pub spn: Option<u32>,
    /// Start bit in the payload (0-based)
    pub start_bit: u16,
    /// Length in bits
    pub bit_length: u16,
    pub byte_order: ByteOrder,
    /// Scale factor to convert raw value to physical value
    pub scale: f64,
    /// Offset to add after scaling
    pub offset: f64,
    /// Engineering unit (e.g., "km/h", "°C", "V")
    pub unit: Option<String>,
    /// Enumeration table (raw_value -> label)
    pub values: Option<BTreeMap<u64, String>>,
}

/// Byte order for signal extraction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    /// Least-significant byte first (Intel format, J1939 default)
    #[default]
    #[serde(alias = "lsb_first", alias = "intel")]
    LittleEndian,
    /// Most-significant byte first (Motorola format)
    #[serde(alias = "msb_first", alias = "motorola")]
    BigEndian,
}

impl SignalSpec {
    /// First bit past the end of the signal
    pub fn end_bit(&self) -> usize {
        self.start_bit as usize + self.bit_length as usize
    }

    pub fn has_enumeration(&self) -> bool {
        self.values.is_some()
    }

    pub fn label_for(&self, raw: u64) -> Option<&str> {
        self.values.as_ref()?.get(&raw).map(String::as_str)
    }

    fn validate(&self, pgn: u32) -> Result<(), SpecIssue> {
        if self.name.trim().is_empty() {
            return Err(SpecIssue::message(pgn, "signal with an empty name"));
        }
        if self.bit_length == 0 || self.bit_length > MAX_SIGNAL_BITS {
            return Err(SpecIssue::signal(
                pgn,
                &self.name,
                format!("bit length {} is outside 1..=64", self.bit_length),
            ));
        }
        if self.end_bit() > MAX_SIGNAL_BITS as usize {
            return Err(SpecIssue::signal(
                pgn,
                &self.name,
                format!(
                    "bits {}..{} exceed the 64-bit payload",
                    self.start_bit,
                    self.end_bit()
                ),
            ));
        }
        if !self.scale.is_finite() || !self.offset.is_finite() {
            return Err(SpecIssue::signal(pgn, &self.name, "scale and offset must be finite"));
        }
        Ok(())
    }
}

impl MessageSpec {
    fn validate(&self) -> Result<(), SpecIssue> {
        if self.pgn > MAX_PGN {
            return Err(SpecIssue::message(
                self.pgn,
                format!("PGN exceeds the 18-bit maximum 0x{:X}", MAX_PGN),
            ));
        }
        if let Some(length) = self.expected_length {
            if length > crate::types::MAX_PAYLOAD_LEN {
                return Err(SpecIssue::message(
                    self.pgn,
                    format!("expected length {} exceeds 8 bytes", length),
                ));
            }
        }
        let mut names = HashSet::new();
        for signal in &self.signals {
            signal.validate(self.pgn)?;
            if !names.insert(signal.name.as_str()) {
                return Err(SpecIssue::signal(self.pgn, &signal.name, "duplicate signal name"));
            }
        }
        Ok(())
    }
}

/// The message catalog of one protocol
#[derive(Debug, Clone, Default)]
pub struct SpecDatabase {
    /// All message definitions by PGN
    messages: HashMap<u32, MessageSpec>,

    /// Signal name lookup for quick access
    /// Key: Signal name, Value: PGNs defining a signal with that name
    signal_lookup: HashMap<String, Vec<u32>>,

    /// Source entries that cannot be decoded from a single frame
    skipped_signals: usize,
}

impl SpecDatabase {
    /// Build a database from spec source text, picking the layout by content
    pub fn from_source(text: &str) -> Result<Self, ConstructionError> {
        let loaded = super::source::load(text)?;
        Self::from_messages(loaded.messages, loaded.skipped_signals)
    }

    /// Build a database from already converted messages, validating them
    pub fn from_messages(
        messages: Vec<MessageSpec>,
        skipped_signals: usize,
    ) -> Result<Self, ConstructionError> {
        let mut db = Self {
            messages: HashMap::with_capacity(messages.len()),
            signal_lookup: HashMap::new(),
            skipped_signals,
        };

        for message in messages {
            message.validate().map_err(ConstructionError::InvalidSpec)?;
            if db.messages.contains_key(&message.pgn) {
                return Err(ConstructionError::InvalidSpec(SpecIssue::message(
                    message.pgn,
                    "duplicate PGN",
                )));
            }

            for signal in &message.signals {
                db.signal_lookup
                    .entry(signal.name.clone())
                    .or_default()
                    .push(message.pgn);
            }
            db.messages.insert(message.pgn, message);
        }

        log::debug!(
            "Spec database built: {} messages, {} skipped signals",
            db.messages.len(),
            db.skipped_signals
        );
        Ok(db)
    }

    /// Get the message definition for a PGN; `None` means unknown message
    pub fn get(&self, pgn: u32) -> Option<&MessageSpec> {
        self.messages.get(&pgn)
    }

    pub fn contains(&self, pgn: u32) -> bool {
        self.messages.contains_key(&pgn)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Find all messages containing a specific signal name
    pub fn find_signal(&self, signal_name: &str) -> Vec<(u32, &SignalSpec)> {
        let mut found: Vec<(u32, &SignalSpec)> = self
            .signal_lookup
            .get(signal_name)
            .map(|pgns| {
                pgns.iter()
                    .filter_map(|pgn| {
                        self.get(*pgn)
                            .and_then(|msg| msg.signals.iter().find(|s| s.name == signal_name))
                            .map(|sig| (*pgn, sig))
                    })
                    .collect()
            })
            .unwrap_or_default();
        found.sort_by_key(|(pgn, _)| *pgn);
        found
    }

    /// Get all PGNs in the database, sorted
    pub fn pgns(&self) -> Vec<u32> {
        let mut pgns: Vec<u32> = self.messages.keys().copied().collect();
        pgns.sort_unstable();
        pgns
    }

    /// Get database statistics
    pub fn stats(&self) -> DatabaseStats {
        DatabaseStats {
            num_messages: self.messages.len(),
            num_signals: self.messages.values().map(|m| m.signals.len()).sum(),
            skipped_signals: self.skipped_signals,
        }
    }
}

/// Database statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DatabaseStats {
    /// Total number of message definitions
    pub num_messages: usize,
    /// Total number of signal definitions
    pub num_signals: usize,
    /// Source signals left out because no fixed frame layout exists for them
    pub skipped_signals: usize,
}

impl std::ops::AddAssign for DatabaseStats {
    fn add_assign(&mut self, other: Self) {
        self.num_messages += other.num_messages;
        self.num_signals += other.num_signals;
        self.skipped_signals += other.skipped_signals;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_speed() -> SignalSpec {
        SignalSpec {
            name: "EngineSpeed".to_string(),
            spn: Some(190),
            start_bit: 24,
            bit_length: 16,
            byte_order: ByteOrder::LittleEndian,
            scale: 0.125,
            offset: 0.0,
            unit: Some("rpm".to_string()),
            values: None,
        }
    }

    fn eec1(signals: Vec<SignalSpec>) -> MessageSpec {
        MessageSpec {
            pgn: 61444,
            name: "Electronic Engine Controller 1".to_string(),
            acronym: Some("EEC1".to_string()),
            expected_length: Some(8),
            signals,
        }
    }

    #[test]
    fn test_empty_database() {
        let db = SpecDatabase::default();
        assert!(db.is_empty());
        assert_eq!(db.stats(), DatabaseStats::default());
        assert!(db.get(61444).is_none());
    }

    #[test]
    fn test_add_message() {
        let db = SpecDatabase::from_messages(vec![eec1(vec![engine_speed()])], 0).unwrap();

        let stats = db.stats();
        assert_eq!(stats.num_messages, 1);
        assert_eq!(stats.num_signals, 1);

        // Test retrieval
        let msg = db.get(61444).unwrap();
        assert_eq!(msg.acronym.as_deref(), Some("EEC1"));
        assert_eq!(msg.signals[0].name, "EngineSpeed");

        // Test signal lookup
        let found = db.find_signal("EngineSpeed");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, 61444);
        assert_eq!(db.pgns(), vec![61444]);
    }

    #[test]
    fn test_duplicate_pgn_rejected() {
        let err = SpecDatabase::from_messages(vec![eec1(vec![]), eec1(vec![])], 0).unwrap_err();
        match err {
            ConstructionError::InvalidSpec(issue) => assert_eq!(issue.pgn.as_deref(), Some("61444")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_signal_past_payload_rejected() {
        let mut signal = engine_speed();
        signal.start_bit = 56;
        let err = SpecDatabase::from_messages(vec![eec1(vec![signal])], 0).unwrap_err();
        match err {
            ConstructionError::InvalidSpec(issue) => {
                assert_eq!(issue.signal.as_deref(), Some("EngineSpeed"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_signal_name_rejected() {
        let result = SpecDatabase::from_messages(vec![eec1(vec![engine_speed(), engine_speed()])], 0);
        assert!(matches!(result, Err(ConstructionError::InvalidSpec(_))));
    }

    #[test]
    fn test_enumeration_lookup() {
        let mut signal = engine_speed();
        signal.values = Some(BTreeMap::from([(0, "Off".to_string()), (1, "On".to_string())]));
        assert!(signal.has_enumeration());
        assert_eq!(signal.label_for(1), Some("On"));
        assert_eq!(signal.label_for(2), None);
    }
}
