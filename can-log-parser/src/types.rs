//! Core types for the CAN log parser library
//!
//! This module defines the frames the parser produces and the errors it reports.
//! A [`RawFrame`] is what the line matcher extracts from one text line; a
//! [`DecodedFrame`] is what the orchestrator emits after addressing and signal
//! decoding.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;

/// Timestamp type used when converting log times to wall-clock time
pub type Timestamp = DateTime<Utc>;

/// Result type for parser operations
pub type Result<T> = std::result::Result<T, ParserError>;

/// Largest payload a classic CAN frame can carry
pub const MAX_PAYLOAD_LEN: usize = 8;

/// Raw CAN frame extracted from one log line
///
/// This represents a single frame as written in the log, before any
/// addressing or signal interpretation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    /// Timestamp in seconds, as written in the log
    pub timestamp: f64,
    /// Arbitration ID (at most 29 bits)
    pub arbitration_id: u32,
    /// True for 29-bit extended IDs, false for 11-bit standard IDs
    pub extended: bool,
    /// Frame data bytes (0-8 bytes)
    pub payload: Vec<u8>,
}

impl RawFrame {
    /// Get the data length code (DLC) - number of data bytes
    pub fn dlc(&self) -> usize {
        self.payload.len()
    }

    /// Number of payload bits available to signals
    pub fn bit_len(&self) -> usize {
        self.payload.len() * 8
    }
}

/// A content problem found while parsing one line
///
/// Every variant carries the 1-based line number it was found on. Whether an
/// issue is dropped, recorded, or aborts the parse is decided by the
/// [`ErrorPolicy`](crate::ErrorPolicy).
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind")]
pub enum ParseIssue {
    #[error("line {line}: does not match the line pattern")]
    UnmatchedLine { line: usize },

    #[error("line {line}: malformed frame: {reason}")]
    MalformedFrame { line: usize, reason: String },

    #[error("line {line}: signal '{signal}' of PGN {pgn} needs {needed_bits} payload bits but only {available_bits} are present")]
    PayloadTooShort {
        line: usize,
        pgn: u32,
        signal: String,
        needed_bits: usize,
        available_bits: usize,
    },

    #[error("line {line}: signal '{signal}' of PGN {pgn} has raw value {raw} with no enumeration label")]
    UnmappedEnumValue {
        line: usize,
        pgn: u32,
        signal: String,
        raw: u64,
    },

    #[error("line {line}: PGN {pgn} (0x{pgn:04X}) is not defined by any loaded spec")]
    UnknownMessage { line: usize, pgn: u32 },

    #[error("line {line}: PGN {pgn} expects {expected} data bytes but the frame carries {actual}")]
    LengthMismatch {
        line: usize,
        pgn: u32,
        expected: usize,
        actual: usize,
    },

    #[error("line {line}: standard id 0x{arbitration_id:03X} carries no J1939 addressing")]
    StandardFrame { line: usize, arbitration_id: u32 },
}

/// Discriminant of a [`ParseIssue`], handy for matching without fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum IssueKind {
    UnmatchedLine,
    MalformedFrame,
    PayloadTooShort,
    UnmappedEnumValue,
    UnknownMessage,
    LengthMismatch,
    StandardFrame,
}

impl ParseIssue {
    /// The line this issue was found on (1-based)
    pub fn line(&self) -> usize {
        match self {
            ParseIssue::UnmatchedLine { line }
            | ParseIssue::MalformedFrame { line, .. }
            | ParseIssue::PayloadTooShort { line, .. }
            | ParseIssue::UnmappedEnumValue { line, .. }
            | ParseIssue::UnknownMessage { line, .. }
            | ParseIssue::LengthMismatch { line, .. }
            | ParseIssue::StandardFrame { line, .. } => *line,
        }
    }

    pub fn kind(&self) -> IssueKind {
        match self {
            ParseIssue::UnmatchedLine { .. } => IssueKind::UnmatchedLine,
            ParseIssue::MalformedFrame { .. } => IssueKind::MalformedFrame,
            ParseIssue::PayloadTooShort { .. } => IssueKind::PayloadTooShort,
            ParseIssue::UnmappedEnumValue { .. } => IssueKind::UnmappedEnumValue,
            ParseIssue::UnknownMessage { .. } => IssueKind::UnknownMessage,
            ParseIssue::LengthMismatch { .. } => IssueKind::LengthMismatch,
            ParseIssue::StandardFrame { .. } => IssueKind::StandardFrame,
        }
    }

    /// Informational issues never abort a parse, whatever the policy
    pub fn is_informational(&self) -> bool {
        matches!(
            self.kind(),
            IssueKind::UnmappedEnumValue
                | IssueKind::UnknownMessage
                | IssueKind::LengthMismatch
                | IssueKind::StandardFrame
        )
    }

    /// Name of the signal involved, for signal-level issues
    pub fn signal(&self) -> Option<&str> {
        match self {
            ParseIssue::PayloadTooShort { signal, .. }
            | ParseIssue::UnmappedEnumValue { signal, .. } => Some(signal),
            _ => None,
        }
    }
}

/// Where in a spec source a validation problem was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecIssue {
    /// PGN key as written in the source (may not be numeric)
    pub pgn: Option<String>,
    /// Signal name, for signal-level problems
    pub signal: Option<String>,
    pub reason: String,
}

impl SpecIssue {
    pub fn source(reason: impl Into<String>) -> Self {
        Self {
            pgn: None,
            signal: None,
            reason: reason.into(),
        }
    }

    pub fn message(pgn: impl ToString, reason: impl Into<String>) -> Self {
        Self {
            pgn: Some(pgn.to_string()),
            signal: None,
            reason: reason.into(),
        }
    }

    pub fn signal(pgn: impl ToString, signal: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            pgn: Some(pgn.to_string()),
            signal: Some(signal.into()),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for SpecIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.pgn, &self.signal) {
            (Some(pgn), Some(signal)) => write!(f, "PGN {}, signal '{}': {}", pgn, signal, self.reason),
            (Some(pgn), None) => write!(f, "PGN {}: {}", pgn, self.reason),
            _ => write!(f, "{}", self.reason),
        }
    }
}

/// Errors raised while building a parser; never gated by the error policy
#[derive(Debug, thiserror::Error)]
pub enum ConstructionError {
    #[error("Invalid line pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Line pattern is missing the named capture group '{0}'")]
    MissingCapture(&'static str),

    #[error("Invalid spec: {0}")]
    InvalidSpec(SpecIssue),

    #[error("Unknown spec type: {0}")]
    UnknownSpecType(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Errors surfaced to callers of the parser
#[derive(Debug, thiserror::Error)]
pub enum ParserError {
    #[error(transparent)]
    Construction(#[from] ConstructionError),

    /// First failure under the `Fail` policy
    #[error("Parse aborted: {0}")]
    Aborted(ParseIssue),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl From<ParseIssue> for ParserError {
    fn from(issue: ParseIssue) -> Self {
        ParserError::Aborted(issue)
    }
}

impl ParserError {
    /// The issue that stopped the parse, if this is a policy abort
    pub fn issue(&self) -> Option<&ParseIssue> {
        match self {
            ParserError::Aborted(issue) => Some(issue),
            _ => None,
        }
    }
}

/// A fully decoded frame - the primary output of the parser
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedFrame {
    /// 1-based line number in the input
    pub line: usize,
    /// Timestamp in seconds, as written in the log
    pub timestamp: f64,
    #[serde(serialize_with = "serialize_id")]
    pub arbitration_id: u32,
    /// False for 11-bit standard frames; their J1939 fields are all zero
    pub extended: bool,
    pub priority: u8,
    pub pgn: u32,
    pub source_address: u8,
    /// Present only for PDU1 (destination-specific) PGNs
    pub destination_address: Option<u8>,
    /// Message name from the spec, `None` for unknown PGNs
    pub message_name: Option<String>,
    #[serde(serialize_with = "serialize_payload")]
    pub payload: Vec<u8>,
    /// Decoded signals, in spec order
    pub signals: Vec<DecodedSignal>,
    /// Warnings attached to this frame
    pub warnings: Vec<ParseIssue>,
}

impl DecodedFrame {
    /// Convert the log timestamp (seconds since the Unix epoch) to a DateTime
    pub fn datetime(&self) -> Option<Timestamp> {
        if !self.timestamp.is_finite() || self.timestamp < 0.0 {
            return None;
        }
        let secs = self.timestamp.trunc() as i64;
        let nsecs = ((self.timestamp.fract() * 1_000_000_000.0).round() as u32).min(999_999_999);
        DateTime::from_timestamp(secs, nsecs)
    }

    /// True if the PGN was found in a loaded spec
    pub fn is_known(&self) -> bool {
        self.message_name.is_some()
    }

    /// Look up a decoded signal by name
    pub fn signal(&self, name: &str) -> Option<&DecodedSignal> {
        self.signals.iter().find(|s| s.name == name)
    }

    /// Look up a decoded signal value by name
    pub fn value(&self, name: &str) -> Option<&SignalValue> {
        self.signal(name).map(|s| &s.value)
    }
}

/// A decoded signal with its value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedSignal {
    pub name: String,
    pub value: SignalValue,
    /// Engineering unit (e.g., "km/h", "°C", "V")
    pub unit: Option<String>,
    /// Raw value before scaling (useful for debugging)
    pub raw_value: u64,
}

/// Signal value types produced by the decoder
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SignalValue {
    /// Unscaled integer value (scale 1, offset 0)
    Integer(u64),
    /// Floating-point value (after scaling/offset)
    Float(f64),
    /// Label from the signal's enumeration table
    Label(String),
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Integer(v) => write!(f, "{}", v),
            SignalValue::Float(v) => write!(f, "{:.3}", v),
            SignalValue::Label(v) => write!(f, "{}", v),
        }
    }
}

impl SignalValue {
    /// Numeric view of the value; `None` for labels
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SignalValue::Integer(v) => Some(*v as f64),
            SignalValue::Float(v) => Some(*v),
            SignalValue::Label(_) => None,
        }
    }

    pub fn as_label(&self) -> Option<&str> {
        match self {
            SignalValue::Label(v) => Some(v),
            _ => None,
        }
    }
}

fn serialize_id<S>(id: &u32, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format!("{:08X}", id))
}

fn serialize_payload<S>(payload: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&hex::encode_upper(payload))
}
