//! Line pattern matching
//!
//! Turns one text line into a [`RawFrame`]. The line format is data: any
//! matcher that can hand back three named captures (`timestamp`, `id`,
//! `data`) works. The default matcher compiles a regular expression once and
//! reuses it for every line.
//!
//! Example candump line:
//!
//! ```text
//! (1469439874.299654) can1 18FEF100#0102030405060708
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::protocol::{ARBITRATION_ID_MASK, STANDARD_ID_DIGITS, STANDARD_ID_MASK};
use crate::types::{ConstructionError, ParseIssue, RawFrame, MAX_PAYLOAD_LEN};

pub const TIMESTAMP_CAPTURE: &str = "timestamp";
pub const ID_CAPTURE: &str = "id";
pub const DATA_CAPTURE: &str = "data";

/// Pattern for `candump -l` style logs
pub const CANDUMP_PATTERN: &str =
    r"^\((?P<timestamp>[0-9]+\.[0-9]+)\).*?(?P<id>[0-9A-F]{3,8})#(?P<data>[0-9A-F]*)";

/// Built-in line formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineTemplate {
    Candump,
}

impl LineTemplate {
    pub fn pattern(self) -> &'static str {
        match self {
            LineTemplate::Candump => CANDUMP_PATTERN,
        }
    }
}

/// The three captures of one matched line
///
/// A capture is `None` when the group exists in the pattern but did not take
/// part in the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineCaptures<'a> {
    pub timestamp: Option<&'a str>,
    pub id: Option<&'a str>,
    pub data: Option<&'a str>,
}

/// Capability contract for line extraction
pub trait LineMatcher: Send + Sync + fmt::Debug {
    /// Return the captures of `line`, or `None` if the line does not match
    fn captures<'a>(&self, line: &'a str) -> Option<LineCaptures<'a>>;
}

/// Regex-backed line matcher
#[derive(Debug, Clone)]
pub struct RegexLineMatcher {
    regex: Regex,
}

impl RegexLineMatcher {
    /// Compile `pattern` and check it exposes the three required captures
    pub fn new(pattern: &str) -> Result<Self, ConstructionError> {
        let regex = Regex::new(pattern)?;
        for required in [TIMESTAMP_CAPTURE, ID_CAPTURE, DATA_CAPTURE] {
            if !regex.capture_names().flatten().any(|name| name == required) {
                return Err(ConstructionError::MissingCapture(required));
            }
        }
        Ok(Self { regex })
    }

    pub fn from_template(template: LineTemplate) -> Result<Self, ConstructionError> {
        Self::new(template.pattern())
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

impl LineMatcher for RegexLineMatcher {
    fn captures<'a>(&self, line: &'a str) -> Option<LineCaptures<'a>> {
        let caps = self.regex.captures(line)?;
        Some(LineCaptures {
            timestamp: caps.name(TIMESTAMP_CAPTURE).map(|m| m.as_str()),
            id: caps.name(ID_CAPTURE).map(|m| m.as_str()),
            data: caps.name(DATA_CAPTURE).map(|m| m.as_str()),
        })
    }
}

/// Extract a raw frame from one line
///
/// Fails with `UnmatchedLine` if the matcher rejects the line and with
/// `MalformedFrame` if it matches but a capture cannot be parsed. An ID of
/// three hex digits or fewer that fits in 11 bits is a standard frame, as
/// candump writes it.
pub fn extract_frame(
    matcher: &dyn LineMatcher,
    line: &str,
    line_no: usize,
) -> Result<RawFrame, ParseIssue> {
    let captures = matcher
        .captures(line)
        .ok_or(ParseIssue::UnmatchedLine { line: line_no })?;

    let malformed = |reason: String| ParseIssue::MalformedFrame {
        line: line_no,
        reason,
    };

    let timestamp = required(captures.timestamp, TIMESTAMP_CAPTURE).map_err(malformed)?;
    let id = required(captures.id, ID_CAPTURE).map_err(malformed)?;
    let data = required(captures.data, DATA_CAPTURE).map_err(malformed)?;

    let arbitration_id = parse_arbitration_id(id).map_err(malformed)?;
    Ok(RawFrame {
        timestamp: parse_timestamp(timestamp).map_err(malformed)?,
        arbitration_id,
        extended: id.trim().len() > STANDARD_ID_DIGITS || arbitration_id > STANDARD_ID_MASK,
        payload: parse_payload(data).map_err(malformed)?,
    })
}

fn required<'a>(capture: Option<&'a str>, name: &str) -> Result<&'a str, String> {
    capture.ok_or_else(|| format!("capture '{}' did not participate in the match", name))
}

fn parse_timestamp(text: &str) -> Result<f64, String> {
    let text = text.trim();
    let value: f64 = text
        .parse()
        .map_err(|_| format!("timestamp '{}' is not a decimal number", text))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("timestamp '{}' must be a non-negative number", text));
    }
    Ok(value)
}

fn parse_arbitration_id(text: &str) -> Result<u32, String> {
    let text = text.trim();
    if text.is_empty() || !text.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("id '{}' is not hexadecimal", text));
    }
    let id = u32::from_str_radix(text, 16)
        .map_err(|_| format!("id '{}' does not fit in 32 bits", text))?;
    if id > ARBITRATION_ID_MASK {
        return Err(format!("id 0x{:X} exceeds 29 bits", id));
    }
    Ok(id)
}

fn parse_payload(text: &str) -> Result<Vec<u8>, String> {
    let text = text.trim();
    let payload = hex::decode(text).map_err(|e| format!("data '{}' is not valid hex: {}", text, e))?;
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(format!(
            "data carries {} bytes, at most {} are allowed",
            payload.len(),
            MAX_PAYLOAD_LEN
        ));
    }
    Ok(payload)
}
