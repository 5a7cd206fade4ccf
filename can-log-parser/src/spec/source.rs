//! Spec source loading
//!
//! A spec source is either a DBC file or JSON text in one of two layouts.
//! Text with `BO_` message lines is read as DBC. For JSON the layout is
//! picked by the top-level keys: a document with `J1939PGNdb` is a digital
//! annex export, anything else is a catalog keyed by PGN.
//!
//! Catalog example:
//!
//! ```json
//! {
//!   "0xFEF1": {
//!     "name": "Cruise Control/Vehicle Speed",
//!     "acronym": "CCVS",
//!     "length": 8,
//!     "signals": [
//!       { "name": "WheelBasedVehicleSpeed", "spn": 84, "start_bit": 8,
//!         "bit_length": 16, "scale": 0.00390625, "unit": "km/h" }
//!     ]
//!   }
//! }
//! ```

use serde::de::{Deserializer, IgnoredAny, MapAccess, Visitor};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use super::{annex, dbc};
use super::database::{ByteOrder, MessageSpec, SignalSpec};
use crate::types::{ConstructionError, SpecIssue};

/// Top-level key marking a digital annex export
pub const ANNEX_PGN_KEY: &str = "J1939PGNdb";

/// Messages converted from a source, before validation
#[derive(Debug, Default)]
pub struct LoadedSpec {
    pub messages: Vec<MessageSpec>,
    pub skipped_signals: usize,
}

/// JSON object entries in document order, duplicates kept
///
/// `serde_json::Map` silently keeps the last of two equal keys; the spec
/// loaders need to see both to reject them.
#[derive(Debug)]
pub struct OrderedEntries<T>(pub Vec<(String, T)>);

impl<T> OrderedEntries<T> {
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(key, _)| key.as_str())
    }
}

impl<T> Default for OrderedEntries<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for OrderedEntries<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for EntriesVisitor<T> {
            type Value = OrderedEntries<T>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, value)) = map.next_entry::<String, T>()? {
                    entries.push((key, value));
                }
                Ok(OrderedEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor(PhantomData))
    }
}

/// Parse a numeric key written in decimal or `0x`-prefixed hex
pub fn parse_number_key(key: &str) -> Option<u64> {
    let key = key.trim();
    match key.strip_prefix("0x").or_else(|| key.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => key.parse().ok(),
    }
}

/// Parse a PGN key, rejecting anything wider than 32 bits
pub fn parse_pgn_key(key: &str) -> Result<u32, SpecIssue> {
    parse_number_key(key)
        .and_then(|pgn| u32::try_from(pgn).ok())
        .ok_or_else(|| SpecIssue::message(key, "PGN key is not a decimal or 0x-prefixed number"))
}

/// Convert an enumeration table keyed by numeric strings
///
/// Two keys naming the same raw value (`"1"` and `"0x1"`) are rejected.
pub fn parse_enumeration<I>(table: I) -> Result<BTreeMap<u64, String>, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut converted = BTreeMap::new();
    for (raw, label) in table {
        let value = parse_number_key(&raw)
            .ok_or_else(|| format!("enumeration key '{}' is not numeric", raw))?;
        if converted.insert(value, label).is_some() {
            return Err(format!("duplicate enumeration value {} (key '{}')", value, raw));
        }
    }
    Ok(converted)
}

/// Detect the layout of `text` and convert it to message specs
pub fn load(text: &str) -> Result<LoadedSpec, ConstructionError> {
    if dbc::looks_like_dbc(text) {
        log::debug!("Spec source detected as DBC");
        return dbc::load(text);
    }

    let invalid = |e: serde_json::Error| {
        ConstructionError::InvalidSpec(SpecIssue::source(format!("not a JSON object: {}", e)))
    };

    let top: OrderedEntries<IgnoredAny> = serde_json::from_str(text).map_err(invalid)?;
    if top.keys().any(|key| key == ANNEX_PGN_KEY) {
        log::debug!("Spec source detected as digital annex");
        annex::load(text)
    } else {
        log::debug!("Spec source detected as catalog");
        let entries: OrderedEntries<Value> = serde_json::from_str(text).map_err(invalid)?;
        load_catalog(entries)
    }
}

#[derive(Debug, Deserialize)]
struct CatalogMessage {
    name: String,
    #[serde(default)]
    acronym: Option<String>,
    #[serde(default, alias = "expected_length")]
    length: Option<usize>,
    #[serde(default)]
    signals: Vec<CatalogSignal>,
}

#[derive(Debug, Deserialize)]
struct CatalogSignal {
    name: String,
    #[serde(default)]
    spn: Option<u32>,
    start_bit: u16,
    bit_length: u16,
    #[serde(default)]
    byte_order: ByteOrder,
    #[serde(default = "default_scale")]
    scale: f64,
    #[serde(default)]
    offset: f64,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    values: Option<BTreeMap<String, String>>,
}

fn default_scale() -> f64 {
    1.0
}

fn load_catalog(entries: OrderedEntries<Value>) -> Result<LoadedSpec, ConstructionError> {
    let mut messages = Vec::with_capacity(entries.0.len());

    for (key, value) in entries.0 {
        let pgn = parse_pgn_key(&key).map_err(ConstructionError::InvalidSpec)?;
        let message: CatalogMessage = serde_json::from_value(value)
            .map_err(|e| ConstructionError::InvalidSpec(SpecIssue::message(&key, e.to_string())))?;
        messages.push(convert_message(pgn, message).map_err(ConstructionError::InvalidSpec)?);
    }

    log::debug!("Catalog holds {} messages", messages.len());
    Ok(LoadedSpec {
        messages,
        skipped_signals: 0,
    })
}

fn convert_message(pgn: u32, message: CatalogMessage) -> Result<MessageSpec, SpecIssue> {
    let signals = message
        .signals
        .into_iter()
        .map(|signal| convert_signal(pgn, signal))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(MessageSpec {
        pgn,
        name: message.name,
        acronym: message.acronym,
        expected_length: message.length,
        signals,
    })
}

fn convert_signal(pgn: u32, signal: CatalogSignal) -> Result<SignalSpec, SpecIssue> {
    let values = signal
        .values
        .map(parse_enumeration)
        .transpose()
        .map_err(|reason| SpecIssue::signal(pgn, &signal.name, reason))?;

    Ok(SignalSpec {
        name: signal.name,
        spn: signal.spn,
        start_bit: signal.start_bit,
        bit_length: signal.bit_length,
        byte_order: signal.byte_order,
        scale: signal.scale,
        offset: signal.offset,
        unit: signal.unit.filter(|u| !u.is_empty()),
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::SpecDatabase;

    const CATALOG: &str = r#"{
        "0xFEF1": {
            "name": "Cruise Control/Vehicle Speed",
            "acronym": "CCVS",
            "length": 8,
            "signals": [
                { "name": "WheelBasedVehicleSpeed", "spn": 84, "start_bit": 8,
                  "bit_length": 16, "scale": 0.00390625, "unit": "km/h" },
                { "name": "ParkingBrakeSwitch", "spn": 70, "start_bit": 2,
                  "bit_length": 2, "values": { "0": "NotSet", "1": "Set" } }
            ]
        },
        "61444": {
            "name": "Electronic Engine Controller 1",
            "signals": [
                { "name": "EngineSpeed", "start_bit": 24, "bit_length": 16,
                  "byte_order": "intel", "scale": 0.125 }
            ]
        }
    }"#;

    #[test]
    fn test_parse_keys() {
        assert_eq!(parse_number_key("65265"), Some(65265));
        assert_eq!(parse_number_key("0xFEF1"), Some(0xFEF1));
        assert_eq!(parse_number_key("0XFEF1"), Some(0xFEF1));
        assert_eq!(parse_number_key("CCVS"), None);
        assert!(parse_pgn_key("0x1FFFFFFFF").is_err());
    }

    #[test]
    fn test_load_catalog() {
        let db = SpecDatabase::from_source(CATALOG).unwrap();
        let stats = db.stats();
        assert_eq!(stats.num_messages, 2);
        assert_eq!(stats.num_signals, 3);

        let ccvs = db.get(0xFEF1).unwrap();
        assert_eq!(ccvs.expected_length, Some(8));
        assert_eq!(ccvs.signals[0].scale, 0.00390625);
        assert_eq!(ccvs.signals[0].byte_order, ByteOrder::LittleEndian);
        assert_eq!(ccvs.signals[1].label_for(1), Some("Set"));

        let eec1 = db.get(61444).unwrap();
        assert_eq!(eec1.signals[0].offset, 0.0);
        assert_eq!(eec1.signals[0].unit, None);
    }

    #[test]
    fn test_same_pgn_in_two_notations() {
        let text = r#"{
            "65265": { "name": "A", "signals": [] },
            "0xFEF1": { "name": "B", "signals": [] }
        }"#;
        let err = SpecDatabase::from_source(text).unwrap_err();
        assert!(matches!(err, ConstructionError::InvalidSpec(_)));
    }

    #[test]
    fn test_duplicate_json_key_is_rejected() {
        let text = r#"{
            "65265": { "name": "A", "signals": [] },
            "65265": { "name": "B", "signals": [] }
        }"#;
        assert!(SpecDatabase::from_source(text).is_err());
    }

    #[test]
    fn test_non_numeric_pgn() {
        let err = SpecDatabase::from_source(r#"{ "CCVS": { "name": "A" } }"#).unwrap_err();
        match err {
            ConstructionError::InvalidSpec(issue) => assert_eq!(issue.pgn.as_deref(), Some("CCVS")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_non_numeric_enumeration_key() {
        let text = r#"{ "1": { "name": "A", "signals": [
            { "name": "S", "start_bit": 0, "bit_length": 2, "values": { "on": "On" } }
        ] } }"#;
        let err = SpecDatabase::from_source(text).unwrap_err();
        match err {
            ConstructionError::InvalidSpec(issue) => assert_eq!(issue.signal.as_deref(), Some("S")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_enumeration_value() {
        let text = r#"{ "1": { "name": "A", "signals": [
            { "name": "S", "start_bit": 0, "bit_length": 2, "values": { "1": "On", "0x1": "Active" } }
        ] } }"#;
        let err = SpecDatabase::from_source(text).unwrap_err();
        match err {
            ConstructionError::InvalidSpec(issue) => {
                assert_eq!(issue.signal.as_deref(), Some("S"));
                assert!(issue.reason.contains("duplicate enumeration value 1"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_field_names_pgn() {
        let err = SpecDatabase::from_source(r#"{ "0x100": { "signals": [] } }"#).unwrap_err();
        match err {
            ConstructionError::InvalidSpec(issue) => assert_eq!(issue.pgn.as_deref(), Some("0x100")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_not_an_object() {
        assert!(SpecDatabase::from_source("[1, 2, 3]").is_err());
        assert!(SpecDatabase::from_source("not json").is_err());
    }

    #[test]
    fn test_pgn_above_18_bits() {
        let err = SpecDatabase::from_source(r#"{ "0x40000": { "name": "A" } }"#).unwrap_err();
        assert!(matches!(err, ConstructionError::InvalidSpec(_)));
    }
}
