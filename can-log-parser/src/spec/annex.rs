//! J1939 digital annex conversion
//!
//! The annex lists every SPN of a PGN, including parameters whose position
//! depends on the content of the frame (start bit -1) and multi-packet
//! parameters longer than a single frame. Only SPNs with a fixed place
//! inside 64 bits become signals; the rest are skipped and counted.

use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::database::{ByteOrder, MessageSpec, SignalSpec, MAX_SIGNAL_BITS};
use super::source::{parse_enumeration, parse_pgn_key, LoadedSpec, OrderedEntries};
use crate::types::{ConstructionError, SpecIssue, MAX_PAYLOAD_LEN};

#[derive(Debug, Deserialize)]
struct Annex {
    #[serde(rename = "J1939PGNdb")]
    pgns: OrderedEntries<AnnexPgn>,
    #[serde(rename = "J1939SPNdb", default)]
    spns: HashMap<String, AnnexSpn>,
    #[serde(rename = "J1939BitDecodings", default)]
    bit_decodings: HashMap<String, HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct AnnexPgn {
    #[serde(rename = "Name", default)]
    name: Option<String>,
    #[serde(rename = "Label", default)]
    label: Option<String>,
    #[serde(rename = "PGNLength", default)]
    length: Option<Value>,
    #[serde(rename = "SPNs", default)]
    spns: Vec<u32>,
    #[serde(rename = "SPNStartBits", default)]
    start_bits: Vec<StartBit>,
}

#[derive(Debug, Deserialize)]
struct AnnexSpn {
    #[serde(rename = "Name", default)]
    name: Option<String>,
    #[serde(rename = "SPNLength", default)]
    length: Option<i64>,
    #[serde(rename = "Resolution", default)]
    resolution: Option<f64>,
    #[serde(rename = "Offset", default)]
    offset: Option<f64>,
    #[serde(rename = "Units", default)]
    units: Option<String>,
}

/// A start bit is written either as a number or as a list of candidates
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StartBit {
    Single(i64),
    Candidates(Vec<i64>),
}

impl StartBit {
    fn first(&self) -> Option<i64> {
        match self {
            StartBit::Single(bit) => Some(*bit),
            StartBit::Candidates(bits) => bits.first().copied(),
        }
    }
}

pub fn load(text: &str) -> Result<LoadedSpec, ConstructionError> {
    let annex: Annex = serde_json::from_str(text).map_err(|e| {
        ConstructionError::InvalidSpec(SpecIssue::source(format!("invalid digital annex: {}", e)))
    })?;

    let decodings = bit_decodings(&annex).map_err(ConstructionError::InvalidSpec)?;

    let mut loaded = LoadedSpec::default();
    for (key, pgn) in &annex.pgns.0 {
        let number = parse_pgn_key(key).map_err(ConstructionError::InvalidSpec)?;
        let (message, skipped) = convert_pgn(&annex, &decodings, number, pgn);
        loaded.skipped_signals += skipped;
        loaded.messages.push(message);
    }

    log::info!(
        "Digital annex converted: {} PGNs, {} SPNs skipped",
        loaded.messages.len(),
        loaded.skipped_signals
    );
    Ok(loaded)
}

type Decodings = HashMap<u32, BTreeMap<u64, String>>;

fn convert_pgn(annex: &Annex, decodings: &Decodings, number: u32, pgn: &AnnexPgn) -> (MessageSpec, usize) {
    let mut signals = Vec::new();
    let mut used_names = HashSet::new();
    let mut skipped = 0;

    for (index, spn) in pgn.spns.iter().enumerate() {
        let start = pgn.start_bits.get(index).and_then(StartBit::first);
        match convert_spn(annex, *spn, start) {
            Ok(mut signal) => {
                if used_names.contains(&signal.name) {
                    signal.name = unique_name(&used_names, &signal.name, *spn);
                }
                used_names.insert(signal.name.clone());
                signal.values = decodings.get(spn).cloned();
                signals.push(signal);
            }
            Err(reason) => {
                log::warn!("PGN {}: skipping SPN {}: {}", number, spn, reason);
                skipped += 1;
            }
        }
    }

    let message = MessageSpec {
        pgn: number,
        name: pgn
            .name
            .clone()
            .unwrap_or_else(|| format!("PGN {}", number)),
        acronym: pgn.label.clone().filter(|l| !l.is_empty()),
        expected_length: fixed_length(pgn.length.as_ref()),
        signals,
    };
    (message, skipped)
}

fn convert_spn(annex: &Annex, spn: u32, start: Option<i64>) -> Result<SignalSpec, String> {
    let start = match start {
        Some(bit) if bit >= 0 => bit as u64,
        _ => return Err("start bit is not fixed".to_string()),
    };
    let entry = annex
        .spns
        .get(&spn.to_string())
        .ok_or_else(|| "no entry in the SPN database".to_string())?;
    let length = match entry.length {
        Some(bits) if bits > 0 => bits as u64,
        _ => return Err("variable length".to_string()),
    };
    if start + length > u64::from(MAX_SIGNAL_BITS) {
        return Err(format!("bits {}..{} lie beyond a single frame", start, start + length));
    }

    Ok(SignalSpec {
        name: entry
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("SPN {}", spn)),
        spn: Some(spn),
        start_bit: start as u16,
        bit_length: length as u16,
        byte_order: ByteOrder::LittleEndian,
        scale: entry.resolution.unwrap_or(1.0),
        offset: entry.offset.unwrap_or(0.0),
        unit: entry.units.clone().filter(|u| !u.is_empty()),
        values: None,
    })
}

/// `<name>_<spn>`, numbered further until it is free
fn unique_name(used: &HashSet<String>, name: &str, spn: u32) -> String {
    let mut candidate = format!("{}_{}", name, spn);
    let mut n = 2;
    while used.contains(&candidate) {
        candidate = format!("{}_{}_{}", name, spn, n);
        n += 1;
    }
    candidate
}

/// Enumeration tables by SPN; empty tables are left out
fn bit_decodings(annex: &Annex) -> Result<Decodings, SpecIssue> {
    let mut decodings = HashMap::new();
    for (spn_key, table) in &annex.bit_decodings {
        if table.is_empty() {
            continue;
        }
        let spn: u32 = spn_key
            .trim()
            .parse()
            .map_err(|_| SpecIssue::source(format!("bit decoding key '{}' is not an SPN number", spn_key)))?;
        let values = parse_enumeration(table.iter().map(|(raw, label)| (raw.clone(), label.clone())))
            .map_err(|reason| SpecIssue::source(format!("bit decodings of SPN {}: {}", spn, reason)))?;
        decodings.insert(spn, values);
    }
    Ok(decodings)
}

/// `PGNLength` is a string such as "8" or "Variable"; only single-frame sizes count
fn fixed_length(length: Option<&Value>) -> Option<usize> {
    let bytes = match length? {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    usize::try_from(bytes).ok().filter(|b| *b <= MAX_PAYLOAD_LEN)
}

#[cfg(test)]
mod tests {
    use crate::spec::SpecDatabase;

    const ANNEX: &str = r#"{
        "J1939PGNdb": {
            "65265": {
                "Label": "CCVS1",
                "Name": "Cruise Control/Vehicle Speed 1",
                "PGNLength": "8",
                "SPNs": [69, 84, 70, 1633, 9999],
                "SPNStartBits": [[0], [8], 2, [-1], 40]
            },
            "60416": {
                "Label": "TP.CM",
                "Name": "Transport Protocol - Connection Mgmt",
                "PGNLength": "Variable",
                "SPNs": [2556],
                "SPNStartBits": [[0]]
            }
        },
        "J1939SPNdb": {
            "69": { "Name": "Two Speed Axle Switch", "SPNLength": 2, "Resolution": 1,
                    "Offset": 0, "Units": "bit" },
            "84": { "Name": "Wheel-Based Vehicle Speed", "SPNLength": 16,
                    "Resolution": 0.00390625, "Offset": 0, "Units": "km/h" },
            "70": { "Name": "Two Speed Axle Switch", "SPNLength": 2, "Resolution": 1,
                    "Offset": 0, "Units": "bit" },
            "1633": { "Name": "Cruise Control Pause Switch", "SPNLength": 2 },
            "2556": { "Name": "Control Byte", "SPNLength": 0 }
        },
        "J1939BitDecodings": {
            "70": { "0": "Not set", "1": "Set", "2": "Error", "3": "Not available" }
        }
    }"#;

    #[test]
    fn test_load_annex() {
        let db = SpecDatabase::from_source(ANNEX).unwrap();
        let stats = db.stats();
        assert_eq!(stats.num_messages, 2);
        assert_eq!(stats.num_signals, 3);
        // 1633 has start bit -1, 9999 has no SPN entry, 2556 has length 0
        assert_eq!(stats.skipped_signals, 3);

        let ccvs = db.get(65265).unwrap();
        assert_eq!(ccvs.acronym.as_deref(), Some("CCVS1"));
        assert_eq!(ccvs.expected_length, Some(8));
        assert_eq!(ccvs.signals[1].start_bit, 8);
        assert_eq!(ccvs.signals[1].unit.as_deref(), Some("km/h"));

        // Name clash gets the SPN appended
        assert_eq!(ccvs.signals[2].name, "Two Speed Axle Switch_70");
        assert_eq!(ccvs.signals[2].start_bit, 2);
        assert_eq!(ccvs.signals[2].label_for(3), Some("Not available"));

        let tp = db.get(60416).unwrap();
        assert_eq!(tp.expected_length, None);
        assert!(tp.signals.is_empty());
    }

    #[test]
    fn test_renamed_signal_stays_unique() {
        let annex = r#"{
            "J1939PGNdb": {
                "65280": { "Name": "Proprietary B", "SPNs": [1, 3, 2],
                           "SPNStartBits": [0, 8, 16] }
            },
            "J1939SPNdb": {
                "1": { "Name": "Level", "SPNLength": 8 },
                "3": { "Name": "Level_2", "SPNLength": 8 },
                "2": { "Name": "Level", "SPNLength": 8 }
            }
        }"#;
        let db = SpecDatabase::from_source(annex).unwrap();
        let names: Vec<&str> = db.get(65280).unwrap().signals.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Level", "Level_2", "Level_2_2"]);
    }

    #[test]
    fn test_duplicate_bit_decoding_value() {
        let annex = r#"{
            "J1939PGNdb": { "65280": { "Name": "Proprietary B", "SPNs": [1], "SPNStartBits": [0] } },
            "J1939SPNdb": { "1": { "Name": "Mode", "SPNLength": 2 } },
            "J1939BitDecodings": { "1": { "1": "On", "0x1": "Active" } }
        }"#;
        let err = SpecDatabase::from_source(annex).unwrap_err();
        assert!(err.to_string().contains("duplicate enumeration value 1"));
    }

    #[test]
    fn test_annex_requires_object() {
        let result = SpecDatabase::from_source(r#"{ "J1939PGNdb": [] }"#);
        assert!(result.is_err());
    }
}
