//! Spec source loading through the public API

use can_log_parser::{
    ByteOrder, CanParser, ConstructionError, ParserConfig, SignalValue, SpecDatabase, SpecType,
};

const CATALOG: &str = include_str!("data/j1939_catalog.json");

#[test]
fn test_catalog_fixture_loads() {
    let db = SpecDatabase::from_source(CATALOG).unwrap();
    assert_eq!(db.pgns(), vec![0xEA00, 0xF004, 0xFEF1, 0xFF00]);

    let stats = db.stats();
    assert_eq!(stats.num_messages, 4);
    assert_eq!(stats.num_signals, 8);
    assert_eq!(stats.skipped_signals, 0);

    let eec1 = db.get(61444).unwrap();
    assert_eq!(eec1.acronym.as_deref(), Some("EEC1"));
    assert_eq!(eec1.signals[1].spn, Some(190));

    let prop = db.get(0xFF00).unwrap();
    assert!(prop.signals.iter().all(|s| s.byte_order == ByteOrder::BigEndian));

    let found = db.find_signal("EngineSpeed");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].0, 61444);
    assert!(db.get(0xFEEE).is_none());
}

#[test]
fn test_invalid_spec_fails_construction() {
    let spec = r#"{ "0xFEF1": { "name": "CCVS", "signals": [
        { "name": "Speed", "start_bit": 60, "bit_length": 16 }
    ] } }"#;
    let err = CanParser::new(ParserConfig::new().with_spec(SpecType::J1939, spec)).unwrap_err();
    match err {
        ConstructionError::InvalidSpec(issue) => {
            assert_eq!(issue.pgn.as_deref(), Some("65265"));
            assert_eq!(issue.signal.as_deref(), Some("Speed"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_zero_length_signal_rejected() {
    let spec = r#"{ "1": { "name": "A", "signals": [
        { "name": "S", "start_bit": 0, "bit_length": 0 }
    ] } }"#;
    assert!(matches!(
        SpecDatabase::from_source(spec),
        Err(ConstructionError::InvalidSpec(_))
    ));
}

#[test]
fn test_oversized_expected_length_rejected() {
    let spec = r#"{ "1": { "name": "A", "length": 9, "signals": [] } }"#;
    assert!(SpecDatabase::from_source(spec).is_err());
}

#[test]
fn test_digital_annex_drives_parser() {
    let annex = r#"{
        "J1939PGNdb": {
            "61444": {
                "Label": "EEC1",
                "Name": "Electronic Engine Controller 1",
                "PGNLength": "8",
                "SPNs": [899, 512, 190, 1483],
                "SPNStartBits": [[0], [8], [24], [-1]]
            }
        },
        "J1939SPNdb": {
            "899": { "Name": "Engine Torque Mode", "SPNLength": 4 },
            "512": { "Name": "Driver's Demand Engine - Percent Torque", "SPNLength": 8,
                     "Resolution": 1, "Offset": -125, "Units": "%" },
            "190": { "Name": "Engine Speed", "SPNLength": 16, "Resolution": 0.125,
                     "Offset": 0, "Units": "rpm" },
            "1483": { "Name": "Source Address of Controlling Device", "SPNLength": 8 }
        },
        "J1939BitDecodings": {
            "899": { "0": "Low idle governor", "1": "Accelerator pedal" }
        }
    }"#;

    let parser = CanParser::new(ParserConfig::new().with_spec(SpecType::J1939, annex)).unwrap();
    let stats = parser.database_stats();
    assert_eq!(stats.num_signals, 3);
    assert_eq!(stats.skipped_signals, 1);

    let frame = parser.parse_line("(5.0) can0 0CF00400#F17D7D8C1E00FF7D").unwrap();
    assert_eq!(frame.message_name.as_deref(), Some("Electronic Engine Controller 1"));
    assert_eq!(
        frame.value("Engine Torque Mode"),
        Some(&SignalValue::Label("Accelerator pedal".to_string()))
    );
    assert_eq!(frame.value("Engine Speed"), Some(&SignalValue::Float(977.5)));
    assert_eq!(frame.signal("Engine Speed").unwrap().unit.as_deref(), Some("rpm"));
}

#[test]
fn test_unknown_spec_tag() {
    let err = ParserConfig::new().with_spec_tag("nmea2000", "{}").unwrap_err();
    assert!(matches!(err, ConstructionError::UnknownSpecType(tag) if tag == "nmea2000"));
}
