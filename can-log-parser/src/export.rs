//! JSON and CSV export of parse results

use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::parser::ParseOutput;
use crate::spec::MessageSpec;
use crate::types::{DecodedFrame, DecodedSignal, ParserError, Result, SignalValue};

/// Serialized shape of a [`ParseOutput`]
#[derive(Serialize)]
struct JsonReport<'a> {
    lines_read: usize,
    cancelled: bool,
    /// Definitions of the PGNs that appear in `frames`
    spec: &'a BTreeMap<u32, MessageSpec>,
    frames: &'a [DecodedFrame],
    /// Line-level warnings rendered as text
    warnings: Vec<String>,
}

impl<'a> From<&'a ParseOutput> for JsonReport<'a> {
    fn from(output: &'a ParseOutput) -> Self {
        Self {
            lines_read: output.lines_read,
            cancelled: output.cancelled,
            spec: &output.spec,
            frames: &output.frames,
            warnings: output.warnings.iter().map(ToString::to_string).collect(),
        }
    }
}

const CSV_HEADER: [&str; 11] = [
    "line",
    "timestamp",
    "arbitration_id",
    "pgn",
    "source_address",
    "destination_address",
    "message",
    "signal",
    "value",
    "unit",
    "raw_value",
];

/// One CSV record: a decoded signal, or a frame without signals
#[derive(Serialize)]
struct CsvRow<'a> {
    line: usize,
    timestamp: f64,
    arbitration_id: String,
    pgn: u32,
    source_address: u8,
    destination_address: Option<u8>,
    message: Option<&'a str>,
    signal: Option<&'a str>,
    value: Option<String>,
    unit: Option<&'a str>,
    raw_value: Option<u64>,
}

fn csv_rows(frame: &DecodedFrame) -> Vec<CsvRow<'_>> {
    if frame.signals.is_empty() {
        vec![csv_row(frame, None)]
    } else {
        frame.signals.iter().map(|s| csv_row(frame, Some(s))).collect()
    }
}

fn csv_row<'a>(frame: &'a DecodedFrame, signal: Option<&'a DecodedSignal>) -> CsvRow<'a> {
    CsvRow {
        line: frame.line,
        timestamp: frame.timestamp,
        arbitration_id: if frame.extended {
            format!("{:08X}", frame.arbitration_id)
        } else {
            format!("{:03X}", frame.arbitration_id)
        },
        pgn: frame.pgn,
        source_address: frame.source_address,
        destination_address: frame.destination_address,
        message: frame.message_name.as_deref(),
        signal: signal.map(|s| s.name.as_str()),
        value: signal.map(|s| value_text(&s.value)),
        unit: signal.and_then(|s| s.unit.as_deref()),
        raw_value: signal.map(|s| s.raw_value),
    }
}

/// Full-precision text of a value (`Display` rounds floats)
fn value_text(value: &SignalValue) -> String {
    match value {
        SignalValue::Integer(v) => v.to_string(),
        SignalValue::Float(v) => v.to_string(),
        SignalValue::Label(v) => v.clone(),
    }
}

impl ParseOutput {
    /// Pretty-printed JSON document of the seen spec, frames and warnings
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&JsonReport::from(self))?)
    }

    /// Write the JSON document to `path`, replacing any existing file
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, &JsonReport::from(self))?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        log::info!("Wrote {} frames to {:?}", self.frames.len(), path);
        Ok(())
    }

    /// CSV text with one row per decoded signal
    ///
    /// Frames without signals (unknown PGNs, standard frames) get a single
    /// row with the signal columns left empty. Line-level warnings are not
    /// part of the CSV.
    pub fn to_csv(&self) -> Result<String> {
        let bytes = self.csv_into(Vec::new())?;
        String::from_utf8(bytes)
            .map_err(|e| ParserError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))
    }

    /// Write the CSV rows to `path`, replacing any existing file
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut writer = self.csv_into(BufWriter::new(File::create(path)?))?;
        writer.flush()?;

        log::info!("Wrote {} frames as CSV to {:?}", self.frames.len(), path);
        Ok(())
    }

    fn csv_into<W: Write>(&self, writer: W) -> Result<W> {
        let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
        wtr.write_record(CSV_HEADER)?;
        for frame in &self.frames {
            for row in csv_rows(frame) {
                wtr.serialize(row)?;
            }
        }
        wtr.into_inner().map_err(|e| ParserError::Io(e.into_error()))
    }
}
