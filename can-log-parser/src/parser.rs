//! Main parser API
//!
//! This module provides the primary interface for the parser library.
//! [`CanParser`] is built once from a [`ParserConfig`] and then decodes
//! lines, readers and files into [`DecodedFrame`]s.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::config::ParserConfig;
use crate::line_pattern::{extract_frame, LineMatcher, RegexLineMatcher};
use crate::policy::{Disposition, ErrorPolicy};
use crate::protocol::{FrameAddress, Protocol, SpecType};
use crate::signal_decoder::MessageDecoder;
use crate::spec::{DatabaseStats, MessageSpec, SpecDatabase};
use crate::types::{ConstructionError, DecodedFrame, ParseIssue, ParserError, Result};

/// Addressing used for frames no loaded spec knows
const DEFAULT_PROTOCOL: Protocol = Protocol::J1939;

/// The main parser struct - entry point for all parsing operations
///
/// Cloning is cheap: the matcher and the spec databases are shared.
#[derive(Debug, Clone)]
pub struct CanParser {
    matcher: Arc<dyn LineMatcher>,
    specs: Arc<BTreeMap<SpecType, SpecDatabase>>,
    policy: ErrorPolicy,
}

/// Result of parsing a sequence of lines
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParseOutput {
    /// Decoded frames, in input order
    pub frames: Vec<DecodedFrame>,
    /// Line-level issues (unmatched or malformed lines)
    pub warnings: Vec<ParseIssue>,
    /// Number of lines consumed, blank ones included
    pub lines_read: usize,
    /// True if a stop signal ended the parse early
    pub cancelled: bool,
    /// Definitions of the messages seen in `frames`, by PGN
    pub spec: BTreeMap<u32, MessageSpec>,
}

impl ParseOutput {
    /// Line-level and frame-level warnings together, ordered by line
    pub fn all_warnings(&self) -> Vec<&ParseIssue> {
        let mut all: Vec<&ParseIssue> = self
            .warnings
            .iter()
            .chain(self.frames.iter().flat_map(|f| f.warnings.iter()))
            .collect();
        all.sort_by_key(|issue| issue.line());
        all
    }
}

impl CanParser {
    /// Build a parser: compile the line pattern and load every spec source
    ///
    /// # Example
    /// ```
    /// use can_log_parser::{CanParser, ErrorPolicy, ParserConfig, SpecType};
    ///
    /// let spec = r#"{ "0xFEF1": { "name": "CCVS", "signals": [
    ///     { "name": "Speed", "start_bit": 8, "bit_length": 16, "scale": 0.00390625 }
    /// ] } }"#;
    /// let config = ParserConfig::new()
    ///     .with_error_policy(ErrorPolicy::Warn)
    ///     .with_spec(SpecType::J1939, spec);
    /// let parser = CanParser::new(config).unwrap();
    ///
    /// let output = parser.parse_lines(["(1.0) can0 18FEF100#0000320000000000"]).unwrap();
    /// assert_eq!(output.frames[0].pgn, 0xFEF1);
    /// ```
    pub fn new(config: ParserConfig) -> std::result::Result<Self, ConstructionError> {
        let matcher = RegexLineMatcher::new(&config.line_pattern)?;

        let mut specs = BTreeMap::new();
        for (spec_type, source) in &config.specs {
            let db = SpecDatabase::from_source(source)?;
            let stats = db.stats();
            log::info!(
                "Loaded {} spec: {} messages, {} signals ({} skipped)",
                spec_type,
                stats.num_messages,
                stats.num_signals,
                stats.skipped_signals
            );
            specs.insert(*spec_type, db);
        }

        Ok(Self {
            matcher: Arc::new(matcher),
            specs: Arc::new(specs),
            policy: config.error_policy,
        })
    }

    /// Replace the line matcher with a custom implementation
    pub fn with_matcher(mut self, matcher: impl LineMatcher + 'static) -> Self {
        self.matcher = Arc::new(matcher);
        self
    }

    pub fn error_policy(&self) -> ErrorPolicy {
        self.policy
    }

    /// Get the loaded database for a spec type
    pub fn database(&self, spec_type: SpecType) -> Option<&SpecDatabase> {
        self.specs.get(&spec_type)
    }

    /// Get statistics about the loaded spec databases
    pub fn database_stats(&self) -> DatabaseStats {
        let mut total = DatabaseStats::default();
        for db in self.specs.values() {
            total += db.stats();
        }
        total
    }

    /// Decode a single line, treating every failure as an error
    ///
    /// Informational issues are still attached to the frame as warnings.
    /// A blank line is reported as unmatched.
    pub fn parse_line(&self, line: &str) -> Result<DecodedFrame> {
        match self.decode_line(line, 1, ErrorPolicy::Fail) {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(ParserError::Aborted(ParseIssue::UnmatchedLine { line: 1 })),
            Err(issue) => Err(ParserError::Aborted(issue)),
        }
    }

    /// Parse a sequence of lines
    pub fn parse_lines<I, S>(&self, lines: I) -> Result<ParseOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut output = ParseOutput::default();
        for line in lines {
            output.lines_read += 1;
            let line_no = output.lines_read;
            if let Some(frame) = self.step(line.as_ref(), line_no, &mut output.warnings)? {
                self.push_frame(&mut output, frame);
            }
        }

        self.log_summary(&output);
        Ok(output)
    }

    /// Parse a log file
    pub fn parse_file(&self, path: impl AsRef<Path>) -> Result<ParseOutput> {
        let path = path.as_ref();
        log::info!("Parsing log file: {:?}", path);

        let file = File::open(path)?;
        self.parse_reader(BufReader::new(file))
    }

    /// Parse every line of a reader
    ///
    /// Invalid UTF-8 is replaced rather than rejected, so a corrupt byte only
    /// affects its own line. I/O errors end the parse.
    pub fn parse_reader<R: BufRead>(&self, reader: R) -> Result<ParseOutput> {
        self.parse_reader_until(reader, &AtomicBool::new(false))
    }

    /// Parse a reader until it ends or `stop` is set
    ///
    /// `stop` is checked before each line; when it is set the frames decoded
    /// so far are returned with `cancelled = true`.
    pub fn parse_reader_until<R: BufRead>(&self, mut reader: R, stop: &AtomicBool) -> Result<ParseOutput> {
        let mut output = ParseOutput::default();
        let mut buf = Vec::new();

        loop {
            if stop.load(Ordering::Relaxed) {
                log::info!("Parse cancelled after {} lines", output.lines_read);
                output.cancelled = true;
                break;
            }

            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            output.lines_read += 1;

            let text = String::from_utf8_lossy(&buf);
            let line = text.trim_end_matches(|c: char| c == '\n' || c == '\r');
            if let Some(frame) = self.step(line, output.lines_read, &mut output.warnings)? {
                self.push_frame(&mut output, frame);
            }
        }

        self.log_summary(&output);
        Ok(output)
    }

    /// Lazily decode lines, one frame at a time
    ///
    /// Line-level warnings are collected on the stream. Under `Fail` the
    /// stream yields the error and then ends.
    pub fn stream<I, S>(&self, lines: I) -> FrameStream<'_, I::IntoIter>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        FrameStream {
            parser: self,
            lines: lines.into_iter(),
            lines_read: 0,
            warnings: Vec::new(),
            finished: false,
        }
    }

    /// Decode lines on the rayon thread pool and merge the results in order
    ///
    /// Produces the same output as [`CanParser::parse_lines`]; under `Fail`
    /// the error is the first failure in input order.
    #[cfg(feature = "parallel")]
    pub fn parse_lines_parallel<S>(&self, lines: &[S]) -> Result<ParseOutput>
    where
        S: AsRef<str> + Sync,
    {
        use rayon::prelude::*;

        let decoded: Vec<std::result::Result<Option<DecodedFrame>, ParseIssue>> = lines
            .par_iter()
            .enumerate()
            .map(|(index, line)| self.decode_line(line.as_ref(), index + 1, self.policy))
            .collect();

        let mut output = ParseOutput {
            lines_read: lines.len(),
            ..ParseOutput::default()
        };
        for result in decoded {
            match result {
                Ok(Some(frame)) => self.push_frame(&mut output, frame),
                Ok(None) => {}
                Err(issue) => self.route_line_issue(issue, &mut output.warnings)?,
            }
        }

        self.log_summary(&output);
        Ok(output)
    }

    /// Append a frame, recording the definition of its message on first sight
    fn push_frame(&self, output: &mut ParseOutput, frame: DecodedFrame) {
        if frame.is_known() && !output.spec.contains_key(&frame.pgn) {
            if let (_, Some(message)) = self.lookup(frame.arbitration_id) {
                output.spec.insert(message.pgn, message.clone());
            }
        }
        output.frames.push(frame);
    }

    /// Decode one line and route any line-level issue; `Err` only on abort
    fn step(
        &self,
        line: &str,
        line_no: usize,
        warnings: &mut Vec<ParseIssue>,
    ) -> std::result::Result<Option<DecodedFrame>, ParseIssue> {
        match self.decode_line(line, line_no, self.policy) {
            Ok(frame) => Ok(frame),
            Err(issue) => {
                self.route_line_issue(issue, warnings)?;
                Ok(None)
            }
        }
    }

    fn route_line_issue(
        &self,
        issue: ParseIssue,
        warnings: &mut Vec<ParseIssue>,
    ) -> std::result::Result<(), ParseIssue> {
        match self.policy.route(issue) {
            Disposition::Drop => Ok(()),
            Disposition::Record(issue) => {
                log::warn!("{}", issue);
                warnings.push(issue);
                Ok(())
            }
            Disposition::Abort(issue) => {
                log::debug!("Aborting parse: {}", issue);
                Err(issue)
            }
        }
    }

    /// Decode one line under `policy`
    ///
    /// Frame-level issues are routed here and end up on the frame. The
    /// returned error is either a line-level issue still to be routed, or a
    /// frame-level issue the policy turned into an abort. Standard 11-bit
    /// frames are never looked up in a spec.
    fn decode_line(
        &self,
        line: &str,
        line_no: usize,
        policy: ErrorPolicy,
    ) -> std::result::Result<Option<DecodedFrame>, ParseIssue> {
        if line.trim().is_empty() {
            return Ok(None);
        }

        let raw = extract_frame(self.matcher.as_ref(), line, line_no)?;
        let (address, message) = if raw.extended {
            self.lookup(raw.arbitration_id)
        } else {
            (FrameAddress::default(), None)
        };
        log::trace!(
            "Line {}: id 0x{:08X} -> PGN {} from 0x{:02X}",
            line_no,
            raw.arbitration_id,
            address.pgn,
            address.source_address
        );

        let mut warnings = Vec::new();
        let mut signals = Vec::new();
        let message_name = match message {
            Some(message) => {
                if let Some(expected) = message.expected_length {
                    if expected != raw.dlc() {
                        let issue = ParseIssue::LengthMismatch {
                            line: line_no,
                            pgn: message.pgn,
                            expected,
                            actual: raw.dlc(),
                        };
                        policy.apply(issue, &mut warnings)?;
                    }
                }

                let decoded = MessageDecoder::decode_message(&raw.payload, message, line_no);
                for issue in decoded.issues {
                    policy.apply(issue, &mut warnings)?;
                }
                signals = decoded.signals;
                Some(message.name.clone())
            }
            None if raw.extended => {
                let issue = ParseIssue::UnknownMessage {
                    line: line_no,
                    pgn: address.pgn,
                };
                policy.apply(issue, &mut warnings)?;
                None
            }
            None => {
                let issue = ParseIssue::StandardFrame {
                    line: line_no,
                    arbitration_id: raw.arbitration_id,
                };
                policy.apply(issue, &mut warnings)?;
                None
            }
        };

        Ok(Some(DecodedFrame {
            line: line_no,
            timestamp: raw.timestamp,
            arbitration_id: raw.arbitration_id,
            extended: raw.extended,
            priority: address.priority,
            pgn: address.pgn,
            source_address: address.source_address,
            destination_address: address.destination_address,
            message_name,
            payload: raw.payload,
            signals,
            warnings,
        }))
    }

    /// Find the message definition for an arbitration ID across loaded specs
    fn lookup(&self, arbitration_id: u32) -> (FrameAddress, Option<&MessageSpec>) {
        for (spec_type, db) in self.specs.iter() {
            let address = spec_type.protocol().decompose(arbitration_id);
            if let Some(message) = db.get(address.pgn) {
                return (address, Some(message));
            }
        }
        (DEFAULT_PROTOCOL.decompose(arbitration_id), None)
    }

    fn log_summary(&self, output: &ParseOutput) {
        log::info!(
            "Parsed {} lines: {} frames, {} line warnings",
            output.lines_read,
            output.frames.len(),
            output.warnings.len()
        );
    }
}

/// Iterator returned by [`CanParser::stream`]
pub struct FrameStream<'p, I> {
    parser: &'p CanParser,
    lines: I,
    lines_read: usize,
    warnings: Vec<ParseIssue>,
    finished: bool,
}

impl<I> FrameStream<'_, I> {
    /// Line-level warnings collected so far
    pub fn warnings(&self) -> &[ParseIssue] {
        &self.warnings
    }

    /// Take the collected warnings, leaving the stream's list empty
    pub fn take_warnings(&mut self) -> Vec<ParseIssue> {
        std::mem::take(&mut self.warnings)
    }

    pub fn lines_read(&self) -> usize {
        self.lines_read
    }
}

impl<I, S> Iterator for FrameStream<'_, I>
where
    I: Iterator<Item = S>,
    S: AsRef<str>,
{
    type Item = Result<DecodedFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        for line in self.lines.by_ref() {
            self.lines_read += 1;
            match self.parser.step(line.as_ref(), self.lines_read, &mut self.warnings) {
                Ok(Some(frame)) => return Some(Ok(frame)),
                Ok(None) => continue,
                Err(issue) => {
                    self.finished = true;
                    return Some(Err(ParserError::Aborted(issue)));
                }
            }
        }

        self.finished = true;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IssueKind, SignalValue};

    const SPEC: &str = r#"{
        "0xFEF1": {
            "name": "CCVS",
            "length": 8,
            "signals": [
                { "name": "Speed", "start_bit": 0, "bit_length": 8, "scale": 0.5, "unit": "km/h" }
            ]
        }
    }"#;

    fn parser(policy: ErrorPolicy) -> CanParser {
        let config = ParserConfig::new()
            .with_error_policy(policy)
            .with_spec(SpecType::J1939, SPEC);
        CanParser::new(config).unwrap()
    }

    #[test]
    fn test_parser_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CanParser>();
    }

    #[test]
    fn test_decode_known_frame() {
        let frame = parser(ErrorPolicy::Warn)
            .parse_line("(1234.5678) can0 18FEF100#0A00000000000000")
            .unwrap();
        assert_eq!(frame.priority, 6);
        assert_eq!(frame.pgn, 0xFEF1);
        assert_eq!(frame.source_address, 0);
        assert_eq!(frame.destination_address, None);
        assert_eq!(frame.message_name.as_deref(), Some("CCVS"));
        assert_eq!(frame.value("Speed"), Some(&SignalValue::Float(5.0)));
        assert!(frame.warnings.is_empty());
    }

    #[test]
    fn test_length_mismatch_is_advisory() {
        let frame = parser(ErrorPolicy::Fail)
            .parse_line("(1.0) can0 18FEF100#0A00")
            .unwrap();
        assert_eq!(frame.value("Speed"), Some(&SignalValue::Float(5.0)));
        assert_eq!(frame.warnings.len(), 1);
        assert_eq!(frame.warnings[0].kind(), IssueKind::LengthMismatch);
    }

    #[test]
    fn test_blank_lines_skipped() {
        let output = parser(ErrorPolicy::Fail)
            .parse_lines(["", "   ", "(1.0) can0 18FEF100#0A00000000000000"])
            .unwrap();
        assert_eq!(output.lines_read, 3);
        assert_eq!(output.frames.len(), 1);
        assert_eq!(output.frames[0].line, 3);
        assert!(output.warnings.is_empty());
    }

    #[test]
    fn test_strict_line_rejects_blank() {
        let err = parser(ErrorPolicy::Ignore).parse_line("").unwrap_err();
        assert_eq!(err.issue(), Some(&ParseIssue::UnmatchedLine { line: 1 }));
    }

    #[test]
    fn test_stream_ends_after_abort() {
        let p = parser(ErrorPolicy::Fail);
        let mut stream = p.stream(vec![
            "(1.0) can0 18FEF100#0A00000000000000",
            "garbage",
            "(2.0) can0 18FEF100#0A00000000000000",
        ]);
        assert!(stream.next().unwrap().is_ok());
        assert!(stream.next().unwrap().is_err());
        assert!(stream.next().is_none());
        assert_eq!(stream.lines_read(), 2);
    }

    #[test]
    fn test_stream_collects_warnings() {
        let p = parser(ErrorPolicy::Warn);
        let mut stream = p.stream(["garbage", "(2.0) can0 18FEF100#0A00000000000000"]);
        let frames: Vec<_> = stream.by_ref().collect::<Result<_>>().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(stream.warnings().len(), 1);
        assert_eq!(stream.take_warnings().len(), 1);
        assert!(stream.warnings().is_empty());
    }

    #[test]
    fn test_all_warnings_ordered_by_line() {
        let output = parser(ErrorPolicy::Warn)
            .parse_lines([
                "(1.0) can0 18FEF200#00",
                "garbage",
                "(2.0) can0 18FEF100#0A00",
            ])
            .unwrap();
        let lines: Vec<usize> = output.all_warnings().iter().map(|w| w.line()).collect();
        assert_eq!(lines, vec![1, 2, 3]);
    }

    #[test]
    fn test_standard_frame_skips_lookup() {
        let spec = r#"{ "0": { "name": "TSC1", "signals": [
            { "name": "OverrideControlMode", "start_bit": 0, "bit_length": 2 }
        ] } }"#;
        let p = CanParser::new(ParserConfig::new().with_spec(SpecType::J1939, spec)).unwrap();

        let frame = p.parse_line("(1.0) can0 100#01").unwrap();
        assert!(!frame.extended);
        assert_eq!(frame.arbitration_id, 0x100);
        assert_eq!(frame.message_name, None);
        assert_eq!(frame.destination_address, None);
        assert!(frame.signals.is_empty());
        assert_eq!(
            frame.warnings,
            vec![ParseIssue::StandardFrame { line: 1, arbitration_id: 0x100 }]
        );

        // The same PGN on an extended id still decodes
        let frame = p.parse_line("(1.0) can0 0C000003#01").unwrap();
        assert!(frame.extended);
        assert_eq!(frame.message_name.as_deref(), Some("TSC1"));
        assert_eq!(frame.value("OverrideControlMode"), Some(&SignalValue::Integer(1)));
    }

    #[test]
    fn test_output_records_seen_messages() {
        let output = parser(ErrorPolicy::Warn)
            .parse_lines([
                "(1.0) can0 18FEF100#0A00000000000000",
                "(2.0) can0 18FEF117#0B00000000000000",
                "(3.0) can0 18FEEE00#00",
                "(4.0) can0 123#00",
            ])
            .unwrap();
        assert_eq!(output.frames.len(), 4);
        assert_eq!(output.spec.keys().copied().collect::<Vec<_>>(), vec![0xFEF1]);
        assert_eq!(output.spec[&0xFEF1].name, "CCVS");
    }

    #[test]
    fn test_database_stats() {
        let stats = parser(ErrorPolicy::Warn).database_stats();
        assert_eq!(stats.num_messages, 1);
        assert_eq!(stats.num_signals, 1);
        assert!(parser(ErrorPolicy::Warn).database(SpecType::J1939).is_some());
    }

    #[test]
    fn test_invalid_pattern_fails_construction() {
        let config = ParserConfig::new().with_line_pattern("(?P<timestamp>[");
        assert!(matches!(
            CanParser::new(config),
            Err(ConstructionError::InvalidPattern(_))
        ));
    }
}
