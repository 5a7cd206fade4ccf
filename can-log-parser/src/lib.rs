//! CAN Log Parser Library
//!
//! A reusable library for turning text CAN logs (such as `candump -l`
//! output) into decoded J1939 frames with physical signal values.
//!
//! # Architecture
//!
//! Each line goes through the same pipeline:
//! - A line matcher extracts timestamp, arbitration ID and payload
//! - The ID is split into priority, PGN, source and destination address
//! - The PGN is looked up in the loaded spec databases
//! - Every signal of the message is extracted, scaled and labelled
//!
//! Standard 11-bit frames have no J1939 addressing; they are passed through
//! without signals. Spec sources can be a JSON catalog, a J1939 digital annex
//! export or a DBC file. Results export to JSON or CSV.
//!
//! Problems along the way are handled by one [`ErrorPolicy`] chosen when the
//! parser is built: dropped, recorded as warnings, or turned into an error.
//!
//! The library does NOT:
//! - Reassemble multi-packet (transport protocol) messages
//! - Decode CAN FD payloads longer than 8 bytes
//! - Install a logger (use `env_logger` or similar in the application)
//!
//! # Example Usage
//!
//! ```no_run
//! use can_log_parser::{load_config, CanParser};
//!
//! // Load policy, line format and spec files from a TOML configuration
//! let config = load_config("parser.toml").unwrap();
//! let parser = CanParser::new(config).unwrap();
//!
//! let output = parser.parse_file("trace.log").unwrap();
//! for frame in &output.frames {
//!     for signal in &frame.signals {
//!         println!("{:.6} PGN {} {} = {}", frame.timestamp, frame.pgn, signal.name, signal.value);
//!     }
//! }
//! for warning in output.all_warnings() {
//!     eprintln!("{}", warning);
//! }
//! ```

// Public modules
pub mod config;
pub mod line_pattern;
pub mod parser;
pub mod policy;
pub mod protocol;
pub mod signal_decoder;
pub mod spec;
pub mod types;

mod export;

// Re-export main types for convenience
pub use config::{load_config, ParserConfig};
pub use line_pattern::{LineCaptures, LineMatcher, LineTemplate, RegexLineMatcher};
pub use parser::{CanParser, FrameStream, ParseOutput};
pub use policy::ErrorPolicy;
pub use protocol::{FrameAddress, J1939Id, Protocol, SpecType};
pub use spec::{ByteOrder, DatabaseStats, MessageSpec, SignalSpec, SpecDatabase};
pub use types::{
    ConstructionError, DecodedFrame, DecodedSignal, IssueKind, ParseIssue, ParserError, Result,
    SignalValue, Timestamp,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
