//! Message specifications
//!
//! Loads spec sources into an immutable [`SpecDatabase`] keyed by PGN.

mod annex;
pub mod database;
mod dbc;
pub mod source;

pub use database::{ByteOrder, DatabaseStats, MessageSpec, SignalSpec, SpecDatabase};
