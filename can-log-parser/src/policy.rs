//! Error policy
//!
//! The policy is a plain `Copy` value chosen once per parser and handed to
//! every step that can fail: line matching, ID decomposition and per-signal
//! decoding. It holds no state, so parsers sharing it across threads stay
//! independent.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::{ConstructionError, ParseIssue};

pub const ERROR_IGNORE: &str = "ignore";
pub const ERROR_WARN: &str = "warn";
pub const ERROR_FAIL: &str = "fail";

/// How content problems in the input are handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Drop failures silently; only clean data is returned
    Ignore,
    /// Record failures as warnings and keep going
    #[default]
    Warn,
    /// Abort on the first failure
    #[serde(alias = "error")]
    Fail,
}

/// What to do with a single issue under a given policy
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Drop,
    Record(ParseIssue),
    Abort(ParseIssue),
}

impl ErrorPolicy {
    /// Decide the fate of one issue.
    ///
    /// Informational issues (unknown PGN, unmapped enum value, length
    /// mismatch) are recorded under `Warn` and `Fail` and never abort.
    pub fn route(self, issue: ParseIssue) -> Disposition {
        match self {
            ErrorPolicy::Ignore => Disposition::Drop,
            ErrorPolicy::Warn => Disposition::Record(issue),
            ErrorPolicy::Fail if issue.is_informational() => Disposition::Record(issue),
            ErrorPolicy::Fail => Disposition::Abort(issue),
        }
    }

    /// Route an issue into `sink`, returning it as an error if it must abort
    pub fn apply(self, issue: ParseIssue, sink: &mut Vec<ParseIssue>) -> Result<(), ParseIssue> {
        match self.route(issue) {
            Disposition::Drop => Ok(()),
            Disposition::Record(issue) => {
                log::debug!("{}", issue);
                sink.push(issue);
                Ok(())
            }
            Disposition::Abort(issue) => Err(issue),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorPolicy::Ignore => ERROR_IGNORE,
            ErrorPolicy::Warn => ERROR_WARN,
            ErrorPolicy::Fail => ERROR_FAIL,
        }
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ErrorPolicy {
    type Err = ConstructionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            ERROR_IGNORE => Ok(ErrorPolicy::Ignore),
            ERROR_WARN => Ok(ErrorPolicy::Warn),
            ERROR_FAIL | "error" => Ok(ErrorPolicy::Fail),
            other => Err(ConstructionError::Config(format!(
                "unknown error policy '{}' (expected ignore, warn or fail)",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unmatched() -> ParseIssue {
        ParseIssue::UnmatchedLine { line: 3 }
    }

    fn unknown() -> ParseIssue {
        ParseIssue::UnknownMessage { line: 3, pgn: 0xFEF1 }
    }

    #[test]
    fn test_route_failures() {
        assert_eq!(ErrorPolicy::Ignore.route(unmatched()), Disposition::Drop);
        assert_eq!(ErrorPolicy::Warn.route(unmatched()), Disposition::Record(unmatched()));
        assert_eq!(ErrorPolicy::Fail.route(unmatched()), Disposition::Abort(unmatched()));
    }

    #[test]
    fn test_informational_never_aborts() {
        assert_eq!(ErrorPolicy::Ignore.route(unknown()), Disposition::Drop);
        assert_eq!(ErrorPolicy::Warn.route(unknown()), Disposition::Record(unknown()));
        assert_eq!(ErrorPolicy::Fail.route(unknown()), Disposition::Record(unknown()));
    }

    #[test]
    fn test_apply_collects_records() {
        let mut sink = Vec::new();
        ErrorPolicy::Warn.apply(unmatched(), &mut sink).unwrap();
        ErrorPolicy::Ignore.apply(unmatched(), &mut sink).unwrap();
        assert_eq!(sink.len(), 1);

        let err = ErrorPolicy::Fail.apply(unmatched(), &mut sink).unwrap_err();
        assert_eq!(err, unmatched());
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_parse_policy_names() {
        assert_eq!("IGNORE".parse::<ErrorPolicy>().unwrap(), ErrorPolicy::Ignore);
        assert_eq!(" warn ".parse::<ErrorPolicy>().unwrap(), ErrorPolicy::Warn);
        assert_eq!("error".parse::<ErrorPolicy>().unwrap(), ErrorPolicy::Fail);
        assert!("loud".parse::<ErrorPolicy>().is_err());
        assert_eq!(ErrorPolicy::Fail.to_string(), "fail");
    }
}
