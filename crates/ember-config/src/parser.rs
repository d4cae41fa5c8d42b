// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The structured-config parser seam, used only by the config service.
//!
//! The parser itself is an external collaborator — the core only depends on
//! the `parse(bytes) -> tree | parse_error` contract. [`JsonParser`] is the
//! default implementation, backed by `serde_json`.

use crate::value::ConfigValue;

/// Where a parse error occurred, when the underlying parser can report it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParsePosition {
    /// 1-based line number.
    pub line: usize,
    /// 1-based column number.
    pub column: usize,
}

/// A structured-config parse failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("config parse error at {position:?}: {message}")]
pub struct ParseError {
    /// Where parsing failed.
    pub position: ParsePosition,
    /// Human-readable description.
    pub message: String,
}

/// Parses raw bytes into a [`ConfigValue`] tree.
///
/// Implementations are opaque to the rest of the crate: C12 only relies on
/// this contract, never on a specific grammar.
pub trait ConfigParser {
    /// Parses `bytes` into a tree, or reports where parsing failed.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] if `bytes` is not valid input for this parser.
    fn parse(&self, bytes: &[u8]) -> Result<ConfigValue, ParseError>;
}

/// JSON-backed [`ConfigParser`], the runtime's default.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonParser;

impl ConfigParser for JsonParser {
    fn parse(&self, bytes: &[u8]) -> Result<ConfigValue, ParseError> {
        serde_json::from_slice(bytes).map_err(|err| ParseError {
            position: ParsePosition {
                line: err.line(),
                column: err.column(),
            },
            message: err.to_string(),
        })
    }
}
