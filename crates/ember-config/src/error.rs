// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error taxonomy for config load/parse/validate/store operations.

use ember_core::error::{Category, ReportableError, Severity};

use crate::parser::ParseError;

/// Errors raised by [`crate::store::ConfigStore`] and [`crate::service::ConfigService`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No stored value under the requested key.
    #[error("no config stored for key {0}")]
    NotFound(String),

    /// The new content failed to parse; the previous tree is retained.
    #[error(transparent)]
    ConfigParseError(#[from] ParseError),

    /// The new tree failed schema validation; the previous tree is retained.
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// No backup exists to roll back to.
    #[error("no backup tree to roll back to for key {0}")]
    NoBackup(String),

    /// Underlying storage I/O failure.
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config root directory could not be resolved.
    #[error("could not resolve config directory: {0}")]
    Other(String),
}

impl ReportableError for ConfigError {
    fn category(&self) -> Category {
        Category::Config
    }

    fn severity(&self) -> Severity {
        match self {
            Self::NotFound(_) | Self::NoBackup(_) => Severity::Warning,
            Self::ConfigParseError(_) | Self::SchemaViolation(_) => Severity::Error,
            Self::Io(_) | Self::Other(_) => Severity::Critical,
        }
    }
}
