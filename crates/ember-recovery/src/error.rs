// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error taxonomy for the recovery engine itself.

use ember_core::{Category, ReportableError, Severity};

/// Failure modes the recovery engine can itself report. Distinct from the
/// [`ember_core::ErrorContext`] records it stores: those describe failures
/// from elsewhere in the runtime, these describe the engine failing to act
/// on one.
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    /// No strategy was executed because the affected subsystem's breaker is
    /// open.
    #[error("circuit open for {subsystem:?}, recovery refused")]
    CircuitOpen {
        /// Subsystem the breaker guards.
        subsystem: String,
    },
    /// `rollback` was selected but no checkpoint exists to roll back to.
    #[error("no checkpoint available to roll back {module:?}")]
    NoCheckpoint {
        /// Module that had no recorded checkpoint.
        module: String,
    },
    /// An outcome was reported for an error id the engine never recorded.
    #[error("unknown error id {0}")]
    UnknownErrorId(u64),
}

impl ReportableError for RecoveryError {
    fn category(&self) -> Category {
        match self {
            Self::CircuitOpen { .. } => Category::CircuitOpen,
            Self::NoCheckpoint { .. } => Category::Checkpoint,
            Self::UnknownErrorId(_) => Category::Internal,
        }
    }

    fn severity(&self) -> Severity {
        match self {
            Self::CircuitOpen { .. } => Severity::Warning,
            Self::NoCheckpoint { .. } => Severity::Error,
            Self::UnknownErrorId(_) => Severity::Warning,
        }
    }
}
