// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error taxonomy for the telemetry aggregator and analyzer.

use ember_core::{Category, ReportableError, Severity};

/// Failure modes for aggregator/analyzer queries. The aggregator's `record`
/// never fails: telemetry is advisory and must never itself become a source
/// of a swap or build failure.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// A query named a subsystem with no recorded samples.
    #[error("no telemetry recorded for subsystem {0:?}")]
    UnknownSubsystem(String),
    /// A rolling window query asked for more samples than the ring holds.
    #[error("window of {requested} exceeds {available} available samples for {subsystem:?}")]
    WindowTooLarge {
        /// Subsystem the window was requested against.
        subsystem: String,
        /// Samples requested.
        requested: usize,
        /// Samples actually held.
        available: usize,
    },
}

impl ReportableError for TelemetryError {
    fn category(&self) -> Category {
        Category::Internal
    }

    fn severity(&self) -> Severity {
        Severity::Warning
    }
}
