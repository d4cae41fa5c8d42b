// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The cross-cutting error taxonomy: every crate's local `thiserror` enum
//! implements [`ReportableError`] so the recovery engine (`ember-recovery`)
//! can classify any error without depending on the crate that raised it.

use serde::{Deserialize, Serialize};

/// Error kind, as enumerated in the error taxonomy.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Category {
    /// Source failed to build.
    Compile,
    /// Cache integrity failure.
    Cache,
    /// Circular dependency or missing node.
    Dependency,
    /// Corruption, checksum mismatch, or compression round-trip failure.
    State,
    /// Quiesce timeout, transform failure, or post-swap validation failure.
    Swap,
    /// Missing or corrupt checkpoint.
    Checkpoint,
    /// Recovery strategy unavailable or itself failed.
    Recovery,
    /// Operation refused by an open circuit breaker.
    CircuitOpen,
    /// Any bounded operation exceeded its budget.
    Timeout,
    /// Parse or schema violation in a live-reloaded config.
    Config,
    /// Invariant violation; fatal.
    Internal,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Compile => "compile",
            Self::Cache => "cache",
            Self::Dependency => "dependency",
            Self::State => "state",
            Self::Swap => "swap",
            Self::Checkpoint => "checkpoint",
            Self::Recovery => "recovery",
            Self::CircuitOpen => "circuit_open",
            Self::Timeout => "timeout",
            Self::Config => "config",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Severity of an error context, used to gate automatic recovery.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum Severity {
    /// Informational; no action taken.
    Info,
    /// Worth surfacing, but not actionable on its own.
    Warning,
    /// A local operation failed.
    Error,
    /// The failure threatens correctness of live state.
    Critical,
    /// The process cannot continue safely.
    Fatal,
}

/// A structured record of a single error, as produced by every fallible
/// operation in the runtime and consumed by the recovery engine's history
/// ring, sized around 4096 entries.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Monotonically increasing id, assigned by whoever records the error.
    pub id: u64,
    /// Subsystem that raised the error (e.g. `"ember-swap"`).
    pub source: String,
    /// Error taxonomy category.
    pub category: Category,
    /// Severity used for recovery-strategy gating.
    pub severity: Severity,
    /// Microseconds since the Unix epoch, supplied by the caller (so this
    /// type stays free of `SystemTime::now()` and is trivially testable).
    pub timestamp_micros: u64,
    /// Free-text detail for logs and operators.
    pub detail: String,
    /// Best-effort resource snapshot at the time of the error (memory bytes,
    /// CPU percent); absent fields are `None`, never guessed.
    pub resource_snapshot: ResourceSnapshot,
}

/// Resource snapshot attached to an [`ErrorContext`]. Fields are optional
/// because some callers (e.g. a build-cache miss) have nothing meaningful to
/// report; `None` is preferred over a fabricated zero.
#[derive(Clone, Copy, Default, Debug, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    /// Resident memory in bytes, if known.
    pub memory_bytes: Option<u64>,
    /// CPU utilization percent, if known.
    pub cpu_percent: Option<f32>,
}

/// Implemented by every crate-local error enum so they can be classified and
/// posted to the recovery engine without a dependency from that crate on
/// `ember-recovery`.
pub trait ReportableError: std::error::Error {
    /// Taxonomy category this error belongs to.
    fn category(&self) -> Category;

    /// Severity of this particular occurrence.
    fn severity(&self) -> Severity;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_display_is_snake_case() {
        assert_eq!(Category::CircuitOpen.to_string(), "circuit_open");
        assert_eq!(Category::Compile.to_string(), "compile");
    }

    #[test]
    fn severity_ordering_escalates() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Critical);
        assert!(Severity::Critical < Severity::Fatal);
    }
}
