// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Strategy selection: the default-rules table, overridden by the predictor
//! only when it disagrees with high confidence.

use ember_core::Severity;

use crate::history::FailureDomain;

/// Default minimum time between retry attempts.
pub const RETRY_INITIAL_BACKOFF_MICROS: u64 = 100_000;
/// Retry backoff never grows past this.
pub const RETRY_MAX_BACKOFF_MICROS: u64 = 5_000_000;
/// Model confidence above which its recommendation overrides the rule table.
pub const DEFAULT_OVERRIDE_THRESHOLD: f64 = 0.8;

/// A recovery strategy, selected per-error and executed by the runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// No action; the error was informational.
    None,
    /// Reinvoke after an exponentially growing backoff.
    Retry,
    /// Switch to a pre-registered alternative code path.
    Fallback,
    /// Restore the module's most recent good checkpoint.
    Rollback,
    /// Open the circuit breaker guarding the failing subsystem.
    Isolate,
    /// Unload and reload the module with a fresh state slice.
    Restart,
    /// Ask the quality optimizer to drop a tier.
    ScaleDown,
    /// Reduce functionality without a full restart (model-recommended only;
    /// the rule table never selects this directly).
    GracefulDegrade,
    /// Defer to an operator; automatic recovery is not attempting further
    /// action (model-recommended only).
    Escalate,
}

/// Picks a strategy by the fixed rule table:
///
/// | severity      | domain             | strategy  |
/// |---------------|--------------------|-----------|
/// | critical/fatal | memory            | restart   |
/// | critical/fatal | security          | isolate   |
/// | critical/fatal | perf              | scale_down|
/// | critical/fatal | anything else     | rollback  |
/// | non-critical  | compile/io/network | retry     |
/// | non-critical  | runtime            | fallback  |
/// | non-critical  | config             | rollback  |
/// | non-critical  | memory/resource/security/perf | retry (fallback; no named rule covers these) |
#[must_use]
pub fn select_by_rules(severity: Severity, domain: FailureDomain) -> Strategy {
    use FailureDomain::{Compile, Config, Io, Memory, Network, Perf, Resource, Runtime, Security};

    let critical = severity >= Severity::Critical;
    match (critical, domain) {
        (true, Memory) => Strategy::Restart,
        (true, Security) => Strategy::Isolate,
        (true, Perf) => Strategy::ScaleDown,
        (true, _) => Strategy::Rollback,
        (false, Compile | Io | Network) => Strategy::Retry,
        (false, Runtime) => Strategy::Fallback,
        (false, Config) => Strategy::Rollback,
        (false, Memory | Resource | Security | Perf) => Strategy::Retry,
    }
}

/// Selects the strategy to execute: the rule table's pick, overridden with
/// [`Strategy::Escalate`] when the model's predicted failure probability
/// for that pick exceeds `override_threshold`. The rules are normative; the
/// model only gates when to defer to an operator instead of trusting them.
#[must_use]
pub fn select(
    severity: Severity,
    domain: FailureDomain,
    model_confidence: f64,
    override_threshold: f64,
) -> Strategy {
    let rule_pick = select_by_rules(severity, domain);
    if model_confidence > override_threshold {
        Strategy::Escalate
    } else {
        rule_pick
    }
}

/// Computes the next retry backoff, doubling from
/// [`RETRY_INITIAL_BACKOFF_MICROS`] and capping at
/// [`RETRY_MAX_BACKOFF_MICROS`].
#[must_use]
pub fn next_retry_backoff_micros(previous_attempts: u32) -> u64 {
    RETRY_INITIAL_BACKOFF_MICROS
        .saturating_mul(1u64 << previous_attempts.min(32))
        .min(RETRY_MAX_BACKOFF_MICROS)
}
