// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Ties the error history, feature extraction, failure predictor, strategy
//! rules, and circuit breakers into the recovery engine's single entry
//! point. This crate never performs the recovery action itself: it returns
//! a [`RecoveryDecision`] describing what to do, and the caller (the
//! runtime owning the swap coordinator, build scheduler, and so on) carries
//! it out and reports back whether it worked.

use std::collections::BTreeMap;

use ember_core::{ErrorContext, Severity};
use tracing::{info, instrument, warn};

use crate::breaker::{BreakerConfig, BreakerRegistry, BreakerState};
use crate::error::RecoveryError;
use crate::features::{self, FeatureContext, FEATURE_COUNT};
use crate::history::{ErrorHistory, FailureDomain, DEFAULT_HISTORY_CAPACITY};
use crate::predictor::FailurePredictor;
use crate::strategy::{self, Strategy, DEFAULT_OVERRIDE_THRESHOLD};

/// What the caller should do in response to a reported error.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RecoveryDecision {
    /// Id assigned to the error in the history ring; pass this back to
    /// [`RecoveryEngine::report_outcome`].
    pub error_id: u64,
    /// The selected strategy.
    pub strategy: Strategy,
    /// Backoff to wait before reinvoking, set only when `strategy` is
    /// [`Strategy::Retry`].
    pub retry_backoff_micros: Option<u64>,
    /// The predictor's failure-probability estimate that fed strategy
    /// selection.
    pub model_confidence: f64,
}

/// The recovery engine: error history, failure predictor, and per-subsystem
/// circuit breakers, wired together behind one `report`/`report_outcome`
/// cycle.
///
/// Owns its state directly rather than locking internally, so a caller
/// sharing one engine across threads wraps the whole thing (e.g.
/// `parking_lot::Mutex<RecoveryEngine>`) at the call site, same as
/// `ember-swap`'s `SwapCoordinator`.
pub struct RecoveryEngine {
    history: ErrorHistory,
    predictor: FailurePredictor,
    breakers: BreakerRegistry,
    override_threshold: f64,
    pending: BTreeMap<u64, ([f64; FEATURE_COUNT], String)>,
    retry_attempts: BTreeMap<String, u32>,
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoveryEngine {
    /// Creates an engine with the default history capacity, a fresh
    /// predictor, and default breaker config.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// Creates an engine with a custom history ring capacity.
    #[must_use]
    pub fn with_capacity(history_capacity: usize) -> Self {
        Self {
            history: ErrorHistory::new(history_capacity),
            predictor: FailurePredictor::new(),
            breakers: BreakerRegistry::new(BreakerConfig::default()),
            override_threshold: DEFAULT_OVERRIDE_THRESHOLD,
            pending: BTreeMap::new(),
            retry_attempts: BTreeMap::new(),
        }
    }

    /// Configures a non-default breaker for `subsystem`.
    pub fn configure_breaker(&mut self, subsystem: impl Into<String>, config: BreakerConfig) {
        self.breakers.configure(subsystem, config);
    }

    /// Checks whether `subsystem`'s breaker currently allows a call,
    /// advancing an expired open breaker to half-open as a side effect.
    /// Unlike [`Self::report`], this records nothing in history and assigns
    /// no error id — for call sites that need to gate an attempt before it
    /// happens, not describe one that already failed.
    ///
    /// # Errors
    ///
    /// Returns [`RecoveryError::CircuitOpen`] if the breaker currently
    /// refuses calls.
    pub fn check_breaker(&mut self, subsystem: &str, now_micros: u64) -> Result<(), RecoveryError> {
        if self.breakers.allow(subsystem, now_micros) {
            Ok(())
        } else {
            Err(RecoveryError::CircuitOpen { subsystem: subsystem.to_string() })
        }
    }

    /// Directly records a successful call against `subsystem`'s breaker, for
    /// call sites (a completed swap, say) with no prior [`Self::report`]
    /// error id to close out through [`Self::report_outcome`].
    pub fn record_breaker_success(&mut self, subsystem: &str, now_micros: u64) {
        self.breakers.record_success(subsystem, now_micros);
    }

    /// Current breaker state for `subsystem`.
    #[must_use]
    pub fn breaker_state(&self, subsystem: &str) -> BreakerState {
        self.breakers.state(subsystem)
    }

    /// The predictor's current accuracy EMA.
    #[must_use]
    pub fn model_accuracy(&self) -> f64 {
        self.predictor.accuracy_ema()
    }

    /// Number of errors currently held in the history ring.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Records `context`, extracts its feature vector, predicts failure
    /// probability, and selects a strategy. Returns [`RecoveryError::CircuitOpen`]
    /// without recording anything if `context.source`'s breaker currently
    /// refuses calls.
    ///
    /// # Errors
    ///
    /// Returns [`RecoveryError::CircuitOpen`] if the subsystem's breaker is open.
    #[instrument(
        skip(self, context, feature_ctx),
        fields(source = %context.source, severity = ?context.severity)
    )]
    pub fn report(
        &mut self,
        context: ErrorContext,
        domain: FailureDomain,
        feature_ctx: FeatureContext,
        now_micros: u64,
    ) -> Result<RecoveryDecision, RecoveryError> {
        let subsystem = context.source.clone();
        if !self.breakers.allow(&subsystem, now_micros) {
            warn!(subsystem, "breaker open, recovery refused");
            return Err(RecoveryError::CircuitOpen { subsystem });
        }

        let severity = context.severity;
        let features = features::extract(&context, domain, feature_ctx);
        let error_id = self.history.record(context, domain);
        let confidence = self.predictor.predict(&features);
        let strategy = strategy::select(severity, domain, confidence, self.override_threshold);

        let retry_backoff_micros = if strategy == Strategy::Retry {
            let attempts = self.retry_attempts.entry(subsystem.clone()).or_insert(0);
            let backoff = strategy::next_retry_backoff_micros(*attempts);
            *attempts += 1;
            Some(backoff)
        } else {
            None
        };

        self.pending.insert(error_id, (features, subsystem));
        info!(error_id, ?strategy, confidence, "recovery strategy selected");
        Ok(RecoveryDecision {
            error_id,
            strategy,
            retry_backoff_micros,
            model_confidence: confidence,
        })
    }

    /// Reports whether the strategy chosen for `error_id` actually prevented
    /// further failure: folds the outcome into the predictor via gradient
    /// descent and updates the subsystem's breaker.
    ///
    /// # Errors
    ///
    /// Returns [`RecoveryError::UnknownErrorId`] if `error_id` was never
    /// returned by [`Self::report`] or has already had its outcome reported.
    pub fn report_outcome(
        &mut self,
        error_id: u64,
        prevented_further_failure: bool,
        now_micros: u64,
    ) -> Result<(), RecoveryError> {
        let (features, subsystem) =
            self.pending.remove(&error_id).ok_or(RecoveryError::UnknownErrorId(error_id))?;

        self.predictor.update(&features, !prevented_further_failure);
        if prevented_further_failure {
            self.breakers.record_success(&subsystem, now_micros);
            self.retry_attempts.remove(&subsystem);
        } else {
            self.breakers.record_failure(&subsystem, now_micros);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ember_core::{Category, ResourceSnapshot};

    fn context(severity: Severity) -> ErrorContext {
        ErrorContext {
            id: 0,
            source: "ember-swap".to_string(),
            category: Category::Swap,
            severity,
            timestamp_micros: 0,
            detail: "quiesce timeout".to_string(),
            resource_snapshot: ResourceSnapshot::default(),
        }
    }

    #[test]
    fn report_selects_a_strategy_and_assigns_an_id() {
        let mut engine = RecoveryEngine::new();
        let decision = engine
            .report(context(Severity::Error), FailureDomain::Io, FeatureContext::default(), 0)
            .unwrap();
        assert_eq!(decision.strategy, Strategy::Retry);
        assert_eq!(decision.retry_backoff_micros, Some(100_000));
        assert_eq!(engine.history_len(), 1);
    }

    #[test]
    fn outcome_updates_model_and_breaker() {
        let mut engine = RecoveryEngine::new();
        let breaker_config = BreakerConfig { failure_threshold: 1, ..BreakerConfig::default() };
        engine.configure_breaker("ember-swap", breaker_config);
        let decision = engine
            .report(context(Severity::Error), FailureDomain::Io, FeatureContext::default(), 0)
            .unwrap();
        engine.report_outcome(decision.error_id, false, 0).unwrap();
        assert_eq!(engine.breaker_state("ember-swap"), BreakerState::Open);
    }

    #[test]
    fn unknown_error_id_is_rejected() {
        let mut engine = RecoveryEngine::new();
        let err = engine.report_outcome(999, true, 0).unwrap_err();
        assert!(matches!(err, RecoveryError::UnknownErrorId(999)));
    }

    #[test]
    fn open_breaker_refuses_further_reports() {
        let mut engine = RecoveryEngine::new();
        let breaker_config = BreakerConfig { failure_threshold: 1, ..BreakerConfig::default() };
        engine.configure_breaker("ember-swap", breaker_config);
        let decision = engine
            .report(context(Severity::Error), FailureDomain::Io, FeatureContext::default(), 0)
            .unwrap();
        engine.report_outcome(decision.error_id, false, 0).unwrap();
        let err = engine
            .report(context(Severity::Error), FailureDomain::Io, FeatureContext::default(), 1)
            .unwrap_err();
        assert!(matches!(err, RecoveryError::CircuitOpen { .. }));
    }

    #[test]
    fn retry_backoff_grows_across_repeated_reports_for_same_subsystem() {
        let mut engine = RecoveryEngine::new();
        let network_error = || context(Severity::Warning);
        let ctx = FeatureContext::default();
        let first = engine.report(network_error(), FailureDomain::Network, ctx, 0).unwrap();
        engine.report_outcome(first.error_id, false, 0).unwrap();
        let second = engine.report(network_error(), FailureDomain::Network, ctx, 0).unwrap();
        assert!(second.retry_backoff_micros.unwrap() > first.retry_backoff_micros.unwrap());
    }

    #[test]
    fn check_breaker_gates_calls_without_touching_history() {
        let mut engine = RecoveryEngine::new();
        let config = BreakerConfig { failure_threshold: 1, ..BreakerConfig::default() };
        engine.configure_breaker("ember-swap", config);
        let decision = engine
            .report(context(Severity::Error), FailureDomain::Io, FeatureContext::default(), 0)
            .unwrap();
        engine.report_outcome(decision.error_id, false, 0).unwrap();

        let err = engine.check_breaker("ember-swap", 0).unwrap_err();
        assert!(matches!(err, RecoveryError::CircuitOpen { .. }));
        assert_eq!(engine.history_len(), 1, "check_breaker must not record history");
    }

    #[test]
    fn record_breaker_success_closes_a_half_open_breaker() {
        let mut engine = RecoveryEngine::new();
        let config = BreakerConfig {
            failure_threshold: 1,
            timeout_micros: 1_000,
            success_threshold: 1,
        };
        engine.configure_breaker("ember-swap", config);
        let decision = engine
            .report(context(Severity::Error), FailureDomain::Io, FeatureContext::default(), 0)
            .unwrap();
        engine.report_outcome(decision.error_id, false, 0).unwrap();
        assert_eq!(engine.breaker_state("ember-swap"), BreakerState::Open);

        engine.check_breaker("ember-swap", 1_000).unwrap();
        assert_eq!(engine.breaker_state("ember-swap"), BreakerState::HalfOpen);
        engine.record_breaker_success("ember-swap", 1_000);
        assert_eq!(engine.breaker_state("ember-swap"), BreakerState::Closed);
    }
}
