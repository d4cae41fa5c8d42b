// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-subsystem circuit breakers: closed/open/half-open, gating calls by
//! consecutive failure/success counts rather than a windowed rate.

use std::collections::BTreeMap;

/// Circuit breaker state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls proceed normally.
    Closed,
    /// Calls are refused until the cooldown elapses.
    Open,
    /// One probe call is allowed through to test recovery.
    HalfOpen,
}

/// Tunables for one breaker.
#[derive(Clone, Copy, Debug)]
pub struct BreakerConfig {
    /// Consecutive failures, while closed, that trip the breaker open.
    pub failure_threshold: u32,
    /// Time an open breaker waits before allowing a half-open probe.
    pub timeout_micros: u64,
    /// Consecutive successes, while half-open, needed to close again.
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_micros: 5_000_000,
            success_threshold: 1,
        }
    }
}

/// A single subsystem's breaker.
#[derive(Clone, Copy, Debug)]
struct Breaker {
    state: BreakerState,
    config: BreakerConfig,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_change_micros: u64,
}

impl Breaker {
    fn new(config: BreakerConfig) -> Self {
        Self {
            state: BreakerState::Closed,
            config,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_change_micros: 0,
        }
    }

    fn allow(&mut self, now_micros: u64) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = now_micros.saturating_sub(self.last_change_micros);
                if elapsed >= self.config.timeout_micros {
                    self.state = BreakerState::HalfOpen;
                    self.last_change_micros = now_micros;
                    self.consecutive_successes = 0;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => true,
        }
    }

    fn record_success(&mut self, now_micros: u64) {
        match self.state {
            BreakerState::Closed => self.consecutive_failures = 0,
            BreakerState::HalfOpen => {
                self.consecutive_successes += 1;
                if self.consecutive_successes >= self.config.success_threshold {
                    self.state = BreakerState::Closed;
                    self.consecutive_failures = 0;
                    self.consecutive_successes = 0;
                    self.last_change_micros = now_micros;
                }
            }
            BreakerState::Open => {}
        }
    }

    fn record_failure(&mut self, now_micros: u64) {
        match self.state {
            BreakerState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.state = BreakerState::Open;
                    self.last_change_micros = now_micros;
                }
            }
            BreakerState::HalfOpen => {
                self.state = BreakerState::Open;
                self.consecutive_successes = 0;
                self.last_change_micros = now_micros;
            }
            BreakerState::Open => {}
        }
    }
}

/// Owns one [`Breaker`] per subsystem name, created lazily with
/// `default_config` on first use.
pub struct BreakerRegistry {
    default_config: BreakerConfig,
    breakers: BTreeMap<String, Breaker>,
}

impl BreakerRegistry {
    /// Creates a registry using `default_config` for subsystems with no
    /// explicit override.
    #[must_use]
    pub fn new(default_config: BreakerConfig) -> Self {
        Self {
            default_config,
            breakers: BTreeMap::new(),
        }
    }

    /// Registers `subsystem` with a non-default config. A no-op if the
    /// subsystem already has a breaker.
    pub fn configure(&mut self, subsystem: impl Into<String>, config: BreakerConfig) {
        self.breakers.entry(subsystem.into()).or_insert_with(|| Breaker::new(config));
    }

    /// Whether a call guarded by `subsystem`'s breaker may proceed. Moves an
    /// open breaker to half-open once its cooldown has elapsed.
    pub fn allow(&mut self, subsystem: &str, now_micros: u64) -> bool {
        let default_config = self.default_config;
        self.breakers
            .entry(subsystem.to_string())
            .or_insert_with(|| Breaker::new(default_config))
            .allow(now_micros)
    }

    /// Records a successful call against `subsystem`'s breaker.
    pub fn record_success(&mut self, subsystem: &str, now_micros: u64) {
        let default_config = self.default_config;
        self.breakers
            .entry(subsystem.to_string())
            .or_insert_with(|| Breaker::new(default_config))
            .record_success(now_micros);
    }

    /// Records a failed call against `subsystem`'s breaker, possibly
    /// tripping it open.
    pub fn record_failure(&mut self, subsystem: &str, now_micros: u64) {
        let default_config = self.default_config;
        self.breakers
            .entry(subsystem.to_string())
            .or_insert_with(|| Breaker::new(default_config))
            .record_failure(now_micros);
    }

    /// Current state of `subsystem`'s breaker, or `Closed` if it has never
    /// been touched.
    #[must_use]
    pub fn state(&self, subsystem: &str) -> BreakerState {
        self.breakers.get(subsystem).map_or(BreakerState::Closed, |b| b.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_open_after_consecutive_failures() {
        let mut registry = BreakerRegistry::new(BreakerConfig {
            failure_threshold: 3,
            ..BreakerConfig::default()
        });
        for t in 0..3 {
            registry.record_failure("traffic", t);
        }
        assert_eq!(registry.state("traffic"), BreakerState::Open);
        assert!(!registry.allow("traffic", 2));
    }

    #[test]
    fn half_opens_after_timeout_and_closes_on_success() {
        let mut registry = BreakerRegistry::new(BreakerConfig {
            failure_threshold: 1,
            timeout_micros: 1_000,
            success_threshold: 2,
        });
        registry.record_failure("traffic", 0);
        assert_eq!(registry.state("traffic"), BreakerState::Open);
        assert!(registry.allow("traffic", 1_000));
        assert_eq!(registry.state("traffic"), BreakerState::HalfOpen);
        registry.record_success("traffic", 1_000);
        registry.record_success("traffic", 1_000);
        assert_eq!(registry.state("traffic"), BreakerState::Closed);
    }

    #[test]
    fn any_failure_in_half_open_reopens() {
        let mut registry = BreakerRegistry::new(BreakerConfig {
            failure_threshold: 1,
            timeout_micros: 1_000,
            success_threshold: 2,
        });
        registry.record_failure("traffic", 0);
        registry.allow("traffic", 1_000);
        registry.record_failure("traffic", 1_000);
        assert_eq!(registry.state("traffic"), BreakerState::Open);
    }

    #[test]
    fn unconfigured_subsystem_starts_closed() {
        let registry = BreakerRegistry::new(BreakerConfig::default());
        assert_eq!(registry.state("never-touched"), BreakerState::Closed);
    }

    #[test]
    fn one_success_after_timeout_closes_with_default_threshold() {
        let mut registry = BreakerRegistry::new(BreakerConfig {
            failure_threshold: 3,
            ..BreakerConfig::default()
        });
        for t in 0..3 {
            registry.record_failure("traffic", t);
        }
        assert_eq!(registry.state("traffic"), BreakerState::Open);
        assert!(!registry.allow("traffic", 2));

        assert!(registry.allow("traffic", 5_000_000));
        assert_eq!(registry.state("traffic"), BreakerState::HalfOpen);
        registry.record_success("traffic", 5_000_000);
        assert_eq!(registry.state("traffic"), BreakerState::Closed);
    }
}
