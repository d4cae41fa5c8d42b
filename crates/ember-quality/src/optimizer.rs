// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-subsystem tier stepping: down on sustained pressure or an explicit
//! recovery directive, up after a streak of calm readings.

use std::collections::BTreeMap;

use tracing::info;

use crate::tier::QualityTier;

/// Default bottleneck pressure, in `[0, 100]`, above which a tier step-down
/// is considered.
pub const DEFAULT_PRESSURE_THRESHOLD: f64 = 80.0;
/// Default number of consecutive calm readings required before stepping a
/// tier back up.
pub const DEFAULT_RECOVERY_STREAK: u32 = 5;

/// Tunables for the optimizer.
#[derive(Clone, Copy, Debug)]
pub struct QualityConfig {
    /// Pressure, in `[0, 100]`, at or above which a reading counts as a
    /// step-down candidate.
    pub pressure_threshold: f64,
    /// Consecutive readings below `pressure_threshold` required before
    /// promoting a subsystem back up one tier.
    pub recovery_streak: u32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            pressure_threshold: DEFAULT_PRESSURE_THRESHOLD,
            recovery_streak: DEFAULT_RECOVERY_STREAK,
        }
    }
}

/// What the last [`QualityOptimizer::evaluate`] or
/// [`QualityOptimizer::force_step_down`] call did to a subsystem's tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TierChange {
    /// The tier did not change.
    Held,
    /// The tier dropped one step.
    SteppedDown,
    /// The tier rose one step.
    SteppedUp,
}

/// Tracks one quality tier and calm-streak counter per subsystem, stepping
/// it down under pressure (from a telemetry reading or a direct recovery
/// directive) and back up once pressure has stayed below threshold for
/// `recovery_streak` consecutive readings.
pub struct QualityOptimizer {
    config: QualityConfig,
    tiers: BTreeMap<String, QualityTier>,
    calm_streak: BTreeMap<String, u32>,
}

impl Default for QualityOptimizer {
    fn default() -> Self {
        Self::new(QualityConfig::default())
    }
}

impl QualityOptimizer {
    /// Creates an optimizer with the given config; every subsystem starts
    /// at [`QualityTier::default`] until first evaluated or stepped.
    #[must_use]
    pub fn new(config: QualityConfig) -> Self {
        Self {
            config,
            tiers: BTreeMap::new(),
            calm_streak: BTreeMap::new(),
        }
    }

    /// Current tier for `subsystem`, defaulting to [`QualityTier::default`]
    /// if it has never been evaluated or stepped.
    #[must_use]
    pub fn tier(&self, subsystem: &str) -> QualityTier {
        self.tiers.get(subsystem).copied().unwrap_or_default()
    }

    /// Feeds one pressure reading (a telemetry bottleneck percentage, in
    /// `[0, 100]`) for `subsystem` and steps its tier per the calm-streak
    /// rule.
    pub fn evaluate(&mut self, subsystem: &str, pressure: f64) -> TierChange {
        if pressure >= self.config.pressure_threshold {
            self.calm_streak.insert(subsystem.to_string(), 0);
            return self.step(subsystem, true);
        }

        let streak = self.calm_streak.entry(subsystem.to_string()).or_insert(0);
        *streak += 1;
        if *streak >= self.config.recovery_streak {
            *streak = 0;
            self.step(subsystem, false)
        } else {
            TierChange::Held
        }
    }

    /// Steps `subsystem` down immediately, bypassing the calm-streak rule.
    /// Called when the recovery engine selects `ScaleDown`.
    pub fn force_step_down(&mut self, subsystem: &str) -> TierChange {
        self.calm_streak.insert(subsystem.to_string(), 0);
        self.step(subsystem, true)
    }

    fn step(&mut self, subsystem: &str, down: bool) -> TierChange {
        let current = self.tier(subsystem);
        let (next, change) = if down {
            match current.step_down() {
                Some(next) => (next, TierChange::SteppedDown),
                None => (current, TierChange::Held),
            }
        } else {
            match current.step_up() {
                Some(next) => (next, TierChange::SteppedUp),
                None => (current, TierChange::Held),
            }
        };

        if change != TierChange::Held {
            info!(subsystem, from = ?current, to = ?next, "quality tier changed");
            self.tiers.insert(subsystem.to_string(), next);
        }
        change
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn high_pressure_steps_down_immediately() {
        let mut optimizer = QualityOptimizer::default();
        let change = optimizer.evaluate("renderer", 95.0);
        assert_eq!(change, TierChange::SteppedDown);
        assert_eq!(optimizer.tier("renderer"), QualityTier::Low);
    }

    #[test]
    fn calm_readings_below_streak_hold() {
        let mut optimizer = QualityOptimizer::default();
        optimizer.force_step_down("renderer");
        for _ in 0..DEFAULT_RECOVERY_STREAK - 1 {
            assert_eq!(optimizer.evaluate("renderer", 10.0), TierChange::Held);
        }
        assert_eq!(optimizer.tier("renderer"), QualityTier::Low);
    }

    #[test]
    fn calm_streak_completion_steps_up() {
        let mut optimizer = QualityOptimizer::default();
        optimizer.force_step_down("renderer");
        for _ in 0..DEFAULT_RECOVERY_STREAK - 1 {
            optimizer.evaluate("renderer", 10.0);
        }
        let change = optimizer.evaluate("renderer", 10.0);
        assert_eq!(change, TierChange::SteppedUp);
        assert_eq!(optimizer.tier("renderer"), QualityTier::Medium);
    }

    #[test]
    fn pressure_spike_resets_calm_streak() {
        let mut optimizer = QualityOptimizer::default();
        optimizer.force_step_down("renderer");
        optimizer.evaluate("renderer", 10.0);
        optimizer.evaluate("renderer", 95.0);
        for _ in 0..DEFAULT_RECOVERY_STREAK - 1 {
            assert_eq!(optimizer.evaluate("renderer", 10.0), TierChange::Held);
        }
    }

    #[test]
    fn minimal_tier_does_not_underflow_on_repeated_pressure() {
        let mut optimizer = QualityOptimizer::default();
        for _ in 0..10 {
            optimizer.evaluate("renderer", 95.0);
        }
        assert_eq!(optimizer.tier("renderer"), QualityTier::Minimal);
    }

    #[test]
    fn untouched_subsystem_starts_at_default_tier() {
        let optimizer = QualityOptimizer::default();
        assert_eq!(optimizer.tier("never-touched"), QualityTier::default());
    }
}
