// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The ordered quality tiers assets render at.

/// An asset quality tier, ordered from richest to cheapest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QualityTier {
    /// Full fidelity.
    Ultra,
    /// One step down from full fidelity.
    High,
    /// Default tier for a freshly loaded module.
    Medium,
    /// Reduced texture/mesh/effect detail.
    Low,
    /// Floor tier; nothing below this.
    Minimal,
}

impl QualityTier {
    /// All tiers, richest first.
    pub const ALL: [Self; 5] = [Self::Ultra, Self::High, Self::Medium, Self::Low, Self::Minimal];

    /// One tier cheaper, or `None` if already at [`Self::Minimal`].
    #[must_use]
    pub const fn step_down(self) -> Option<Self> {
        match self {
            Self::Ultra => Some(Self::High),
            Self::High => Some(Self::Medium),
            Self::Medium => Some(Self::Low),
            Self::Low => Some(Self::Minimal),
            Self::Minimal => None,
        }
    }

    /// One tier richer, or `None` if already at [`Self::Ultra`].
    #[must_use]
    pub const fn step_up(self) -> Option<Self> {
        match self {
            Self::Ultra => None,
            Self::High => Some(Self::Ultra),
            Self::Medium => Some(Self::High),
            Self::Low => Some(Self::Medium),
            Self::Minimal => Some(Self::Low),
        }
    }
}

impl Default for QualityTier {
    fn default() -> Self {
        Self::Medium
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn minimal_has_no_lower_tier() {
        assert_eq!(QualityTier::Minimal.step_down(), None);
    }

    #[test]
    fn ultra_has_no_higher_tier() {
        assert_eq!(QualityTier::Ultra.step_up(), None);
    }

    #[test]
    fn step_down_then_up_returns_to_start() {
        let tier = QualityTier::High;
        let down = tier.step_down().unwrap();
        assert_eq!(down.step_up(), Some(tier));
    }
}
