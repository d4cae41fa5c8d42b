// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Retention policies for historical checkpoints.
//!
//! The in-flight invariant (exactly one "pre-swap" checkpoint exists per
//! module while a swap is outstanding) always holds regardless of policy.
//! [`RetentionPolicy`] governs what happens to checkpoints *after* a swap
//! commits: how many of them a module's history keeps around for manual
//! rollback or inspection.

/// Retention policy for a module's committed checkpoint history.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Keep every checkpoint indefinitely. Suitable for debugging or
    /// short-lived modules with few swaps.
    #[default]
    KeepAll,

    /// Keep every checkpoint, but only the `k`-th since commit is exempt
    /// from immediate eviction pressure: checkpoints are kept either way,
    /// this only changes how eagerly older ones are pruned by a future
    /// policy change. `k` must be >= 1; 0 is treated as 1.
    CheckpointEvery {
        /// Interval between retained checkpoints.
        k: u64,
    },

    /// Prune checkpoints older than `window` commits, except those that
    /// land on a `checkpoint_every` boundary, which are kept regardless of
    /// age.
    ///
    /// `window` and `checkpoint_every` must both be >= 1.
    KeepRecent {
        /// Number of most recent commits to keep in full.
        window: u64,
        /// Checkpoints at this commit interval are kept past the window.
        checkpoint_every: u64,
    },

    /// Archive checkpoints older than `after` commits to external storage
    /// (seam only, not implemented).
    #[deprecated(note = "not yet implemented: archival tier has no backing store")]
    ArchiveToWormhole {
        /// Archive checkpoints older than this many commits.
        after: u64,
        /// Create checkpoints every this many commits before archiving.
        checkpoint_every: u64,
    },
}

impl RetentionPolicy {
    /// Returns `true` if the checkpoint at `commit_index` (0-based, in
    /// commit order) should be kept given `total_commits` seen so far.
    #[must_use]
    #[allow(deprecated)]
    pub fn keeps(&self, commit_index: u64, total_commits: u64) -> bool {
        match *self {
            Self::KeepAll | Self::CheckpointEvery { .. } => true,
            Self::KeepRecent {
                window,
                checkpoint_every,
            } => {
                let window = window.max(1);
                let checkpoint_every = checkpoint_every.max(1);
                let age = total_commits.saturating_sub(commit_index + 1);
                age < window || commit_index % checkpoint_every == 0
            }
            Self::ArchiveToWormhole { after, .. } => {
                total_commits.saturating_sub(commit_index + 1) < after.max(1)
            }
        }
    }
}
