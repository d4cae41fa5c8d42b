// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The recovery engine's error history: a fixed-capacity ring of every
//! [`ErrorContext`] posted to it, each tagged with the failure domain the
//! strategy-selection rules need.

use ember_core::{ErrorContext, RingBuffer};

/// Default history ring capacity.
pub const DEFAULT_HISTORY_CAPACITY: usize = 4_096;

/// The domain vocabulary the strategy table branches on. Coarser-grained
/// crate-local errors (`ember_core::Category`) don't carry enough detail to
/// pick a domain automatically, so callers posting an error supply it
/// directly alongside the [`ErrorContext`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureDomain {
    /// Build/compile failure.
    Compile,
    /// Failure during normal module execution.
    Runtime,
    /// Out-of-memory or allocation failure.
    Memory,
    /// Filesystem or other local I/O failure.
    Io,
    /// Network failure.
    Network,
    /// A bounded resource (cache slot, worker, handle) was exhausted.
    Resource,
    /// Frame-time or latency budget exceeded.
    Perf,
    /// A security invariant was violated.
    Security,
    /// Live-config parse or validation failure.
    Config,
}

/// One posted error together with the domain it was classified under.
#[derive(Clone, Debug)]
pub struct RecordedError {
    /// The structured error record.
    pub context: ErrorContext,
    /// The domain the strategy table will branch on.
    pub domain: FailureDomain,
}

/// Fixed-capacity history of posted errors.
pub struct ErrorHistory {
    ring: RingBuffer<RecordedError>,
    next_id: u64,
}

impl ErrorHistory {
    /// Creates a history ring holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: RingBuffer::new(capacity),
            next_id: 0,
        }
    }

    /// Records `context` under `domain`, assigning it the next monotonic id.
    /// `context.id` is overwritten: the history is the sole id authority so
    /// every caller gets a gap-free sequence regardless of what it passed in.
    pub fn record(&mut self, mut context: ErrorContext, domain: FailureDomain) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        context.id = id;
        self.ring.push(RecordedError { context, domain });
        id
    }

    /// Iterates recorded errors oldest-first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &RecordedError> {
        self.ring.iter()
    }

    /// Number of errors currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// True if no errors have been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Looks up a recorded error by id, scanning from most recent since
    /// lookups almost always target something recorded moments ago.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<&RecordedError> {
        self.ring.iter().rev().find(|e| e.context.id == id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ember_core::{ResourceSnapshot, Severity};

    fn context(detail: &str) -> ErrorContext {
        ErrorContext {
            id: 999,
            source: "ember-build-sched".to_string(),
            category: ember_core::Category::Compile,
            severity: Severity::Error,
            timestamp_micros: 0,
            detail: detail.to_string(),
            resource_snapshot: ResourceSnapshot::default(),
        }
    }

    #[test]
    fn record_assigns_gap_free_ids() {
        let mut history = ErrorHistory::new(10);
        let a = history.record(context("first"), FailureDomain::Compile);
        let b = history.record(context("second"), FailureDomain::Io);
        assert_eq!(a, 0);
        assert_eq!(b, 1);
    }

    #[test]
    fn get_finds_by_assigned_id() {
        let mut history = ErrorHistory::new(10);
        let id = history.record(context("boom"), FailureDomain::Memory);
        let found = history.get(id).unwrap();
        assert_eq!(found.context.detail, "boom");
        assert_eq!(found.domain, FailureDomain::Memory);
    }

    #[test]
    fn ring_evicts_oldest_past_capacity() {
        let mut history = ErrorHistory::new(2);
        history.record(context("a"), FailureDomain::Compile);
        history.record(context("b"), FailureDomain::Compile);
        history.record(context("c"), FailureDomain::Compile);
        assert_eq!(history.len(), 2);
        assert!(history.get(0).is_none());
    }
}
