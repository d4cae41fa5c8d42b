// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The swap coordinator: one state machine per in-flight hot swap, driving
//! a module from its last-known-good version to a new one without ever
//! leaving it in a state a caller could observe as broken.
//!
//! `Idle -> Prepare -> Quiesce -> SnapshotTake -> ArtifactSwap ->
//! [StateTransform] -> Validate -> Activate -> Commit`, with every step
//! able to fall back to `Abort`, which always restores the pre-swap
//! checkpoint byte-for-byte. `StateTransform` only runs when the new
//! image's schema version is newer than the old one.

use std::collections::BTreeMap;

use ember_cas::BlobStore;
use ember_core::{ModuleId, RingBuffer};
use ember_state::StateManager;
use tracing::{info, instrument, warn};

use crate::checkpoint::CheckpointStore;
use crate::error::SwapError;

/// Where a module's in-flight swap currently sits in the state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapState {
    /// `prepare` has validated the module is swappable and opened a session.
    Prepare,
    /// Waiting for in-flight callers to drain before touching state.
    Quiesce,
    /// The pre-swap checkpoint has been taken.
    SnapshotTake,
    /// The new image has been loaded beside the old one.
    ArtifactSwap,
    /// The new image's schema is newer; its transform hook is running.
    StateTransform,
    /// Running validation against the new image.
    Validate,
    /// Validation passed; ready to flip the registry pointer.
    Activate,
    /// The registry pointer has flipped; waiting out the grace period.
    Commit,
}

/// Why a swap was aborted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbortReason {
    /// `prepare` rejected the module (not Active, or not hot-swappable).
    NotSwappable,
    /// Quiesce did not reach zero in-flight callers before its deadline.
    QuiesceTimeout,
    /// `create_checkpoint` failed.
    SnapshotFailed,
    /// Validation or the new image's self-check hook failed.
    ValidationFailed,
    /// The caller aborted the swap for a reason outside this state machine
    /// (e.g. the build that produced the new image was itself cancelled).
    Requested,
}

/// Whether a swap ended by committing or by rolling back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapDisposition {
    /// The new version is now active.
    Committed,
    /// The module is back on its pre-swap version.
    Aborted(AbortReason),
}

/// A small timestamped record of how one swap attempt ended, kept in the
/// coordinator's history ring for the recovery engine to consume.
#[derive(Clone, Debug)]
pub struct SwapOutcome {
    /// Module the swap was attempted on.
    pub module: ModuleId,
    /// Monotonically increasing attempt counter for this module.
    pub epoch: u64,
    /// How the attempt ended.
    pub disposition: SwapDisposition,
    /// Wall-clock start time, in microseconds, caller-supplied.
    pub started_at_micros: u64,
    /// Wall-clock end time, in microseconds, caller-supplied.
    pub ended_at_micros: u64,
}

struct SwapSession {
    state: SwapState,
    epoch: u64,
    checkpoint_name: String,
    quiesce_deadline_micros: Option<u64>,
    started_at_micros: u64,
}

/// States at or past `SnapshotTake`, where a pre-swap checkpoint exists and
/// must be restored on abort.
fn checkpoint_taken(state: SwapState) -> bool {
    !matches!(state, SwapState::Prepare | SwapState::Quiesce)
}

/// Drives one hot swap at a time per module through to commit or abort.
///
/// Generic over `S: BlobStore` for the same reason [`CheckpointStore`] is:
/// this type owns its checkpoint store directly rather than locking one
/// internally, so a caller that needs to share a coordinator across threads
/// wraps the whole thing (e.g. `parking_lot::Mutex<SwapCoordinator<_>>`) at
/// the call site, same as `ember-cache`'s `BuildCache`.
pub struct SwapCoordinator<S> {
    checkpoints: CheckpointStore<S>,
    sessions: BTreeMap<ModuleId, SwapSession>,
    epochs: BTreeMap<ModuleId, u64>,
    consecutive_aborts: BTreeMap<ModuleId, u32>,
    history: RingBuffer<SwapOutcome>,
}

impl<S: BlobStore> SwapCoordinator<S> {
    /// Creates a coordinator over `checkpoints`, keeping the last
    /// `history_capacity` swap outcomes across all modules.
    #[must_use]
    pub fn new(checkpoints: CheckpointStore<S>, history_capacity: usize) -> Self {
        Self {
            checkpoints,
            sessions: BTreeMap::new(),
            epochs: BTreeMap::new(),
            consecutive_aborts: BTreeMap::new(),
            history: RingBuffer::new(history_capacity),
        }
    }

    /// `Idle -> Prepare`. Rejects a module that isn't `Active` or isn't
    /// tagged hot-swappable, and rejects starting a second swap for a
    /// module that already has one in flight.
    #[instrument(skip(self), fields(module = %module))]
    pub fn prepare(
        &mut self,
        module: ModuleId,
        is_active: bool,
        hot_swappable: bool,
        now_micros: u64,
    ) -> Result<(), SwapError> {
        if let Some(session) = self.sessions.get(&module) {
            return Err(SwapError::WrongState {
                module,
                state: session.state,
            });
        }
        if !is_active || !hot_swappable {
            warn!("module not swappable");
            *self.consecutive_aborts.entry(module).or_insert(0) += 1;
            return Err(SwapError::NotSwappable(module));
        }
        let epoch = {
            let counter = self.epochs.entry(module).or_insert(0);
            *counter += 1;
            *counter
        };
        self.sessions.insert(
            module,
            SwapSession {
                state: SwapState::Prepare,
                epoch,
                checkpoint_name: format!("pre-swap-{epoch}"),
                quiesce_deadline_micros: None,
                started_at_micros: now_micros,
            },
        );
        info!(epoch, "swap prepared");
        Ok(())
    }

    /// `Prepare -> Quiesce`. `timeout_micros` bounds how long draining
    /// in-flight callers is allowed to take before [`Self::poll_quiesce`]
    /// reports [`SwapError::QuiesceTimeout`].
    pub fn begin_quiesce(
        &mut self,
        module: ModuleId,
        now_micros: u64,
        timeout_micros: u64,
    ) -> Result<(), SwapError> {
        let session = self.session_in(module, SwapState::Prepare)?;
        session.state = SwapState::Quiesce;
        session.quiesce_deadline_micros = Some(now_micros.saturating_add(timeout_micros));
        Ok(())
    }

    /// Reports whether in-flight callers have drained to zero. Returns
    /// `Ok(false)` while still waiting, `Ok(true)` once the caller may
    /// proceed to [`Self::snapshot_take`], or `Err(QuiesceTimeout)` once
    /// `now_micros` passes the deadline set in [`Self::begin_quiesce`].
    pub fn poll_quiesce(
        &self,
        module: ModuleId,
        in_flight_callers: u64,
        now_micros: u64,
    ) -> Result<bool, SwapError> {
        let session = self.peek_session(module, SwapState::Quiesce)?;
        if in_flight_callers == 0 {
            return Ok(true);
        }
        let deadline = session.quiesce_deadline_micros.unwrap_or(now_micros);
        if now_micros >= deadline {
            return Err(SwapError::QuiesceTimeout(module));
        }
        Ok(false)
    }

    /// `Quiesce -> SnapshotTake`. Takes the pre-swap checkpoint; the
    /// session stays in `Quiesce` (and may still be aborted without a
    /// checkpoint to restore) until this succeeds.
    #[instrument(skip(self, state), fields(module = %module))]
    pub fn snapshot_take(
        &mut self,
        module: ModuleId,
        state: &StateManager,
    ) -> Result<(), SwapError> {
        let checkpoint_name = self
            .session_in(module, SwapState::Quiesce)?
            .checkpoint_name
            .clone();
        let snapshot = state
            .snapshot(module)
            .map_err(|source| SwapError::State { module, source })?;
        self.checkpoints
            .create(checkpoint_name.clone(), &snapshot)
            .map_err(|_| SwapError::SnapshotFailed {
                module,
                name: checkpoint_name,
            })?;
        self.session_in(module, SwapState::Quiesce)?.state = SwapState::SnapshotTake;
        info!("pre-swap checkpoint taken");
        Ok(())
    }

    /// `SnapshotTake -> ArtifactSwap`, then straight on to either
    /// `StateTransform` (if `new_schema_version > current_schema_version`)
    /// or `Validate`. Returns whether a transform step is required, so the
    /// caller knows whether to invoke the new image's transform hook
    /// before calling [`Self::state_transform_done`] or skip straight to
    /// [`Self::validate`].
    pub fn artifact_swap(
        &mut self,
        module: ModuleId,
        current_schema_version: u32,
        new_schema_version: u32,
    ) -> Result<bool, SwapError> {
        let session = self.session_in(module, SwapState::SnapshotTake)?;
        let needs_transform = new_schema_version > current_schema_version;
        session.state = if needs_transform {
            SwapState::StateTransform
        } else {
            SwapState::Validate
        };
        Ok(needs_transform)
    }

    /// `StateTransform -> Validate`, once the new image's transform hook
    /// has produced the new state slice from the old one.
    pub fn state_transform_done(&mut self, module: ModuleId) -> Result<(), SwapError> {
        self.session_in(module, SwapState::StateTransform)?.state = SwapState::Validate;
        Ok(())
    }

    /// `Validate -> Activate`. `clean` combines `validate_module`'s report
    /// and the new image's self-check hook (if it has one); both must pass.
    pub fn validate(&mut self, module: ModuleId, clean: bool) -> Result<(), SwapError> {
        let session = self.session_in(module, SwapState::Validate)?;
        if !clean {
            return Err(SwapError::ValidationFailed(module));
        }
        session.state = SwapState::Activate;
        Ok(())
    }

    /// `Activate -> Commit`. Returns the new version number for the caller
    /// to install as it atomically flips the registry pointer.
    pub fn activate(&mut self, module: ModuleId, previous_version: u32) -> Result<u32, SwapError> {
        let session = self.session_in(module, SwapState::Activate)?;
        session.state = SwapState::Commit;
        Ok(previous_version.wrapping_add(1))
    }

    /// `Commit -> Idle`. Promotes the pre-swap checkpoint to historical
    /// (subject to the checkpoint store's retention policy) rather than
    /// releasing it outright, so it remains available for a later manual
    /// rollback, and clears the module's consecutive-abort counter.
    #[instrument(skip(self), fields(module = %module))]
    pub fn commit(&mut self, module: ModuleId, now_micros: u64) -> Result<SwapOutcome, SwapError> {
        let session = self.sessions.remove(&module).ok_or(SwapError::NoActiveSwap(module))?;
        if session.state != SwapState::Commit {
            let state = session.state;
            self.sessions.insert(module, session);
            return Err(SwapError::WrongState { module, state });
        }
        self.checkpoints.promote(module, &session.checkpoint_name)?;
        self.consecutive_aborts.remove(&module);
        let outcome = SwapOutcome {
            module,
            epoch: session.epoch,
            disposition: SwapDisposition::Committed,
            started_at_micros: session.started_at_micros,
            ended_at_micros: now_micros,
        };
        self.history.push(outcome.clone());
        info!(epoch = session.epoch, "swap committed");
        Ok(outcome)
    }

    /// Aborts the module's in-flight swap from any state. Restores the
    /// pre-swap checkpoint if one had been taken, tears down the
    /// checkpoint either way, and records the failure for the recovery
    /// engine's circuit breaker to consume via
    /// [`Self::consecutive_aborts`].
    #[instrument(skip(self, state), fields(module = %module, ?reason))]
    pub fn abort(
        &mut self,
        module: ModuleId,
        state: &StateManager,
        reason: AbortReason,
        now_micros: u64,
    ) -> Result<SwapOutcome, SwapError> {
        let session = self.sessions.remove(&module).ok_or(SwapError::NoActiveSwap(module))?;
        if checkpoint_taken(session.state) {
            let snapshot = self.checkpoints.restore(module, &session.checkpoint_name)?;
            state
                .restore_snapshot(&snapshot, now_micros)
                .map_err(|source| SwapError::State { module, source })?;
        }
        self.checkpoints.release(module, &session.checkpoint_name);
        *self.consecutive_aborts.entry(module).or_insert(0) += 1;
        let outcome = SwapOutcome {
            module,
            epoch: session.epoch,
            disposition: SwapDisposition::Aborted(reason),
            started_at_micros: session.started_at_micros,
            ended_at_micros: now_micros,
        };
        self.history.push(outcome.clone());
        warn!(epoch = session.epoch, "swap aborted");
        Ok(outcome)
    }

    /// Number of swaps aborted in a row for `module` since its last commit.
    /// Feeds the recovery engine's circuit breaker.
    #[must_use]
    pub fn consecutive_aborts(&self, module: ModuleId) -> u32 {
        self.consecutive_aborts.get(&module).copied().unwrap_or(0)
    }

    /// The most recent swap outcomes across all modules, oldest first.
    pub fn history(&self) -> impl DoubleEndedIterator<Item = &SwapOutcome> {
        self.history.iter()
    }

    /// `true` if `module` has a swap currently in flight.
    #[must_use]
    pub fn in_flight(&self, module: ModuleId) -> bool {
        self.sessions.contains_key(&module)
    }

    fn session_in(
        &mut self,
        module: ModuleId,
        expected: SwapState,
    ) -> Result<&mut SwapSession, SwapError> {
        match self.sessions.get_mut(&module) {
            Some(session) if session.state == expected => Ok(session),
            Some(session) => Err(SwapError::WrongState {
                module,
                state: session.state,
            }),
            None => Err(SwapError::NoActiveSwap(module)),
        }
    }

    fn peek_session(
        &self,
        module: ModuleId,
        expected: SwapState,
    ) -> Result<&SwapSession, SwapError> {
        match self.sessions.get(&module) {
            Some(session) if session.state == expected => Ok(session),
            Some(session) => Err(SwapError::WrongState {
                module,
                state: session.state,
            }),
            None => Err(SwapError::NoActiveSwap(module)),
        }
    }
}
