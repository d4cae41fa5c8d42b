// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error taxonomy for the swap coordinator and checkpoint store.

use ember_core::{Category, ModuleId, ReportableError, Severity};

/// Failure modes for a swap attempt or a checkpoint-store operation.
#[derive(Debug, thiserror::Error)]
pub enum SwapError {
    /// `prepare` found the module not `Active`, or not capability-tagged
    /// hot-swappable.
    #[error("module {0} is not swappable: not Active, or missing the hot-swappable capability")]
    NotSwappable(ModuleId),
    /// Quiesce didn't reach zero in-flight callers before its deadline.
    #[error("module {0} did not quiesce before its deadline")]
    QuiesceTimeout(ModuleId),
    /// A step was invoked out of order for the module's current swap state.
    #[error("module {module} swap is in state {state:?}, which does not accept this step")]
    WrongState {
        /// Module whose swap session is out of step.
        module: ModuleId,
        /// The state the session was actually in.
        state: crate::coordinator::SwapState,
    },
    /// No in-flight swap session exists for this module.
    #[error("module {0} has no in-flight swap")]
    NoActiveSwap(ModuleId),
    /// `create_checkpoint` failed to persist one or more chunk blobs.
    #[error("checkpoint {name:?} for module {module} failed to take a snapshot")]
    SnapshotFailed {
        /// Module being checkpointed.
        module: ModuleId,
        /// Name the checkpoint was being taken under.
        name: String,
    },
    /// The new module image's self-check hook, or post-swap validation,
    /// reported a failure.
    #[error("module {0} failed post-swap validation")]
    ValidationFailed(ModuleId),
    /// A named checkpoint was requested but is not present in the store.
    #[error("checkpoint {name:?} for module {module} not found")]
    CheckpointNotFound {
        /// Module the checkpoint belongs to.
        module: ModuleId,
        /// Name that was looked up.
        name: String,
    },
    /// A checkpoint's recorded chunk blobs did not round-trip intact.
    #[error("checkpoint {name:?} for module {module} is corrupt")]
    CheckpointCorrupt {
        /// Module the checkpoint belongs to.
        module: ModuleId,
        /// Name of the corrupt checkpoint.
        name: String,
    },
    /// The underlying state manager reported an error while this crate was
    /// driving a swap or checkpoint operation.
    #[error("state manager error during swap of module {module}: {source}")]
    State {
        /// Module being swapped or checkpointed.
        module: ModuleId,
        /// Underlying state-manager failure.
        #[source]
        source: ember_state::StateError,
    },
}

impl ReportableError for SwapError {
    fn category(&self) -> Category {
        match self {
            Self::CheckpointNotFound { .. } | Self::CheckpointCorrupt { .. } => {
                Category::Checkpoint
            }
            _ => Category::Swap,
        }
    }

    fn severity(&self) -> Severity {
        match self {
            Self::WrongState { .. } | Self::NoActiveSwap(_) => Severity::Error,
            Self::NotSwappable(_) | Self::QuiesceTimeout(_) | Self::ValidationFailed(_) => {
                Severity::Error
            }
            Self::SnapshotFailed { .. }
            | Self::CheckpointNotFound { .. }
            | Self::CheckpointCorrupt { .. }
            | Self::State { .. } => Severity::Critical,
        }
    }
}
