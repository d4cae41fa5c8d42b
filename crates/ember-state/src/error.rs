// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error taxonomy for the module registry and state manager.

use ember_core::{Category, ModuleId, ReportableError, Severity};

/// Failure modes for registration, updates, diffing, checkpointing,
/// validation, and compression.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// `register` called twice for the same module id.
    #[error("module {0} is already registered")]
    AlreadyRegistered(ModuleId),
    /// The requested state slice could not be allocated at the requested size.
    #[error("out of memory allocating state slice for module {module} ({requested_bytes} bytes)")]
    OutOfMemory {
        /// Module being registered.
        module: ModuleId,
        /// Bytes the allocation would have required.
        requested_bytes: usize,
    },
    /// An operation referenced a module that was never registered.
    #[error("module {0} is not registered")]
    UnknownModule(ModuleId),
    /// An operation referenced an agent index outside `0..agent_count`.
    #[error("agent index {agent} out of range for module {module} (agent_count = {agent_count})")]
    AgentOutOfRange {
        /// Module the agent belongs to.
        module: ModuleId,
        /// Requested agent index.
        agent: u32,
        /// Current live agent count.
        agent_count: u32,
    },
    /// `add_agents` would push `agent_count` past `max_agents`.
    #[error("module {module} cannot grow by {requested} agents: would exceed max_agents ({max_agents})")]
    GrowthExceedsCapacity {
        /// Module being grown.
        module: ModuleId,
        /// Requested growth.
        requested: u32,
        /// Configured ceiling.
        max_agents: u32,
    },
    /// `update_agent` called outside a `begin_incremental_update` window.
    #[error("module {0} has no open incremental update window")]
    NoOpenUpdateWindow(ModuleId),
    /// A chunk's recomputed CRC64 no longer matches its stored checksum.
    #[error("chunk {chunk} of module {module} failed checksum validation")]
    ChecksumMismatch {
        /// Module owning the chunk.
        module: ModuleId,
        /// Chunk that failed validation.
        chunk: u32,
    },
    /// `generate_diff` produced more records than the caller's buffer allows.
    #[error("diff buffer for module {0} overflowed; output was truncated")]
    DiffBufferFull(ModuleId),
    /// Decompressing a chunk didn't reproduce the pre-compression bytes.
    #[error("chunk {chunk} of module {module} failed to round-trip through compression")]
    CompressionRoundTripFailed {
        /// Module owning the chunk.
        module: ModuleId,
        /// Chunk whose round-trip failed.
        chunk: u32,
    },
    /// No checkpoint-shaped snapshot was available to restore from.
    #[error("module {0} has no snapshot to restore")]
    NoSnapshot(ModuleId),
    /// `update_agent` received a byte slice whose length didn't match `agent_size`.
    #[error("module {module}: agent payload is {actual} bytes, expected {expected}")]
    PayloadSizeMismatch {
        /// Module the agent belongs to.
        module: ModuleId,
        /// Configured agent size.
        expected: usize,
        /// Length of the bytes actually supplied.
        actual: usize,
    },
}

impl ReportableError for StateError {
    fn category(&self) -> Category {
        Category::State
    }

    fn severity(&self) -> Severity {
        match self {
            Self::AlreadyRegistered(_)
            | Self::UnknownModule(_)
            | Self::AgentOutOfRange { .. }
            | Self::GrowthExceedsCapacity { .. }
            | Self::NoOpenUpdateWindow(_)
            | Self::DiffBufferFull(_)
            | Self::NoSnapshot(_)
            | Self::PayloadSizeMismatch { .. } => Severity::Error,
            Self::OutOfMemory { .. } => Severity::Critical,
            Self::ChecksumMismatch { .. } | Self::CompressionRoundTripFailed { .. } => {
                Severity::Critical
            }
        }
    }
}
