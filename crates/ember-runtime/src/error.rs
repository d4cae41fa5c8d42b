// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Runtime-level errors: either a wrapped subsystem error or a failure that
//! belongs to the runtime's own bookkeeping (module name resolution).

use std::path::PathBuf;

use ember_core::{Category, ReportableError, Severity};

/// Failure modes surfaced to a CLI command's caller.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// `LOAD_MODULE` named a module that is already loaded.
    #[error("module {0:?} is already loaded")]
    AlreadyLoaded(String),
    /// A command named a module the registry has never seen, or that was
    /// unloaded.
    #[error("module {0:?} is not loaded")]
    NotLoaded(String),
    /// `SWAP_MODULE`'s artifact path does not exist or could not be read.
    /// The module image loader itself is an external seam the core treats
    /// as opaque, but the path has to resolve before that seam is invoked.
    #[error("artifact {path:?} could not be read: {source}")]
    ArtifactUnreadable {
        /// Path the command named.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The dependency graph rejected an operation.
    #[error(transparent)]
    Graph(#[from] ember_graph::GraphError),
    /// The state manager rejected an operation.
    #[error(transparent)]
    State(#[from] ember_state::StateError),
    /// The swap coordinator or checkpoint store rejected an operation.
    #[error(transparent)]
    Swap(#[from] ember_swap::SwapError),
    /// The recovery engine refused the call (its breaker is open).
    #[error(transparent)]
    Recovery(#[from] ember_recovery::RecoveryError),
}

impl ReportableError for RuntimeError {
    fn category(&self) -> Category {
        match self {
            Self::AlreadyLoaded(_) | Self::NotLoaded(_) => Category::Internal,
            Self::ArtifactUnreadable { .. } => Category::Swap,
            Self::Graph(_) => Category::Dependency,
            Self::State(source) => source.category(),
            Self::Swap(source) => source.category(),
            Self::Recovery(source) => source.category(),
        }
    }

    fn severity(&self) -> Severity {
        match self {
            Self::AlreadyLoaded(_) | Self::NotLoaded(_) => Severity::Warning,
            Self::ArtifactUnreadable { .. } | Self::Graph(_) => Severity::Error,
            Self::State(source) => source.severity(),
            Self::Swap(source) => source.severity(),
            Self::Recovery(source) => source.severity(),
        }
    }
}
