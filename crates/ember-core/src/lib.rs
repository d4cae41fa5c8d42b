// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared ids, error taxonomy, and small primitives used across the Ember
//! hot-swap runtime crates. Kept dependency-light and framework-agnostic so
//! every other crate in the workspace can depend on it without pulling in
//! tokio, tracing, or any I/O stack.

pub mod error;
pub mod ids;
pub mod ring;

pub use error::{Category, ErrorContext, ReportableError, ResourceSnapshot, Severity};
pub use ids::{AgentId, ChunkId, Hash32, ModuleId};
pub use ring::RingBuffer;
