// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Module registry and state manager (components C4+C5): chunked agent
//! storage, CRC64 checksums, incremental-update diffing, checkpoint
//! primitives, and background LZ4-style compression.
//!
//! A module's state slice is `max_agents * agent_size` bytes, partitioned
//! into fixed-size, 64 KiB-capacity [`Chunk`]s. All mutation goes through
//! [`StateManager`], which holds every registered module behind a single
//! lock; checkpointing by name and retention policy live one layer up, in
//! the swap coordinator, which consumes the [`ModuleSnapshot`] values this
//! crate produces.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::module_name_repetitions,
    clippy::multiple_crate_versions
)]

mod checksum;
mod chunk;
mod codec;
mod diff;
mod error;
mod module;
mod simd;
mod snapshot;
mod state_manager;
mod validate;

pub use checksum::crc64;
pub use codec::{compress, decompress, CodecError};
pub use diff::{DiffOutput, DiffRecord};
pub use error::StateError;
pub use snapshot::{ChunkSnapshot, ModuleSnapshot};
pub use state_manager::{CompressionSummary, StateManager};
pub use validate::ValidationReport;
