// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Hot-swap coordination: a state machine that carries one module from its
//! running version to a newly built one without ever leaving it in a state
//! a caller could observe as broken, backed by a content-addressed
//! checkpoint store used both as the diff baseline and the rollback target.
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

mod checkpoint;
mod coordinator;
mod error;
mod retention;

pub use checkpoint::CheckpointStore;
pub use coordinator::{AbortReason, SwapCoordinator, SwapDisposition, SwapOutcome, SwapState};
pub use error::SwapError;
pub use retention::RetentionPolicy;
