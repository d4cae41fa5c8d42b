// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Wires every hot-reload component, the dependency graph, build cache,
//! build scheduler, state manager, swap coordinator, telemetry, recovery
//! engine, and quality optimizer, behind one line-oriented command
//! surface. This crate is the thing a daemon binds a socket to.
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

mod command;
mod error;
mod registry;
mod runtime;

pub use command::{Command, CommandParseError, Reply};
pub use error::RuntimeError;
pub use registry::{ModuleEntry, ModuleRegistry};
pub use runtime::{
    Runtime, RuntimeConfig, DEFAULT_AGENT_SIZE, DEFAULT_INITIAL_AGENT_COUNT, DEFAULT_MAX_AGENTS,
    DEFAULT_QUIESCE_TIMEOUT_MICROS,
};
