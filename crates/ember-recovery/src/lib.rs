// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error history, failure-probability prediction, strategy selection, and
//! circuit breakers. The engine in this crate decides what a caller should
//! do about an error; it never performs the action itself, so it carries no
//! dependency on `ember-swap`, `ember-state`, or any other component whose
//! checkpoints or registries it might be asked to roll back.

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

mod breaker;
mod engine;
mod error;
mod features;
mod history;
mod predictor;
mod strategy;

pub use breaker::{BreakerConfig, BreakerRegistry, BreakerState};
pub use engine::{RecoveryDecision, RecoveryEngine};
pub use error::RecoveryError;
pub use features::{FeatureContext, FEATURE_COUNT};
pub use history::{ErrorHistory, FailureDomain, RecordedError, DEFAULT_HISTORY_CAPACITY};
pub use predictor::FailurePredictor;
pub use strategy::{
    next_retry_backoff_micros, select, select_by_rules, Strategy, DEFAULT_OVERRIDE_THRESHOLD,
    RETRY_INITIAL_BACKOFF_MICROS, RETRY_MAX_BACKOFF_MICROS,
};
