// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Adaptive asset quality tiers: a per-subsystem ladder stepped down under
//! sustained telemetry pressure (or on a direct recovery directive) and
//! back up once readings stay calm for a streak of observations. Stepping
//! itself never touches rendered assets; callers read
//! [`QualityOptimizer::tier`] and apply the tier wherever asset loading
//! happens.

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

mod optimizer;
mod tier;

pub use optimizer::{
    QualityConfig, QualityOptimizer, TierChange, DEFAULT_PRESSURE_THRESHOLD,
    DEFAULT_RECOVERY_STREAK,
};
pub use tier::QualityTier;
