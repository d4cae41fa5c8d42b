// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Rolling telemetry history, bottleneck classification, and regression
//! detection. Every output here is advisory: the recovery engine and the
//! quality-tier stepper consume these reports, but nothing in this crate
//! ever mutates runtime state on its own.

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

mod aggregator;
mod analyzer;
mod error;
mod sample;

pub use aggregator::{Aggregator, DEFAULT_CAPACITY};
pub use analyzer::{Analyzer, Bottleneck, DEFAULT_REGRESSION_THRESHOLD};
pub use error::TelemetryError;
pub use sample::{Metric, TelemetrySample};
