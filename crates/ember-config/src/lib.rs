// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Live-config manager: a typed tree with atomic one-slot rollback.
//!
//! Parses JSON-like configuration into a typed [`ConfigValue`] tree. On a
//! file-change event the new content is parsed and, optionally, schema
//! validated; only on success does the previous tree move to a one-slot
//! backup and the new tree become current. [`ConfigService::rollback`]
//! restores the backup via pointer swap — no re-parsing.

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

mod error;
mod parser;
mod schema;
mod service;
mod store;
mod value;

pub use error::ConfigError;
pub use parser::{ConfigParser, JsonParser, ParseError, ParsePosition};
pub use schema::{Bounds, FieldSchema, Schema};
pub use service::ConfigService;
pub use store::{ConfigStore, FsConfigStore};
pub use value::ConfigValue;
