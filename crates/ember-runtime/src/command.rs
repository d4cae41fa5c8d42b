// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The line-oriented command protocol: one command per line in, one reply
//! line out, `"OK <detail>"` or `"ERR <category> <message>"`.

use std::fmt;
use std::path::PathBuf;

use ember_core::Category;

/// A parsed command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// `LOAD_MODULE <name>`
    LoadModule { name: String },
    /// `UNLOAD_MODULE <name>`
    UnloadModule { name: String },
    /// `SWAP_MODULE <name> <artifact-path>`
    SwapModule { name: String, artifact_path: PathBuf },
    /// `CHECKPOINT <module> <name>`
    Checkpoint { module: String, name: String },
    /// `ROLLBACK <module> <name>`
    Rollback { module: String, name: String },
    /// `BUILD <path>`
    Build { path: PathBuf },
    /// `STATUS`
    Status,
    /// `HEARTBEAT <timestamp>`
    Heartbeat { timestamp_micros: u64 },
}

/// Why a line failed to parse as a [`Command`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CommandParseError {
    /// The line was empty once whitespace was trimmed.
    #[error("empty command line")]
    Empty,
    /// The verb isn't one of the recognized commands.
    #[error("unrecognized command {0:?}")]
    UnknownVerb(String),
    /// The verb was recognized but didn't receive the right argument count.
    #[error("{verb} expects {expected} argument(s), got {actual}")]
    WrongArity {
        /// The command verb.
        verb: String,
        /// Arguments the verb requires.
        expected: usize,
        /// Arguments actually supplied.
        actual: usize,
    },
    /// `HEARTBEAT`'s timestamp argument didn't parse as a `u64`.
    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),
}

impl std::str::FromStr for Command {
    type Err = CommandParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().ok_or(CommandParseError::Empty)?;
        let args: Vec<&str> = parts.collect();

        let arity = |expected: usize| -> Result<(), CommandParseError> {
            if args.len() == expected {
                Ok(())
            } else {
                Err(CommandParseError::WrongArity {
                    verb: verb.to_string(),
                    expected,
                    actual: args.len(),
                })
            }
        };

        match verb {
            "LOAD_MODULE" => {
                arity(1)?;
                Ok(Self::LoadModule { name: args[0].to_string() })
            }
            "UNLOAD_MODULE" => {
                arity(1)?;
                Ok(Self::UnloadModule { name: args[0].to_string() })
            }
            "SWAP_MODULE" => {
                arity(2)?;
                Ok(Self::SwapModule {
                    name: args[0].to_string(),
                    artifact_path: PathBuf::from(args[1]),
                })
            }
            "CHECKPOINT" => {
                arity(2)?;
                Ok(Self::Checkpoint { module: args[0].to_string(), name: args[1].to_string() })
            }
            "ROLLBACK" => {
                arity(2)?;
                Ok(Self::Rollback { module: args[0].to_string(), name: args[1].to_string() })
            }
            "BUILD" => {
                arity(1)?;
                Ok(Self::Build { path: PathBuf::from(args[0]) })
            }
            "STATUS" => {
                arity(0)?;
                Ok(Self::Status)
            }
            "HEARTBEAT" => {
                arity(1)?;
                let timestamp_micros = args[0]
                    .parse()
                    .map_err(|_| CommandParseError::InvalidTimestamp(args[0].to_string()))?;
                Ok(Self::Heartbeat { timestamp_micros })
            }
            other => Err(CommandParseError::UnknownVerb(other.to_string())),
        }
    }
}

/// A command's outcome, rendered as one reply line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    /// The command succeeded; `detail` is a short, human-readable summary.
    Ok(String),
    /// The command failed under `category`, with a free-text `message`.
    Err(Category, String),
}

impl Reply {
    /// Shorthand for [`Reply::Ok`] from anything that converts to a `String`.
    pub fn ok(detail: impl Into<String>) -> Self {
        Self::Ok(detail.into())
    }

    /// Shorthand for [`Reply::Err`] from anything that converts to a `String`.
    pub fn err(category: Category, message: impl Into<String>) -> Self {
        Self::Err(category, message.into())
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok(detail) => write!(f, "OK {detail}"),
            Self::Err(category, message) => write!(f, "ERR {category} {message}"),
        }
    }
}
