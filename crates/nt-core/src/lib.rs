//! # nt-core
//!
//! Core types for ntupler: event keys, channel labels, match outcomes and the
//! error taxonomy shared by every crate in the workspace.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

pub use error::{Error, Result, RowError};
pub use types::{ChannelLabel, EventKey, MatchOutcome, RecoAlgo, StreamLevel, TruthLevel};
