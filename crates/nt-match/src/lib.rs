//! # nt-match
//!
//! Joins a reconstructed event stream with a truth stream (parton or
//! particle level) by `(runNumber, eventNumber)`, splits the result into the
//! e+jets and μ+jets channels and accumulates acceptance and efficiency
//! corrections.
//!
//! A pass for one truth level runs in two scans:
//!
//! 1. the forward pass drives over the reco stream and looks every selected
//!    row up in the truth [`KeyIndex`];
//! 2. the reverse pass scans the truth stream for accepted rows that the
//!    forward pass never emitted.
//!
//! [`Pipeline`] runs one pass per truth level and writes the outputs.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod accumulator;
pub mod classifier;
pub mod config;
pub mod extras;
pub mod joiner;
pub mod key_index;
pub mod pipeline;
pub mod sum_weights;
pub mod summary;

pub use accumulator::{AccState, CorrectionAccumulator, Corrections, ObservableSet};
pub use classifier::{Classifier, DecayMode};
pub use config::{IndexBackend, MatchConfig, ObservableConfig};
pub use extras::{ExtraSpec, ExtraValues, TopPrefixes};
pub use joiner::{CancelToken, ChannelOutput, JoinResult, Joiner, OutputTarget};
pub use key_index::KeyIndex;
pub use pipeline::{PassReport, Pipeline, TruthInput};
pub use sum_weights::{Campaign, SumWeights};
pub use summary::RunSummary;
