//! Error types for ntupler

use serde::Serialize;
use thiserror::Error;

/// ntupler error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    /// Parquet / Arrow read or write error
    #[error("Parquet error: {0}")]
    Parquet(String),

    /// Key index construction failed (native or custom).
    ///
    /// Non-fatal to a pipeline: the affected pass is abandoned and reported.
    #[error("index build failed for stream '{stream}': {reason}")]
    IndexBuild {
        /// Stream the index was built for.
        stream: String,
        /// Human-readable cause.
        reason: String,
    },

    /// Two paired streams (or a stream and a sink) disagree on a field.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Expression compile/bind error
    #[error("Expression error: {0}")]
    Expression(String),

    /// Histogram construction or arithmetic error
    #[error("Histogram error: {0}")]
    Histogram(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Row-level errors.
///
/// These are recovered locally: the row is skipped, the scan continues and the
/// occurrence is tallied in the run summary.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowError {
    /// A selected record satisfied zero or several channel predicates.
    #[error("record satisfies {matches} channel predicates, expected exactly one")]
    ClassificationAmbiguity {
        /// Number of channel predicates that held.
        matches: usize,
    },

    /// A W-decay product PDG id was the sentinel `0`.
    #[error("indeterminate ttbar decay mode (W decay PDG id is 0)")]
    IndeterminateDecay,
}

impl RowError {
    /// Stable short name used as a tally key.
    pub fn reason(&self) -> &'static str {
        match self {
            RowError::ClassificationAmbiguity { .. } => "classification_ambiguity",
            RowError::IndeterminateDecay => "indeterminate_decay",
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_error_reason_is_stable() {
        assert_eq!(
            RowError::ClassificationAmbiguity { matches: 2 }.reason(),
            "classification_ambiguity"
        );
        assert_eq!(RowError::IndeterminateDecay.reason(), "indeterminate_decay");
    }

    #[test]
    fn index_build_names_the_stream() {
        let err = Error::IndexBuild { stream: "truth".into(), reason: "empty index".into() };
        assert_eq!(err.to_string(), "index build failed for stream 'truth': empty index");
    }
}
