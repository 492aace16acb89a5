//! Common error types for EquiTag

use std::path::PathBuf;
use thiserror::Error;

/// Common result type for EquiTag operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the audit pipeline
///
/// Statistical edge cases (zero denominators, degenerate tests, low support)
/// are never errors; they resolve to NaN or to a filtering decision. Only
/// structural problems with inputs and configuration surface here.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Required upstream artifact absent
    #[error("Missing input {artifact}: {path:?}")]
    MissingInput {
        /// Artifact name (e.g. "predictions", "class vocabulary")
        artifact: String,
        /// Path that was looked up
        path: PathBuf,
    },

    /// Upstream artifact present but structurally malformed
    #[error("Malformed {artifact}: {detail}")]
    Malformed {
        /// Artifact name
        artifact: String,
        /// What was wrong, including row context where available
        detail: String,
    },

    /// Invalid caller-supplied argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Delimited-text read/write error (wraps csv::Error)
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON encode/decode error (wraps serde_json::Error)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Lexicon pattern failed to compile (wraps regex::Error)
    #[error("Pattern error: {0}")]
    Regex(#[from] regex::Error),
}

impl Error {
    /// Build a `Malformed` error for the named artifact
    pub fn malformed(artifact: &str, detail: impl Into<String>) -> Self {
        Error::Malformed {
            artifact: artifact.to_string(),
            detail: detail.into(),
        }
    }

    /// Build a `MissingInput` error for the named artifact
    pub fn missing(artifact: &str, path: impl Into<PathBuf>) -> Self {
        Error::MissingInput {
            artifact: artifact.to_string(),
            path: path.into(),
        }
    }
}
