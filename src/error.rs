//! Error types for the scorecard.
//!
//! Scorers never return these for bad or missing answer data; they report
//! sentinel results instead. Errors are reserved for malformed inputs,
//! external call failures, and ledger writes.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our custom error.
pub type Result<T> = std::result::Result<T, ScorecardError>;

/// Errors that can occur while scoring, ingesting judge output, or persisting.
#[derive(Error, Debug)]
pub enum ScorecardError {
    /// Error reading or writing files.
    #[error("I/O error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error during serialization/deserialization.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Malformed or missing reference/answer input.
    #[error("Invalid input: {0}")]
    Input(String),

    /// A mandatory dataset column could not be resolved from the headers.
    #[error("Missing mandatory column '{column}' (available: {available})")]
    MissingColumn { column: String, available: String },

    /// Embedding or judge call failure.
    #[error("External call '{service}' failed: {message}")]
    ExternalCall { service: String, message: String },

    /// Judge text could not be parsed by any strategy.
    #[error("Failed to parse judge response: {0}")]
    JudgeParse(String),

    /// Judge record failed consistency validation.
    #[error("Judge record failed validation: {0}")]
    Validation(String),

    /// Ledger store could not be written.
    #[error("Ledger store error at '{path}': {message}")]
    Store { path: PathBuf, message: String },

    /// LLM API error.
    #[error("LLM API error: {0}")]
    LlmApi(String),

    /// HTTP request error.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// An external call did not finish in time.
    #[error("'{service}' timed out after {seconds}s")]
    Timeout { service: String, seconds: u64 },

    /// Configuration file error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ScorecardError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a store error with path context.
    pub fn store(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Store {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an external call error for the named service.
    pub fn external(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalCall {
            service: service.into(),
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for ScorecardError {
    fn from(err: reqwest::Error) -> Self {
        ScorecardError::Http(err.to_string())
    }
}

impl From<serde_json::Error> for ScorecardError {
    fn from(err: serde_json::Error) -> Self {
        ScorecardError::Serialization(err.to_string())
    }
}

impl From<csv::Error> for ScorecardError {
    fn from(err: csv::Error) -> Self {
        ScorecardError::Serialization(err.to_string())
    }
}
