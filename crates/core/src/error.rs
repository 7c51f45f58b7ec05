//! Error types for sliver

use thiserror::Error;

/// Main error type for sliver operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid geometry in feature {index}: {reason}")]
    InvalidGeometry { index: usize, reason: String },

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Algorithm error: {0}")]
    Algorithm(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn geometry(index: usize, reason: impl Into<String>) -> Self {
        Error::InvalidGeometry {
            index,
            reason: reason.into(),
        }
    }
}

/// Result type alias for sliver operations
pub type Result<T> = std::result::Result<T, Error>;
