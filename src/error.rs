//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecError {
    /// Vectors built from different vocabularies were compared or concatenated.
    #[error("Encoding mismatch: {0}")]
    EncodingMismatch(String),

    #[error("Insufficient label diversity: observed {observed} distinct classes, scorer expects {expected}")]
    InsufficientLabelDiversity { observed: usize, expected: usize },

    #[error("Degenerate index: {0}")]
    DegenerateIndex(String),

    #[error("Unknown product: {0}")]
    UnknownProduct(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid model artifact: {0}")]
    InvalidArtifact(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type RecResult<T> = Result<T, RecError>;
