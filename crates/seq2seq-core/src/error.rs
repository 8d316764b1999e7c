//! Error types for RustSeq2Seq.

use thiserror::Error;

/// Main error type for decoder operations.
#[derive(Error, Debug)]
pub enum Seq2SeqError {
    /// Model loading errors.
    #[error("Model error: {0}")]
    Model(String),

    /// Decoding errors.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Configuration errors.
    #[error("Config error: {0}")]
    Config(String),

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Candle tensor errors.
    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    /// JSON parsing errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for decoder operations.
pub type Seq2SeqResult<T> = Result<T, Seq2SeqError>;
