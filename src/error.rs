//! Error types shared by every EML module
//!
//! Nothing in this crate retries or recovers locally: every failure is
//! surfaced through `EmlError` and propagated to the caller.

/// EML errors
#[derive(Debug, thiserror::Error)]
pub enum EmlError {
    #[error("Malformed ciphertext array: {0}")]
    Format(String),

    #[error("Shape mismatch: {0}")]
    Shape(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Ciphertext bound to context {found}, expected {expected}")]
    ContextMismatch { expected: String, found: String },

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Storage fetch failed: {0}")]
    Storage(String),

    #[error("Invalid event payload: {0}")]
    Event(String),

    #[error("Fixed-point overflow: {0}")]
    Overflow(String),

    #[error("Model has not been fitted")]
    NotFitted,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
}

pub type Result<T> = std::result::Result<T, EmlError>;
