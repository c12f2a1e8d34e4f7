//! Shared error types for keymesh.

use thiserror::Error;

/// Top-level error type for keymesh types.
#[derive(Error, Debug)]
pub enum KeymeshError {
    /// Bytes offered as a public key are not a valid encoding.
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Alias for Result with KeymeshError.
pub type KeymeshResult<T> = Result<T, KeymeshError>;
