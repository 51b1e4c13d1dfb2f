//! Security error types.

use resilience::ClientError;
use thiserror::Error;

/// Errors raised while obtaining keys or transforming sensitive fields.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// The key service has no key under this name.
    #[error("key '{0}' not found")]
    KeyNotFound(String),

    /// The key service could not be reached or answered with an error.
    #[error("failed to fetch key '{key_name}': {source}")]
    KeyFetch {
        key_name: String,
        #[source]
        source: ClientError,
    },

    /// Key material is not a base64-encoded 256-bit key.
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    /// Encryption failed.
    #[error("encryption failed")]
    Encryption,

    /// Ciphertext is malformed, was tampered with, or was sealed under another key.
    #[error("decryption failed: {0}")]
    Decryption(&'static str),
}

/// Convenience type alias for security results.
pub type Result<T> = std::result::Result<T, SecurityError>;
