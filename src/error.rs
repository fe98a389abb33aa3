//! Error types for the AIOX platform.
//!
//! One crate-wide error enum built on `thiserror`, plus the `Result` alias
//! used everywhere. Subsystem boundaries (bus, database, key-value store,
//! worker streams) each get their own variant so callers can tell a
//! transient infrastructure failure from a deterministic rejection.

use thiserror::Error;

/// The primary error type for AIOX operations.
#[derive(Error, Debug)]
pub enum AioxError {
    /// Configuration errors (missing keys, malformed values).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Event bus failures (connect, publish, consumer management, fetch).
    /// Always treated as transient by consumers: Nak and retry.
    #[error("Bus error: {0}")]
    Bus(String),

    /// Relational storage failures.
    #[error("Database error: {0}")]
    Database(String),

    /// Key-value store failures.
    #[error("Key-value store error: {0}")]
    Kv(#[from] redis::RedisError),

    /// AEAD encryption/decryption failures for the system prompt.
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// A referenced entity does not exist (or is soft-deleted).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Authentication or authorization failures.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// An address that does not resolve to an agent.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Worker pool and worker stream failures.
    #[error("Worker error: {0}")]
    Worker(String),

    /// XMPP component transport failures.
    #[error("XMPP error: {0}")]
    Xmpp(String),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Standard I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio_postgres::Error> for AioxError {
    fn from(err: tokio_postgres::Error) -> Self {
        AioxError::Database(err.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for AioxError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        AioxError::Database(err.to_string())
    }
}

impl From<deadpool_postgres::CreatePoolError> for AioxError {
    fn from(err: deadpool_postgres::CreatePoolError) -> Self {
        AioxError::Database(err.to_string())
    }
}

/// A specialized `Result` type for AIOX operations.
pub type Result<T> = std::result::Result<T, AioxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AioxError::Config("missing encryption key".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing encryption key");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err: AioxError = io_err.into();
        assert!(matches!(err, AioxError::Io(_)));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: AioxError = json_err.into();
        assert!(matches!(err, AioxError::Json(_)));
    }

    #[test]
    fn test_result_alias() {
        fn ok() -> Result<u32> {
            Ok(7)
        }
        assert_eq!(ok().unwrap(), 7);
    }

    #[test]
    fn test_invalid_address_display() {
        let err = AioxError::InvalidAddress("bob@example.org".to_string());
        assert!(err.to_string().contains("bob@example.org"));
    }
}
