use thiserror::Error;

/// Main error type for cache operations
///
/// A cache miss is never an error: lookups return `Ok(None)` for absent,
/// expired, or wrongly-typed entries.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Duplicate signature: {0}")]
    DuplicateSignature(String),

    #[error("Unknown signature: {0}")]
    UnknownSignature(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unsupported expression shape: {0}")]
    UnsupportedExpression(String),

    #[error("Unsupported payload type: {0}")]
    UnsupportedType(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stream cancelled after {bytes_written} bytes")]
    Cancelled { bytes_written: u64 },
}

impl CacheError {
    /// Whether the error comes from misconfiguration rather than runtime I/O
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::DuplicateSignature(_) | Self::UnknownSignature(_) | Self::Configuration(_)
        )
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
