use thiserror::Error;

/// Core error type shared by the foundation layer.
///
/// Uses `thiserror` with `#[source]` annotations so error chains survive
/// into the higher layers for debugging.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Serialization failed when encoding a value to bytes.
    #[error("serialization failed")]
    Serialization(#[source] serde_json::Error),

    /// Deserialization failed when decoding bytes to a value.
    #[error("deserialization failed")]
    Deserialization(#[source] serde_json::Error),

    /// An invalid worker status string was encountered during parsing.
    #[error("invalid worker status: {0}")]
    InvalidStatus(String),

    /// An invalid persistence level string was encountered during parsing.
    #[error("invalid persistence level: {0}")]
    InvalidPersistenceLevel(String),
}

pub type Result<T> = std::result::Result<T, Error>;
