use thiserror::Error;

/// Common error types for veilnet
///
/// Variants map one-to-one onto failure modes the core actually raises;
/// recoverable conditions like lookup timeouts are signaled through handler
/// callbacks, not errors.
#[derive(Debug, Error)]
pub enum VeilnetError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("No established path")]
    NoPath,

    #[error("No session for conversation")]
    NoSession,

    #[error("Crypto failure: {0}")]
    Crypto(String),

    #[error("Identity error: {0}")]
    Identity(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type for veilnet operations
pub type Result<T> = std::result::Result<T, VeilnetError>;

impl VeilnetError {
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn crypto(msg: impl Into<String>) -> Self {
        Self::Crypto(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
