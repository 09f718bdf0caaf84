//! Error types for the signaling router

use thiserror::Error;

/// Signaling router error
#[derive(Debug, Error)]
pub enum RouterError {
    /// Target or room not found; reported to the sender only
    #[error("routing failed: {0}")]
    Routing(String),

    /// Connection or listener failure; terminates only the affected session
    #[error("I/O error: {0}")]
    Transport(#[from] std::io::Error),

    /// Message could not be encoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for router operations
pub type RouterResult<T> = Result<T, RouterError>;
