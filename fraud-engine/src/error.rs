//! Error types for fraud engine

use thiserror::Error;

/// Fraud engine error
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed transaction input
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    /// Shared store unreachable or rejected the operation
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// External classifier error
    #[error("Classifier error: {0}")]
    Classifier(String),

    /// Geolocation lookup error
    #[error("Geolocation lookup error: {0}")]
    GeoLookup(String),

    /// Operation exceeded its deadline
    #[error("Timeout after {millis}ms: {operation}")]
    Timeout {
        /// Deadline in milliseconds
        millis: u64,
        /// Operation
        operation: String,
    },

    /// Circuit breaker open
    #[error("Circuit breaker {0} is open")]
    CircuitOpen(String),

    /// Alert channel publish failed
    #[error("Alert channel error: {0}")]
    Alert(String),

    /// Feedback store error
    #[error("Feedback store error: {0}")]
    Feedback(String),

    /// No recorded verdict for transaction
    #[error("Unknown transaction: {0}")]
    UnknownTransaction(String),

    /// Evaluation cancelled by caller
    #[error("Evaluation cancelled")]
    Cancelled,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

#[cfg(feature = "redis-store")]
impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::StoreUnavailable(err.to_string())
    }
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
