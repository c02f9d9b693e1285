//! Error types for Flight Service
//!
//! Per-record failures inside a batch are captured into the ingestion result
//! and never propagated past the batch boundary. Publish failures are
//! absorbed by the backlog and never surface to ingestion callers.

use thiserror::Error;

/// Result type for flight-service operations
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed input, rejected before any write
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced entity absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Publish or connect failure, recoverable through backlog/reconnect
    #[error("Transient bus error: {0}")]
    TransientBus(String),

    /// Handler failure that has exhausted its retries
    #[error("Permanent processing error: {0}")]
    PermanentProcessing(String),

    /// Transactional write failure, aborts the enclosing transaction only
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Cache operation failed
    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    /// Payload (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rdkafka::error::KafkaError> for AppError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        AppError::TransientBus(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kafka_errors_map_to_transient_bus() {
        let err: AppError = rdkafka::error::KafkaError::Canceled.into();
        assert!(matches!(err, AppError::TransientBus(_)));
    }

    #[test]
    fn storage_errors_keep_their_source() {
        let err = AppError::Storage(sqlx::Error::RowNotFound);
        assert!(err.to_string().starts_with("Storage error"));
    }
}
