//! Error types for key-value storage

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Store connection error: {0}")]
    Connection(String),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Batch aborted by backend: {0}")]
    BatchAborted(String),

    #[error("Unexpected reply for {op}: {reply}")]
    UnexpectedReply { op: &'static str, reply: String },
}

impl From<anyhow::Error> for StoreError {
    fn from(value: anyhow::Error) -> Self {
        Self::Backend(value.to_string())
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(value: redis::RedisError) -> Self {
        if value.is_io_error() || value.is_connection_dropped() || value.is_timeout() {
            Self::Connection(value.to_string())
        } else {
            Self::Backend(value.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
