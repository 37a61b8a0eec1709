use thiserror::Error;

/// Core error types for Gatewall
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// iptables-restore invocation failed
    #[error("restore error: {message}")]
    Restore {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    /// Rule store operation failed
    #[error("store error: {0}")]
    Store(#[from] crate::core::store::StoreError),

    /// Internal logic error
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
