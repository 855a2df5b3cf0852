//! Error types for the object-store client abstraction
//!
//! Every store operation reports a [`BackendError`]. The retry layer relies on
//! [`BackendError::is_retriable`] to tell transient failures (network, timeout,
//! server-side unavailability) from permanent ones (missing object, bad
//! credentials, invalid configuration).

use std::io;
use thiserror::Error;

/// Result type alias for backend operations
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Unified error type for backend operations
#[derive(Debug, Error)]
pub enum BackendError {
    /// I/O error occurred during backend operation
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Object not found in bucket
    #[error("Object not found on {backend}: {bucket}/{key}")]
    NotFound {
        bucket: String,
        key: String,
        backend: String,
    },

    /// Permission denied accessing resource
    #[error("Permission denied for {bucket}/{key}: {message}")]
    PermissionDenied {
        bucket: String,
        key: String,
        message: String,
    },

    /// Network error during remote operation
    #[error("Network error: {message}")]
    Network { message: String },

    /// Operation timed out
    #[error("Operation '{operation}' timed out after {duration_ms} ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// Store reported a server-side failure (5xx equivalent)
    #[error("Service unavailable on {backend}: {message}")]
    Unavailable { backend: String, message: String },

    /// Invalid configuration for backend
    #[error("Invalid configuration for {backend}: {message}")]
    InvalidConfig { backend: String, message: String },

    /// Generic backend error with context
    #[error("Backend error on {backend}: {message}")]
    Other { backend: String, message: String },
}

impl BackendError {
    /// Check if this error is retriable (transient)
    pub fn is_retriable(&self) -> bool {
        match self {
            BackendError::Timeout { .. } => true,
            BackendError::Network { .. } => true,
            BackendError::Unavailable { .. } => true,
            BackendError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ),

            BackendError::NotFound { .. } => false,
            BackendError::PermissionDenied { .. } => false,
            BackendError::InvalidConfig { .. } => false,
            BackendError::Other { .. } => false,
        }
    }

    /// Check if this error indicates the object was not found
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound { .. })
    }

    /// Convert an `object_store` error into a backend error for `bucket/key`
    pub fn from_object_store(err: object_store::Error, bucket: &str, key: &str) -> Self {
        match err {
            object_store::Error::NotFound { .. } => BackendError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
                backend: "object_store".to_string(),
            },
            object_store::Error::NotImplemented => BackendError::Other {
                backend: "object_store".to_string(),
                message: "operation not implemented".to_string(),
            },
            other => classify_message("object_store", other.to_string()),
        }
    }
}

/// Map a free-form store error message onto the transient/permanent split.
///
/// Generic store errors carry the HTTP status only in their text.
pub(crate) fn classify_message(backend: &str, message: String) -> BackendError {
    let lower = message.to_lowercase();
    if lower.contains("403") || lower.contains("401") || lower.contains("forbidden") {
        BackendError::PermissionDenied {
            bucket: String::new(),
            key: String::new(),
            message,
        }
    } else if lower.contains("timeout") || lower.contains("timed out") {
        BackendError::Timeout {
            operation: backend.to_string(),
            duration_ms: 0,
        }
    } else if lower.contains("connection")
        || lower.contains("reset")
        || lower.contains("broken pipe")
    {
        BackendError::Network { message }
    } else if lower.contains("500")
        || lower.contains("502")
        || lower.contains("503")
        || lower.contains("504")
        || lower.contains("429")
        || lower.contains("slow down")
        || lower.contains("throttl")
    {
        BackendError::Unavailable {
            backend: backend.to_string(),
            message,
        }
    } else {
        BackendError::Other {
            backend: backend.to_string(),
            message,
        }
    }
}
