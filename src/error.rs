/*!
 * Error types for bucket-zip
 *
 * Each pipeline stage has its own error type; [`BucketZipError`] aggregates
 * them for the CLI and maps them onto process exit codes.
 */

use crate::backend::BackendError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BucketZipError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_MISMATCH: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

/// Enumerating the source prefix failed
#[derive(Debug, Error)]
#[error("Failed to list {bucket}/{prefix}: {source}")]
pub struct ListError {
    pub bucket: String,
    pub prefix: String,
    #[source]
    pub source: BackendError,
}

/// The digest manifest could not be loaded
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Manifest object does not exist
    #[error("Manifest not found: {bucket}/{key}")]
    Missing { bucket: String, key: String },

    /// Manifest is not a flat JSON object of strings
    #[error("Manifest {bucket}/{key} is not a flat string map: {source}")]
    Parse {
        bucket: String,
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Manifest exists but could not be read
    #[error("Failed to read manifest: {0}")]
    Fetch(#[from] FetchError),
}

/// Reading a source object failed for good
///
/// Transient failures are retried inside the fetcher and only surface here
/// once the retry budget is spent.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Non-retriable failure, or retries exhausted
    #[error("Failed to fetch {bucket}/{key} after {attempts} attempt(s): {source}")]
    Permanent {
        bucket: String,
        key: String,
        attempts: u32,
        #[source]
        source: BackendError,
    },

    /// The surrounding operation was cancelled
    #[error("Fetch of {bucket}/{key} cancelled")]
    Cancelled { bucket: String, key: String },
}

impl FetchError {
    /// Check if the object was missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::Permanent { source, .. } if source.is_not_found())
    }
}

/// Writing to the destination object failed
#[derive(Debug, Error)]
pub enum SinkError {
    /// The store rejected a part or the final commit
    #[error("Write to {bucket}/{key} failed: {source}")]
    Write {
        bucket: String,
        key: String,
        #[source]
        source: BackendError,
    },

    /// A part flush exceeded its timeout
    #[error("Write to {bucket}/{key} timed out after {timeout_ms} ms")]
    Timeout {
        bucket: String,
        key: String,
        timeout_ms: u64,
    },

    /// Local copy could not be written
    #[error("Failed to write local copy: {0}")]
    Keep(#[from] std::io::Error),
}

/// Archive encoding failed
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Operation not allowed in the current builder state
    #[error("Invalid archive state: cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    /// Entry name rejected
    #[error("Invalid entry name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// Archive needs ZIP64, which is not produced
    #[error("Archive limit exceeded: {0}")]
    LimitExceeded(String),

    /// Compression failed
    #[error("Compression error: {0}")]
    Compression(#[from] std::io::Error),

    /// Output sink failed
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Assembly failed; the destination was left absent or unchanged
#[derive(Debug, Error)]
pub enum AssembleError {
    /// Request fields missing or inconsistent
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Nothing under the source prefix and the request disallows empty archives
    #[error("No objects under {bucket}/{prefix}")]
    EmptySource { bucket: String, prefix: String },

    #[error(transparent)]
    List(#[from] ListError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    /// A background fetch task panicked or was torn down
    #[error("Fetch task failed: {0}")]
    Task(String),

    /// Cancelled by the caller
    #[error("Assembly cancelled")]
    Cancelled,
}

/// Verification could not produce a result set
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("Invalid manifest key: {0}")]
    InvalidKey(String),
}

/// Top-level error for the library and CLI
#[derive(Debug, Error)]
pub enum BucketZipError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Assemble(#[from] AssembleError),

    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    /// One or more objects failed digest verification
    #[error("{failed} of {total} object(s) failed verification")]
    Mismatch { failed: usize, total: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BucketZipError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            BucketZipError::Mismatch { .. } => EXIT_MISMATCH,
            _ => EXIT_FATAL,
        }
    }
}
