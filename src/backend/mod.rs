//! Object-store client abstraction
//!
//! The archive and verification engines never talk to a storage SDK directly.
//! They consume the [`ObjectClient`] trait, which captures the five primitives
//! they need: list, read, staged write, exists and delete.
//!
//! Two implementations ship with the crate:
//!
//! - [`ObjectStoreClient`]: production client over the `object_store` crate
//!   (Google Cloud Storage, local filesystem, in-memory)
//! - [`MemoryClient`]: in-memory store with fault injection for tests
//!
//! # Example
//!
//! ```no_run
//! use bucket_zip::backend::{MemoryClient, ObjectClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = MemoryClient::new();
//!     client.insert("bucket", "zipfodder/hello.txt", b"Hello World");
//!
//!     let keys = client.list("bucket", "zipfodder").await?;
//!     assert_eq!(keys, vec!["zipfodder/hello.txt".to_string()]);
//!     Ok(())
//! }
//! ```

pub mod error;
mod memory;
mod cloud;

pub use error::{BackendError, BackendResult};
pub use memory::MemoryClient;
pub use cloud::{ObjectStoreClient, StoreProvider};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

/// Key of a single object inside a bucket
pub type ObjectKey = String;

/// Byte stream of one object, read once to completion
pub type ReadStream = BoxStream<'static, BackendResult<Bytes>>;

/// Unified client trait for the remote object store
///
/// Implementors must be `Send + Sync`: one client handle is shared read-only
/// by every concurrent fetch of an assembly or verification run.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// List every key in `bucket` that starts with `prefix`
    ///
    /// No ordering is guaranteed; callers that need a stable order sort
    /// the result themselves.
    async fn list(&self, bucket: &str, prefix: &str) -> BackendResult<Vec<ObjectKey>>;

    /// Open a read stream for `bucket/key` starting at byte `offset`
    ///
    /// # Errors
    ///
    /// Returns `BackendError::NotFound` if the object doesn't exist.
    async fn open_read(&self, bucket: &str, key: &str, offset: u64) -> BackendResult<ReadStream>;

    /// Start a staged write to `bucket/key`
    ///
    /// Nothing becomes visible under the key until [`WriteSession::commit`]
    /// succeeds.
    async fn open_write(&self, bucket: &str, key: &str) -> BackendResult<Box<dyn WriteSession>>;

    /// Check if an object exists
    async fn exists(&self, bucket: &str, key: &str) -> BackendResult<bool>;

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete(&self, bucket: &str, key: &str) -> BackendResult<()>;

    /// Get the backend name (e.g., "memory", "gcs")
    fn backend_name(&self) -> &str;
}

/// A staged (resumable) write against one destination key
#[async_trait]
pub trait WriteSession: Send {
    /// Upload the next part. Parts are committed in the order written.
    async fn write_part(&mut self, part: Bytes) -> BackendResult<()>;

    /// Finalize the object so it becomes visible at its key
    ///
    /// A session whose commit failed must still be aborted.
    async fn commit(&mut self) -> BackendResult<()>;

    /// Discard the session; no bytes become visible at the key
    async fn abort(&mut self) -> BackendResult<()>;
}
