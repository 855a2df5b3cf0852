//! In-memory object store for testing
//!
//! [`MemoryClient`] keeps every bucket in process memory and lets tests inject
//! the failures a real store produces: transient read errors, connections
//! dropped mid-stream, objects deleted between listing and fetch, and failing
//! uploads.

use super::error::{BackendError, BackendResult};
use super::{ObjectClient, ObjectKey, ReadStream, WriteSession};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Default)]
struct State {
    objects: HashMap<(String, String), Bytes>,
    /// Remaining transient failures for `open_read`, per key
    read_failures: HashMap<String, usize>,
    /// One-shot mid-stream failure after N bytes, per key
    stream_failures: HashMap<String, usize>,
    /// Keys removed right after the next listing that returns them
    vanishing: HashSet<String>,
    /// Parts accepted before every write session fails
    write_limit: Option<usize>,
    /// Commits fail with a transient network error
    fail_commits: bool,
    /// Part uploads never complete
    stall_writes: bool,
    reads: HashMap<String, usize>,
    aborted_sessions: usize,
    chunk_size: usize,
}

/// In-memory [`ObjectClient`] with fault injection
///
/// # Example
///
/// ```rust
/// use bucket_zip::backend::{MemoryClient, ObjectClient};
///
/// #[tokio::main]
/// async fn main() {
///     let client = MemoryClient::new();
///     client.insert("bucket", "zipfodder/hello.txt", b"Hello World");
///     client.fail_reads("zipfodder/hello.txt", 2);
///
///     assert!(client.exists("bucket", "zipfodder/hello.txt").await.unwrap());
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryClient {
    state: Arc<Mutex<State>>,
}

impl MemoryClient {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                chunk_size: DEFAULT_CHUNK_SIZE,
                ..Default::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store an object
    pub fn insert(&self, bucket: &str, key: &str, data: impl AsRef<[u8]>) {
        self.lock().objects.insert(
            (bucket.to_string(), key.to_string()),
            Bytes::copy_from_slice(data.as_ref()),
        );
    }

    /// Remove an object
    pub fn remove(&self, bucket: &str, key: &str) {
        self.lock()
            .objects
            .remove(&(bucket.to_string(), key.to_string()));
    }

    /// Get an object's content
    pub fn get(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Size of the chunks read streams are split into
    pub fn set_chunk_size(&self, chunk_size: usize) {
        self.lock().chunk_size = chunk_size.max(1);
    }

    /// Fail the next `times` opens of `key` with a transient network error
    pub fn fail_reads(&self, key: &str, times: usize) {
        self.lock().read_failures.insert(key.to_string(), times);
    }

    /// Drop the connection once, after `after` bytes of `key` were streamed
    pub fn fail_stream_after(&self, key: &str, after: usize) {
        self.lock().stream_failures.insert(key.to_string(), after);
    }

    /// Delete `key` right after the next listing that includes it
    pub fn vanish_after_list(&self, key: &str) {
        self.lock().vanishing.insert(key.to_string());
    }

    /// Make every write session fail once it has accepted `parts` parts
    pub fn fail_writes_after(&self, parts: usize) {
        self.lock().write_limit = Some(parts);
    }

    /// Make every commit fail with a network error
    pub fn fail_commits(&self) {
        self.lock().fail_commits = true;
    }

    /// Make every part upload hang until its caller gives up
    pub fn stall_writes(&self) {
        self.lock().stall_writes = true;
    }

    /// Number of `open_read` calls made for `key`
    pub fn read_count(&self, key: &str) -> usize {
        self.lock().reads.get(key).copied().unwrap_or(0)
    }

    /// Number of write sessions that were aborted
    pub fn aborted_sessions(&self) -> usize {
        self.lock().aborted_sessions
    }
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectClient for MemoryClient {
    async fn list(&self, bucket: &str, prefix: &str) -> BackendResult<Vec<ObjectKey>> {
        let mut state = self.lock();
        let keys: Vec<ObjectKey> = state
            .objects
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect();

        for key in &keys {
            if state.vanishing.remove(key) {
                state.objects.remove(&(bucket.to_string(), key.clone()));
            }
        }
        Ok(keys)
    }

    async fn open_read(&self, bucket: &str, key: &str, offset: u64) -> BackendResult<ReadStream> {
        let mut state = self.lock();
        *state.reads.entry(key.to_string()).or_insert(0) += 1;

        if let Some(remaining) = state.read_failures.get_mut(key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BackendError::Network {
                    message: format!("injected read failure for {}", key),
                });
            }
        }

        let data = state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| BackendError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
                backend: "memory".to_string(),
            })?;

        let start = (offset as usize).min(data.len());
        let data = data.slice(start..);
        let fail_at = state.stream_failures.remove(key);
        let chunk_size = state.chunk_size;

        let mut chunks: Vec<BackendResult<Bytes>> = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            let mut end = (pos + chunk_size).min(data.len());
            if let Some(limit) = fail_at {
                if pos >= limit {
                    chunks.push(Err(BackendError::Network {
                        message: format!("injected connection reset for {}", key),
                    }));
                    break;
                }
                end = end.min(limit.max(pos + 1));
            }
            chunks.push(Ok(data.slice(pos..end)));
            pos = end;
        }

        Ok(stream::iter(chunks).boxed())
    }

    async fn open_write(&self, bucket: &str, key: &str) -> BackendResult<Box<dyn WriteSession>> {
        let limit = self.lock().write_limit;
        Ok(Box::new(MemoryWriteSession {
            client: self.clone(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            buffer: Vec::new(),
            parts: 0,
            limit,
        }))
    }

    async fn exists(&self, bucket: &str, key: &str) -> BackendResult<bool> {
        Ok(self.get(bucket, key).is_some())
    }

    async fn delete(&self, bucket: &str, key: &str) -> BackendResult<()> {
        self.remove(bucket, key);
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}

/// Staged write: parts accumulate privately until commit
struct MemoryWriteSession {
    client: MemoryClient,
    bucket: String,
    key: String,
    buffer: Vec<u8>,
    parts: usize,
    limit: Option<usize>,
}

#[async_trait]
impl WriteSession for MemoryWriteSession {
    async fn write_part(&mut self, part: Bytes) -> BackendResult<()> {
        let stall = self.client.lock().stall_writes;
        if stall {
            futures::future::pending::<()>().await;
        }
        if self.limit.is_some_and(|limit| self.parts >= limit) {
            return Err(BackendError::Other {
                backend: "memory".to_string(),
                message: format!("injected write failure for {}", self.key),
            });
        }
        self.buffer.extend_from_slice(&part);
        self.parts += 1;
        Ok(())
    }

    async fn commit(&mut self) -> BackendResult<()> {
        let fail = self.client.lock().fail_commits;
        if fail {
            return Err(BackendError::Network {
                message: format!("injected commit failure for {}", self.key),
            });
        }
        self.client.insert(&self.bucket, &self.key, &self.buffer);
        Ok(())
    }

    async fn abort(&mut self) -> BackendResult<()> {
        self.client.lock().aborted_sessions += 1;
        Ok(())
    }
}
