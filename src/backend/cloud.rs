//! Object store client backed by the `object_store` crate
//!
//! Provides the [`ObjectClient`] interface for Google Cloud Storage, a local
//! directory tree (one sub-directory per bucket) and a process-local
//! in-memory store. Staged writes use multipart uploads, so a destination
//! object only appears once the upload is completed.
//!
//! # Example
//!
//! ```no_run
//! use bucket_zip::backend::{ObjectClient, ObjectStoreClient, StoreProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Authentication: GOOGLE_APPLICATION_CREDENTIALS or
//!     // GOOGLE_SERVICE_ACCOUNT + GOOGLE_SERVICE_ACCOUNT_KEY
//!     let client = ObjectStoreClient::new(StoreProvider::Gcs);
//!     let keys = client.list("my-bucket", "zipfodder/").await?;
//!     println!("{} objects", keys.len());
//!     Ok(())
//! }
//! ```

use super::error::{BackendError, BackendResult};
use super::{ObjectClient, ObjectKey, ReadStream, WriteSession};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{StreamExt, TryStreamExt};
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{
    ClientOptions, GetOptions, GetRange, MultipartUpload, ObjectStore, PutPayload, RetryConfig,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Which storage service buckets resolve to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase", tag = "provider")]
pub enum StoreProvider {
    /// Google Cloud Storage, credentials from the environment
    #[default]
    Gcs,

    /// Local directory; each bucket is a sub-directory of `root`
    Local { root: PathBuf },

    /// Process-local in-memory buckets
    Memory,
}

/// Production [`ObjectClient`] over `object_store`
///
/// Bucket handles are created on first use and cached, so every fetch of a
/// run shares the same connection pool.
///
/// Remote providers retry individual HTTP requests themselves (see
/// [`ObjectStoreClient::with_http_retries`]); upload parts are only retried
/// there, never by re-sending a part from the caller.
pub struct ObjectStoreClient {
    provider: StoreProvider,
    stores: RwLock<HashMap<String, Arc<dyn ObjectStore>>>,
    http_retries: usize,
    connect_timeout: Option<Duration>,
}

impl ObjectStoreClient {
    /// Create a client resolving buckets through `provider`
    pub fn new(provider: StoreProvider) -> Self {
        Self {
            provider,
            stores: RwLock::new(HashMap::new()),
            http_retries: 5,
            connect_timeout: None,
        }
    }

    /// Builder pattern: retries of a single HTTP request against a remote store
    pub fn with_http_retries(mut self, retries: usize) -> Self {
        self.http_retries = retries;
        self
    }

    /// Builder pattern: timeout for establishing a connection to a remote store
    ///
    /// Body transfers are not bounded here; stalled reads are caught per
    /// chunk by the fetcher.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn http_retries(&self) -> usize {
        self.http_retries
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    fn store(&self, bucket: &str) -> BackendResult<Arc<dyn ObjectStore>> {
        if let Some(store) = self
            .stores
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(bucket)
        {
            return Ok(Arc::clone(store));
        }

        let built = self.build(bucket)?;
        let mut stores = self.stores.write().unwrap_or_else(|e| e.into_inner());
        Ok(Arc::clone(
            stores.entry(bucket.to_string()).or_insert(built),
        ))
    }

    fn build(&self, bucket: &str) -> BackendResult<Arc<dyn ObjectStore>> {
        let store: Arc<dyn ObjectStore> = match &self.provider {
            StoreProvider::Gcs => {
                let mut builder = GoogleCloudStorageBuilder::from_env()
                    .with_bucket_name(bucket)
                    .with_retry(RetryConfig {
                        max_retries: self.http_retries,
                        ..Default::default()
                    });
                if let Some(timeout) = self.connect_timeout {
                    builder = builder
                        .with_client_options(ClientOptions::new().with_connect_timeout(timeout));
                }
                Arc::new(builder.build().map_err(|e| BackendError::InvalidConfig {
                    backend: "gcs".to_string(),
                    message: format!("Failed to create GCS client: {}", e),
                })?)
            }
            StoreProvider::Local { root } => {
                let dir = root.join(bucket);
                std::fs::create_dir_all(&dir)?;
                Arc::new(LocalFileSystem::new_with_prefix(&dir).map_err(|e| {
                    BackendError::InvalidConfig {
                        backend: "local".to_string(),
                        message: format!("Failed to open {}: {}", dir.display(), e),
                    }
                })?)
            }
            StoreProvider::Memory => Arc::new(InMemory::new()),
        };
        tracing::debug!(bucket, provider = ?self.provider, "Opened bucket");
        Ok(store)
    }
}

fn object_path(bucket: &str, key: &str) -> BackendResult<ObjectPath> {
    ObjectPath::parse(key).map_err(|e| BackendError::Other {
        backend: "object_store".to_string(),
        message: format!("Invalid object key {}/{}: {}", bucket, key, e),
    })
}

/// Directory part of a raw string prefix ("a/b/c" -> "a/b")
fn list_root(prefix: &str) -> Option<ObjectPath> {
    prefix
        .rfind('/')
        .map(|i| &prefix[..i])
        .filter(|dir| !dir.is_empty())
        .map(ObjectPath::from)
}

#[async_trait]
impl ObjectClient for ObjectStoreClient {
    #[tracing::instrument(skip(self), fields(otel.kind = "client", backend = "object_store"))]
    async fn list(&self, bucket: &str, prefix: &str) -> BackendResult<Vec<ObjectKey>> {
        let store = self.store(bucket)?;

        // object_store prefixes match whole path segments; list the enclosing
        // directory and apply the raw string prefix afterwards.
        let root = list_root(prefix);
        let metas: Vec<_> = store
            .list(root.as_ref())
            .try_collect()
            .await
            .map_err(|e| BackendError::from_object_store(e, bucket, prefix))?;

        Ok(metas
            .into_iter()
            .map(|meta| meta.location.to_string())
            .filter(|key| key.starts_with(prefix))
            .collect())
    }

    #[tracing::instrument(skip(self), fields(otel.kind = "client", backend = "object_store"))]
    async fn open_read(&self, bucket: &str, key: &str, offset: u64) -> BackendResult<ReadStream> {
        let store = self.store(bucket)?;
        let path = object_path(bucket, key)?;

        let options = GetOptions {
            range: (offset > 0).then_some(GetRange::Offset(offset as usize)),
            ..Default::default()
        };
        let result = store
            .get_opts(&path, options)
            .await
            .map_err(|e| BackendError::from_object_store(e, bucket, key))?;

        let bucket = bucket.to_string();
        let key = key.to_string();
        Ok(result
            .into_stream()
            .map_err(move |e| BackendError::from_object_store(e, &bucket, &key))
            .boxed())
    }

    #[tracing::instrument(skip(self), fields(otel.kind = "client", backend = "object_store"))]
    async fn open_write(&self, bucket: &str, key: &str) -> BackendResult<Box<dyn WriteSession>> {
        let store = self.store(bucket)?;
        let path = object_path(bucket, key)?;

        let upload = store
            .put_multipart(&path)
            .await
            .map_err(|e| BackendError::from_object_store(e, bucket, key))?;

        Ok(Box::new(MultipartSession {
            upload,
            bucket: bucket.to_string(),
            key: key.to_string(),
            parts: 0,
        }))
    }

    #[tracing::instrument(skip(self), fields(otel.kind = "client", backend = "object_store"))]
    async fn exists(&self, bucket: &str, key: &str) -> BackendResult<bool> {
        let store = self.store(bucket)?;
        let path = object_path(bucket, key)?;

        match store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(BackendError::from_object_store(e, bucket, key)),
        }
    }

    #[tracing::instrument(skip(self), fields(otel.kind = "client", backend = "object_store"))]
    async fn delete(&self, bucket: &str, key: &str) -> BackendResult<()> {
        let store = self.store(bucket)?;
        let path = object_path(bucket, key)?;

        match store.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(BackendError::from_object_store(e, bucket, key)),
        }
    }

    fn backend_name(&self) -> &str {
        match self.provider {
            StoreProvider::Gcs => "gcs",
            StoreProvider::Local { .. } => "local",
            StoreProvider::Memory => "memory",
        }
    }
}

/// Multipart upload; the object is only created by `complete()`
struct MultipartSession {
    upload: Box<dyn MultipartUpload>,
    bucket: String,
    key: String,
    parts: usize,
}

#[async_trait]
impl WriteSession for MultipartSession {
    async fn write_part(&mut self, part: Bytes) -> BackendResult<()> {
        self.upload
            .put_part(PutPayload::from(part))
            .await
            .map_err(|e| BackendError::from_object_store(e, &self.bucket, &self.key))?;
        self.parts += 1;
        Ok(())
    }

    async fn commit(&mut self) -> BackendResult<()> {
        self.upload
            .complete()
            .await
            .map_err(|e| BackendError::from_object_store(e, &self.bucket, &self.key))?;
        tracing::debug!(bucket = %self.bucket, key = %self.key, parts = self.parts, "Completed multipart upload");
        Ok(())
    }

    async fn abort(&mut self) -> BackendResult<()> {
        self.upload
            .abort()
            .await
            .map_err(|e| BackendError::from_object_store(e, &self.bucket, &self.key))
    }
}
