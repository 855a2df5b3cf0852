/*!
 * Object fetching with retry, per-attempt timeouts and resume-at-offset
 *
 * [`ObjectFetcher::open`] retries transient failures while opening an object.
 * The returned [`ObjectReader`] keeps track of how many bytes it has handed
 * out; when the connection drops mid-stream it reopens the object at that
 * offset, so callers see every byte exactly once.
 */

use crate::backend::{BackendError, ObjectClient, ReadStream};
use crate::core::retry::{with_retry, RetryError, RetryPolicy};
use crate::error::FetchError;
use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Opens read streams for source objects
///
/// Cloning is cheap; all clones share the client and cancellation token.
#[derive(Clone)]
pub struct ObjectFetcher {
    client: Arc<dyn ObjectClient>,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl ObjectFetcher {
    /// Create a fetcher with its own cancellation token
    pub fn new(client: Arc<dyn ObjectClient>, policy: RetryPolicy) -> Self {
        Self {
            client,
            policy,
            cancel: CancellationToken::new(),
        }
    }

    /// Builder pattern: stop retries and reads when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Retry policy applied to every open and resume
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Open `bucket/key` for reading from the first byte
    pub async fn open(&self, bucket: &str, key: &str) -> Result<ObjectReader, FetchError> {
        let stream = self.open_stream(bucket, key, 0).await?;
        tracing::debug!(bucket, key, "Opened object");
        Ok(ObjectReader {
            fetcher: self.clone(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            offset: 0,
            resumes: 0,
            stream,
        })
    }

    /// Read a whole object into memory (small objects such as manifests)
    pub async fn read_to_end(&self, bucket: &str, key: &str) -> Result<Vec<u8>, FetchError> {
        let mut reader = self.open(bucket, key).await?;
        let mut data = Vec::new();
        while let Some(chunk) = reader.next_chunk().await? {
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }

    async fn open_stream(
        &self,
        bucket: &str,
        key: &str,
        offset: u64,
    ) -> Result<ReadStream, FetchError> {
        with_retry(&self.policy, &self.cancel, || {
            self.client.open_read(bucket, key, offset)
        })
        .await
        .map_err(|e| fetch_error(bucket, key, e))
    }
}

fn fetch_error(bucket: &str, key: &str, err: RetryError) -> FetchError {
    match err {
        RetryError::Permanent { attempts, source } | RetryError::Exhausted { attempts, source } => {
            FetchError::Permanent {
                bucket: bucket.to_string(),
                key: key.to_string(),
                attempts,
                source,
            }
        }
        RetryError::Cancelled => FetchError::Cancelled {
            bucket: bucket.to_string(),
            key: key.to_string(),
        },
    }
}

/// Read-once byte stream of one object
pub struct ObjectReader {
    fetcher: ObjectFetcher,
    bucket: String,
    key: String,
    offset: u64,
    resumes: u32,
    stream: ReadStream,
}

impl ObjectReader {
    /// Key of the object being read
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Bytes handed out so far
    pub fn bytes_read(&self) -> u64 {
        self.offset
    }

    /// Next chunk of the object, or `None` at end of object
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, FetchError> {
        let policy = self.fetcher.policy.clone();
        loop {
            let next = tokio::select! {
                biased;
                _ = self.fetcher.cancel.cancelled() => {
                    return Err(FetchError::Cancelled {
                        bucket: self.bucket.clone(),
                        key: self.key.clone(),
                    });
                }
                next = timeout(policy.attempt_timeout, self.stream.next()) => next,
            };

            let error = match next {
                Ok(None) => return Ok(None),
                Ok(Some(Ok(chunk))) => {
                    self.offset += chunk.len() as u64;
                    return Ok(Some(chunk));
                }
                Ok(Some(Err(e))) => e,
                Err(_) => BackendError::Timeout {
                    operation: format!("read {}/{}", self.bucket, self.key),
                    duration_ms: policy.attempt_timeout.as_millis() as u64,
                },
            };

            self.resumes += 1;
            if !error.is_retriable() || self.resumes >= policy.max_attempts.max(1) {
                return Err(FetchError::Permanent {
                    bucket: self.bucket.clone(),
                    key: self.key.clone(),
                    attempts: self.resumes,
                    source: error,
                });
            }

            tracing::warn!(
                bucket = %self.bucket,
                key = %self.key,
                offset = self.offset,
                error = %error,
                "Read interrupted, resuming"
            );
            self.stream = self
                .fetcher
                .open_stream(&self.bucket, &self.key, self.offset)
                .await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryClient;
    use crate::core::retry::BackoffStrategy;
    use std::time::Duration;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff: BackoffStrategy::Exponential,
            jitter_factor: 0.0,
            attempt_timeout: Duration::from_secs(5),
        }
    }

    fn fetcher(client: &MemoryClient) -> ObjectFetcher {
        ObjectFetcher::new(Arc::new(client.clone()), policy())
    }

    #[tokio::test]
    async fn test_transient_open_failures_are_retried() {
        let client = MemoryClient::new();
        client.insert("b", "k", b"payload");
        client.fail_reads("k", 3);

        let data = fetcher(&client).read_to_end("b", "k").await.unwrap();
        assert_eq!(data, b"payload");
        assert_eq!(client.read_count("k"), 4);
    }

    #[tokio::test]
    async fn test_retries_exhausted_become_permanent() {
        let client = MemoryClient::new();
        client.insert("b", "k", b"payload");
        client.fail_reads("k", 10);

        let err = fetcher(&client).open("b", "k").await.err().unwrap();
        assert!(matches!(err, FetchError::Permanent { attempts: 5, .. }));
    }

    #[tokio::test]
    async fn test_missing_object_fails_immediately() {
        let client = MemoryClient::new();

        let err = fetcher(&client).open("b", "missing").await.err().unwrap();
        assert!(err.is_not_found());
        assert_eq!(client.read_count("missing"), 1);
    }

    #[tokio::test]
    async fn test_resume_after_mid_stream_failure() {
        let client = MemoryClient::new();
        client.set_chunk_size(4);
        let data: Vec<u8> = (0..=255u8).collect();
        client.insert("b", "k", &data);
        client.fail_stream_after("k", 100);

        let mut reader = fetcher(&client).open("b", "k").await.unwrap();
        let mut out = Vec::new();
        while let Some(chunk) = reader.next_chunk().await.unwrap() {
            out.extend_from_slice(&chunk);
        }

        assert_eq!(out, data);
        assert_eq!(reader.bytes_read(), 256);
        assert_eq!(client.read_count("k"), 2);
    }

    #[tokio::test]
    async fn test_cancelled_reader() {
        let client = MemoryClient::new();
        client.insert("b", "k", b"payload");
        let cancel = CancellationToken::new();
        let fetcher = fetcher(&client).with_cancellation(cancel.clone());

        let mut reader = fetcher.open("b", "k").await.unwrap();
        cancel.cancel();
        assert!(matches!(
            reader.next_chunk().await,
            Err(FetchError::Cancelled { .. })
        ));
    }
}
