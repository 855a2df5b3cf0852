/*!
 * Upload sink: archive bytes into a staged object write
 *
 * Bytes are buffered into parts of `part_size` and flushed to a
 * [`WriteSession`]. The destination object only appears when [`UploadSink::commit`]
 * succeeds; [`UploadSink::abort`] discards the session so a failed run leaves
 * the destination absent, or unchanged if it already existed.
 */

use super::writer::ArchiveOutput;
use crate::backend::{ObjectClient, WriteSession};
use crate::config::MIN_PART_SIZE;
use crate::error::SinkError;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;

/// Upload tuning
#[derive(Debug, Clone)]
pub struct SinkOptions {
    /// Bytes per uploaded part (the last part may be smaller)
    pub part_size: usize,

    /// Timeout for one part upload or the final commit
    pub flush_timeout: Duration,

    /// Local file receiving a copy of every byte
    pub keep: Option<PathBuf>,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            part_size: 8 * 1024 * 1024,
            flush_timeout: Duration::from_secs(120),
            keep: None,
        }
    }
}

/// Writes archive bytes to one destination object
pub struct UploadSink {
    session: Box<dyn WriteSession>,
    bucket: String,
    key: String,
    options: SinkOptions,
    buffer: BytesMut,
    keep: Option<File>,
    bytes_written: u64,
    parts: usize,
}

impl UploadSink {
    /// Start a staged write to `bucket/key`
    pub async fn open(
        client: &dyn ObjectClient,
        bucket: &str,
        key: &str,
        options: SinkOptions,
    ) -> Result<Self, SinkError> {
        let mut session = client
            .open_write(bucket, key)
            .await
            .map_err(|source| SinkError::Write {
                bucket: bucket.to_string(),
                key: key.to_string(),
                source,
            })?;

        let keep = match &options.keep {
            Some(path) => match File::create(path).await {
                Ok(file) => Some(file),
                Err(e) => {
                    let _ = session.abort().await;
                    return Err(SinkError::Keep(e));
                }
            },
            None => None,
        };

        if options.part_size < MIN_PART_SIZE {
            tracing::debug!(
                part_size = options.part_size,
                "Part size below the multipart minimum; only single-part uploads will succeed"
            );
        }

        Ok(Self {
            session,
            bucket: bucket.to_string(),
            key: key.to_string(),
            buffer: BytesMut::with_capacity(options.part_size),
            options,
            keep,
            bytes_written: 0,
            parts: 0,
        })
    }

    /// Total bytes accepted so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Parts uploaded so far
    pub fn parts(&self) -> usize {
        self.parts
    }

    /// Flush the remaining bytes and make the object visible
    ///
    /// On failure the upload is aborted and the local copy removed, exactly
    /// as [`UploadSink::abort`] does.
    pub async fn commit(mut self) -> Result<u64, SinkError> {
        if let Err(e) = self.complete().await {
            self.abort().await;
            return Err(e);
        }

        tracing::info!(
            bucket = %self.bucket,
            key = %self.key,
            bytes = self.bytes_written,
            parts = self.parts,
            "Committed archive"
        );
        Ok(self.bytes_written)
    }

    /// Discard the upload and the local copy; best effort
    pub async fn abort(mut self) {
        if let Some(mut file) = self.keep.take() {
            let _ = file.flush().await;
        }
        if let Some(path) = &self.options.keep {
            if let Err(e) = tokio::fs::remove_file(path).await {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove local copy");
            }
        }
        if let Err(e) = self.session.abort().await {
            tracing::warn!(bucket = %self.bucket, key = %self.key, error = %e, "Failed to abort upload");
        } else {
            tracing::debug!(bucket = %self.bucket, key = %self.key, "Aborted upload");
        }
    }

    async fn complete(&mut self) -> Result<(), SinkError> {
        if !self.buffer.is_empty() {
            let part = self.buffer.split().freeze();
            self.flush_part(part).await?;
        }
        if let Some(file) = self.keep.as_mut() {
            file.flush().await?;
            file.sync_all().await?;
        }

        match timeout(self.options.flush_timeout, self.session.commit()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(SinkError::Write {
                bucket: self.bucket.clone(),
                key: self.key.clone(),
                source,
            }),
            Err(_) => Err(self.timed_out()),
        }
    }

    async fn flush_part(&mut self, part: Bytes) -> Result<(), SinkError> {
        let len = part.len();
        match timeout(self.options.flush_timeout, self.session.write_part(part)).await {
            Ok(Ok(())) => {
                self.parts += 1;
                tracing::trace!(key = %self.key, part = self.parts, bytes = len, "Uploaded part");
                Ok(())
            }
            Ok(Err(source)) => Err(SinkError::Write {
                bucket: self.bucket.clone(),
                key: self.key.clone(),
                source,
            }),
            Err(_) => Err(self.timed_out()),
        }
    }

    fn timed_out(&self) -> SinkError {
        SinkError::Timeout {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            timeout_ms: self.options.flush_timeout.as_millis() as u64,
        }
    }
}

#[async_trait]
impl ArchiveOutput for UploadSink {
    async fn write_all(&mut self, data: &[u8]) -> Result<(), SinkError> {
        if let Some(file) = self.keep.as_mut() {
            file.write_all(data).await?;
        }
        self.buffer.extend_from_slice(data);
        self.bytes_written += data.len() as u64;

        let part_size = self.options.part_size.max(1);
        while self.buffer.len() >= part_size {
            let part = self.buffer.split_to(part_size).freeze();
            self.flush_part(part).await?;
        }
        Ok(())
    }
}
