/*!
 * Archive assembly pipeline
 *
 * Lists the source prefix, fetches up to `concurrency` objects ahead of the
 * writer, and feeds them to a single [`ArchiveWriter`] in listing order. The
 * archive goes to an [`UploadSink`] that only commits once the central
 * directory has been written; any failure cancels outstanding fetches and
 * aborts the upload.
 */

use crate::archive::{ArchiveState, ArchiveWriter, SinkOptions, UploadSink};
use crate::backend::{ObjectClient, ObjectKey};
use crate::config::{ArchiveRequest, ZipConfig};
use crate::core::checksum::{DigestAlgorithm, StreamingHasher};
use crate::core::fetch::{ObjectFetcher, ObjectReader};
use crate::core::lister::list_objects;
use crate::core::manifest::Manifest;
use crate::error::{AssembleError, FetchError};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One archived object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrySummary {
    /// Source object key
    pub key: ObjectKey,
    /// Entry name inside the archive
    pub name: String,
    /// Uncompressed size in bytes
    pub size: u64,
    pub crc32: u32,
    /// Hex digest of the entry bytes, computed while archiving
    pub digest: String,
}

/// Outcome of a committed assembly
#[derive(Debug, Clone, Serialize)]
pub struct AssembleReport {
    pub to_bucket: String,
    pub to_path: String,
    pub entries: Vec<EntrySummary>,
    pub archive_size: u64,
    pub digest_algorithm: DigestAlgorithm,
}

impl AssembleReport {
    /// Digest manifest of the archived objects
    ///
    /// Keyed by file name; objects in different sub-directories that share a
    /// name keep the digest of the last one in key order.
    pub fn manifest(&self) -> Manifest {
        let mut manifest = Manifest::new();
        for entry in &self.entries {
            manifest.insert(&entry.key, &entry.digest);
        }
        manifest
    }
}

/// Builds ZIP archives from object prefixes
pub struct Assembler {
    client: Arc<dyn ObjectClient>,
    config: ZipConfig,
}

impl Assembler {
    pub fn new(client: Arc<dyn ObjectClient>, config: ZipConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &ZipConfig {
        &self.config
    }

    /// Assemble `request` into a single archive object
    pub async fn assemble(&self, request: &ArchiveRequest) -> Result<AssembleReport, AssembleError> {
        self.assemble_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Like [`Assembler::assemble`], stopping early when `cancel` fires
    ///
    /// On any error the destination is left absent, or unchanged if it
    /// already existed.
    #[tracing::instrument(
        skip(self, request, cancel),
        fields(
            from = %format!("{}/{}", request.from_bucket, request.from_path),
            to = %format!("{}/{}", request.to_bucket, request.to_path),
        )
    )]
    pub async fn assemble_with_cancel(
        &self,
        request: &ArchiveRequest,
        cancel: CancellationToken,
    ) -> Result<AssembleReport, AssembleError> {
        request.validate()?;
        if cancel.is_cancelled() {
            return Err(AssembleError::Cancelled);
        }

        let start = Instant::now();
        let prefix = request.source_prefix();
        let manifest_key = format!("{}{}", prefix, self.config.manifest_name);
        let keys = list_objects(
            self.client.as_ref(),
            &request.from_bucket,
            &prefix,
            &[manifest_key],
        )
        .await?;

        if keys.is_empty() {
            if !request.allow_empty {
                return Err(AssembleError::EmptySource {
                    bucket: request.from_bucket.clone(),
                    prefix,
                });
            }
            tracing::warn!(prefix = %prefix, "No objects under prefix; writing an empty archive");
        }

        let sink = UploadSink::open(
            self.client.as_ref(),
            &request.to_bucket,
            &request.to_path,
            SinkOptions {
                part_size: self.config.part_size,
                flush_timeout: self.config.flush_timeout(),
                keep: request.keep.clone(),
            },
        )
        .await?;
        let mut writer = ArchiveWriter::new(sink, self.config.compression);

        // Child token: a failure here must not cancel the caller's token
        let run_cancel = cancel.child_token();
        let outcome = self
            .write_archive(&mut writer, request, &prefix, &keys, &run_cancel)
            .await;

        let entries = match outcome {
            Ok(entries) => entries,
            Err(e) => {
                run_cancel.cancel();
                writer.fail();
                writer.into_output().abort().await;
                tracing::error!(error = %e, "Assembly failed, upload aborted");
                return Err(e);
            }
        };

        // finish() succeeded, so the central directory is complete
        debug_assert_eq!(writer.state(), ArchiveState::Closed);
        let archive_size = writer.into_output().commit().await?;

        tracing::info!(
            entries = entries.len(),
            bytes = archive_size,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Assembly complete"
        );

        Ok(AssembleReport {
            to_bucket: request.to_bucket.clone(),
            to_path: request.to_path.clone(),
            entries,
            archive_size,
            digest_algorithm: self.config.digest,
        })
    }

    async fn write_archive(
        &self,
        writer: &mut ArchiveWriter<UploadSink>,
        request: &ArchiveRequest,
        prefix: &str,
        keys: &[ObjectKey],
        cancel: &CancellationToken,
    ) -> Result<Vec<EntrySummary>, AssembleError> {
        writer.open()?;

        let fetcher = ObjectFetcher::new(self.client.clone(), self.config.retry_policy())
            .with_cancellation(cancel.clone());
        let mut readers = Prefetch::new(
            fetcher,
            &request.from_bucket,
            keys,
            self.config.concurrency,
        );

        let mut entries = Vec::with_capacity(keys.len());
        while let Some((key, opened)) = readers.next().await {
            let mut reader = opened?;
            let name = entry_name(&key, prefix, request.strip_prefix);

            writer.start_entry(&name).await?;
            let mut hasher = StreamingHasher::new(self.config.digest);
            while let Some(chunk) = reader.next_chunk().await.map_err(fetch_failed)? {
                hasher.update(&chunk);
                writer.write_data(&chunk).await?;
            }
            let entry = writer.finish_entry().await?;

            tracing::debug!(key = %key, name = %name, size = entry.uncompressed_size, "Archived object");
            entries.push(EntrySummary {
                key,
                name,
                size: entry.uncompressed_size,
                crc32: entry.crc32,
                digest: hasher.finalize_hex(),
            });
        }

        writer.finish().await?;
        Ok(entries)
    }
}

/// Object opens running ahead of the writer
///
/// Each open runs on its own task, so it progresses while the writer drains
/// an earlier object. Readers are handed out in key order; the object being
/// written counts towards `depth`. Dropping the window aborts every open
/// still outstanding.
struct Prefetch {
    fetcher: ObjectFetcher,
    bucket: String,
    pending: std::vec::IntoIter<ObjectKey>,
    window: VecDeque<(ObjectKey, JoinHandle<Result<ObjectReader, FetchError>>)>,
    depth: usize,
}

impl Prefetch {
    fn new(fetcher: ObjectFetcher, bucket: &str, keys: &[ObjectKey], depth: usize) -> Self {
        Self {
            fetcher,
            bucket: bucket.to_string(),
            pending: keys.to_vec().into_iter(),
            window: VecDeque::new(),
            depth: depth.max(1),
        }
    }

    fn fill(&mut self) {
        while self.window.len() < self.depth {
            let Some(key) = self.pending.next() else {
                break;
            };
            let fetcher = self.fetcher.clone();
            let bucket = self.bucket.clone();
            let task_key = key.clone();
            let handle = tokio::spawn(async move { fetcher.open(&bucket, &task_key).await });
            self.window.push_back((key, handle));
        }
    }

    /// Next reader in key order, once its open has finished
    async fn next(&mut self) -> Option<(ObjectKey, Result<ObjectReader, AssembleError>)> {
        self.fill();
        let (key, handle) = self.window.pop_front()?;
        let opened = match handle.await {
            Ok(result) => result.map_err(fetch_failed),
            Err(e) => Err(AssembleError::Task(format!("open of {}: {}", key, e))),
        };
        Some((key, opened))
    }
}

impl Drop for Prefetch {
    fn drop(&mut self) {
        for (_, handle) in &self.window {
            handle.abort();
        }
    }
}

/// Archive entry name for a source key
fn entry_name(key: &str, prefix: &str, strip_prefix: bool) -> String {
    if strip_prefix {
        key.strip_prefix(prefix).unwrap_or(key).to_string()
    } else {
        key.to_string()
    }
}

fn fetch_failed(err: FetchError) -> AssembleError {
    match err {
        FetchError::Cancelled { .. } => AssembleError::Cancelled,
        other => AssembleError::Fetch(other),
    }
}
