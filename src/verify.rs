/*!
 * Digest verification against a manifest
 *
 * The manifest at `<dir>/<manifest>` lists base filenames; each is resolved
 * to `<dir>/<filename>` in the same bucket, streamed through the digest
 * accumulator and compared with the expected value. Entries are independent:
 * a missing or unreadable object is reported as a mismatch and never stops
 * the others.
 */

use crate::backend::ObjectClient;
use crate::config::ZipConfig;
use crate::core::checksum::{DigestAlgorithm, StreamingHasher};
use crate::core::fetch::ObjectFetcher;
use crate::core::manifest::{parent_dir, read_manifest};
use crate::error::{FetchError, VerifyError};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;

/// Outcome for one manifest entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryVerification {
    pub filename: String,
    pub expected: String,
    /// Digest of the stored object; `None` if it could not be read
    pub actual: Option<String>,
    pub matches: bool,
}

/// Per-entry results in ascending filename order
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerificationResult {
    pub entries: Vec<EntryVerification>,
}

impl VerificationResult {
    /// True when every entry matched (vacuously true for an empty manifest)
    pub fn all_match(&self) -> bool {
        self.entries.iter().all(|e| e.matches)
    }

    /// Entries that did not match
    pub fn mismatches(&self) -> impl Iterator<Item = &EntryVerification> {
        self.entries.iter().filter(|e| !e.matches)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Checks stored objects against their manifest
pub struct Verifier {
    fetcher: ObjectFetcher,
    digest: DigestAlgorithm,
    concurrency: usize,
}

impl Verifier {
    pub fn new(client: Arc<dyn ObjectClient>, config: &ZipConfig) -> Self {
        Self {
            fetcher: ObjectFetcher::new(client, config.retry_policy()),
            digest: config.digest,
            concurrency: config.concurrency.max(1),
        }
    }

    /// Verify every entry of the manifest at `bucket/manifest_key`
    #[tracing::instrument(skip(self), fields(digest = %self.digest))]
    pub async fn verify(
        &self,
        bucket: &str,
        manifest_key: &str,
    ) -> Result<VerificationResult, VerifyError> {
        if manifest_key.is_empty() || manifest_key.ends_with('/') {
            return Err(VerifyError::InvalidKey(manifest_key.to_string()));
        }

        let manifest = read_manifest(&self.fetcher, bucket, manifest_key).await?;
        let dir = parent_dir(manifest_key);

        let entries: Vec<EntryVerification> = stream::iter(manifest.iter())
            .map(|(filename, expected)| async move {
                let key = format!("{}{}", dir, filename);
                let actual = match self.digest_of(bucket, &key).await {
                    Ok(digest) => Some(digest),
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Could not read object for verification");
                        None
                    }
                };
                let matches = actual.as_deref() == Some(expected);
                if !matches {
                    tracing::debug!(filename, expected, actual = ?actual, "Digest mismatch");
                }
                EntryVerification {
                    filename: filename.to_string(),
                    expected: expected.to_string(),
                    actual,
                    matches,
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let result = VerificationResult { entries };
        tracing::info!(
            entries = result.len(),
            mismatches = result.mismatches().count(),
            "Verification complete"
        );
        Ok(result)
    }

    async fn digest_of(&self, bucket: &str, key: &str) -> Result<String, FetchError> {
        let mut reader = self.fetcher.open(bucket, key).await?;
        let mut hasher = StreamingHasher::new(self.digest);
        while let Some(chunk) = reader.next_chunk().await? {
            hasher.update(&chunk);
        }
        Ok(hasher.finalize_hex())
    }
}
