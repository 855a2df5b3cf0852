/*!
 * Digest manifests
 *
 * A manifest is one flat JSON object mapping base file names to lowercase
 * hex digests:
 *
 * ```json
 * {"code.js": "a1b2...", "hello.txt": "b10a..."}
 * ```
 *
 * Keys are normalized to the text after the last `/` so manifests written
 * with full object keys still resolve against the manifest's directory.
 */

use crate::core::fetch::ObjectFetcher;
use crate::error::ManifestError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Base filename to hex digest, iterated in ascending filename order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: BTreeMap<String, String>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an entry, normalizing the name and digest
    pub fn insert(&mut self, name: &str, digest: &str) {
        self.entries
            .insert(base_name(name).to_string(), digest.to_ascii_lowercase());
    }

    /// Expected digest for a base filename
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending filename order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parse a flat JSON object of strings
    ///
    /// Keys that reduce to the same file name are rejected.
    pub fn from_json(data: &[u8]) -> Result<Self, serde_json::Error> {
        let raw: BTreeMap<String, String> = serde_json::from_slice(data)?;
        let mut manifest = Manifest::new();
        for (name, digest) in &raw {
            let file_name = base_name(name);
            if file_name.is_empty() {
                return Err(<serde_json::Error as serde::de::Error>::custom(format!(
                    "manifest key {:?} has no file name",
                    name
                )));
            }
            if manifest.get(file_name).is_some() {
                return Err(<serde_json::Error as serde::de::Error>::custom(format!(
                    "manifest key {:?} repeats file name {:?}",
                    name, file_name
                )));
            }
            manifest.insert(name, digest);
        }
        Ok(manifest)
    }

    /// Serialize as pretty-printed JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Text after the last `/` of a key
pub fn base_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Directory part of a key including the trailing `/`, or `""` at the root
pub fn parent_dir(key: &str) -> &str {
    match key.rfind('/') {
        Some(idx) => &key[..=idx],
        None => "",
    }
}

/// Fetch and parse the manifest at `bucket/key`
pub async fn read_manifest(
    fetcher: &ObjectFetcher,
    bucket: &str,
    key: &str,
) -> Result<Manifest, ManifestError> {
    let data = match fetcher.read_to_end(bucket, key).await {
        Ok(data) => data,
        Err(e) if e.is_not_found() => {
            return Err(ManifestError::Missing {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
        }
        Err(e) => return Err(e.into()),
    };

    let manifest = Manifest::from_json(&data).map_err(|source| ManifestError::Parse {
        bucket: bucket.to_string(),
        key: key.to_string(),
        source,
    })?;

    tracing::debug!(bucket, key, entries = manifest.len(), "Loaded manifest");
    Ok(manifest)
}
