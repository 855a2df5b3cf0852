/*!
 * Configuration types for bucket-zip
 */

use crate::backend::StoreProvider;
use crate::core::checksum::DigestAlgorithm;
use crate::core::retry::{BackoffStrategy, RetryPolicy};
use crate::error::{AssembleError, BucketZipError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Smallest part most multipart stores accept (except the last part)
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Main configuration for assembly and verification runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZipConfig {
    /// Which storage service bucket names resolve to
    #[serde(default)]
    pub store: StoreProvider,

    /// Maximum number of objects fetched concurrently
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Attempts per fetch before a transient failure becomes permanent
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Delay before the first retry in milliseconds (doubles per attempt)
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Upper bound for a single retry delay in milliseconds
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,

    /// Randomize retry delays by up to this fraction (0.0 disables jitter)
    #[serde(default = "default_retry_jitter")]
    pub retry_jitter: f64,

    /// Timeout for one fetch attempt (open or next chunk) in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Timeout for flushing one upload part in seconds
    #[serde(default = "default_flush_timeout")]
    pub flush_timeout_secs: u64,

    /// Upload part size in bytes
    #[serde(default = "default_part_size")]
    pub part_size: usize,

    /// Entry compression
    #[serde(default)]
    pub compression: CompressionType,

    /// Digest algorithm used by manifests
    #[serde(default)]
    pub digest: DigestAlgorithm,

    /// Manifest file name; never archived
    #[serde(default = "default_manifest_name")]
    pub manifest_name: String,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,
}

impl Default for ZipConfig {
    fn default() -> Self {
        Self {
            store: StoreProvider::default(),
            concurrency: default_concurrency(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
            retry_jitter: default_retry_jitter(),
            fetch_timeout_secs: default_fetch_timeout(),
            flush_timeout_secs: default_flush_timeout(),
            part_size: default_part_size(),
            compression: CompressionType::Store,
            digest: DigestAlgorithm::Md5,
            manifest_name: default_manifest_name(),
            log_level: LogLevel::Info,
            log_file: None,
            verbose: false,
        }
    }
}

/// Compression applied to archive entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    /// Stored, no compression
    #[default]
    Store,

    /// Raw deflate with level (0-9)
    Deflate { level: u32 },
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_concurrency() -> usize {
    4
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_base_delay() -> u64 {
    200
}

fn default_retry_max_delay() -> u64 {
    10_000
}

fn default_retry_jitter() -> f64 {
    0.2
}

fn default_fetch_timeout() -> u64 {
    60
}

fn default_flush_timeout() -> u64 {
    120
}

fn default_part_size() -> usize {
    8 * 1024 * 1024 // 8 MiB
}

fn default_manifest_name() -> String {
    "md5.json".to_string()
}

impl ZipConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, BucketZipError> {
        let contents = std::fs::read_to_string(path)?;
        let config: ZipConfig = toml::from_str(&contents)
            .map_err(|e| BucketZipError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no run can work with
    pub fn validate(&self) -> Result<(), BucketZipError> {
        if self.concurrency == 0 {
            return Err(BucketZipError::Config(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.retry_attempts == 0 {
            return Err(BucketZipError::Config(
                "retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.fetch_timeout_secs == 0 || self.flush_timeout_secs == 0 {
            return Err(BucketZipError::Config(
                "timeouts must be at least one second".to_string(),
            ));
        }
        if self.part_size < MIN_PART_SIZE {
            return Err(BucketZipError::Config(format!(
                "part_size must be at least {} bytes",
                MIN_PART_SIZE
            )));
        }
        if !(0.0..=1.0).contains(&self.retry_jitter) {
            return Err(BucketZipError::Config(
                "retry_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }
        if let CompressionType::Deflate { level } = self.compression {
            if level > 9 {
                return Err(BucketZipError::Config(
                    "deflate level must be between 0 and 9".to_string(),
                ));
            }
        }
        if self.manifest_name.is_empty() || self.manifest_name.contains('/') {
            return Err(BucketZipError::Config(
                "manifest_name must be a plain file name".to_string(),
            ));
        }
        Ok(())
    }

    /// Retry policy shared by every fetch of a run
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            initial_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            backoff: if self.retry_jitter > 0.0 {
                BackoffStrategy::ExponentialWithJitter
            } else {
                BackoffStrategy::Exponential
            },
            jitter_factor: self.retry_jitter,
            attempt_timeout: Duration::from_secs(self.fetch_timeout_secs),
        }
    }

    /// Timeout for one upload part flush
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_secs(self.flush_timeout_secs)
    }
}

/// One assembly: every object under `from_bucket/from_path` into `to_bucket/to_path`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRequest {
    pub from_bucket: String,
    pub from_path: String,
    pub to_bucket: String,
    pub to_path: String,

    /// Name entries relative to `from_path` instead of by full key
    #[serde(default)]
    pub strip_prefix: bool,

    /// Also write the archive to this local file
    #[serde(default)]
    pub keep: Option<PathBuf>,

    /// Produce an archive with no entries when nothing matches the prefix
    #[serde(default = "default_allow_empty")]
    pub allow_empty: bool,
}

fn default_allow_empty() -> bool {
    true
}

impl ArchiveRequest {
    pub fn new(
        from_bucket: impl Into<String>,
        from_path: impl Into<String>,
        to_bucket: impl Into<String>,
        to_path: impl Into<String>,
    ) -> Self {
        Self {
            from_bucket: from_bucket.into(),
            from_path: from_path.into(),
            to_bucket: to_bucket.into(),
            to_path: to_path.into(),
            strip_prefix: false,
            keep: None,
            allow_empty: true,
        }
    }

    /// Builder pattern: name entries relative to the source prefix
    pub fn with_strip_prefix(mut self, strip: bool) -> Self {
        self.strip_prefix = strip;
        self
    }

    /// Builder pattern: keep a local copy of the archive
    pub fn with_keep(mut self, path: impl Into<PathBuf>) -> Self {
        self.keep = Some(path.into());
        self
    }

    /// Builder pattern: fail instead of writing an archive with no entries
    pub fn with_allow_empty(mut self, allow: bool) -> Self {
        self.allow_empty = allow;
        self
    }

    /// Reject missing or self-referencing fields before any I/O
    pub fn validate(&self) -> Result<(), AssembleError> {
        for (field, value) in [
            ("from_bucket", &self.from_bucket),
            ("to_bucket", &self.to_bucket),
            ("to_path", &self.to_path),
        ] {
            if value.trim().is_empty() {
                return Err(AssembleError::InvalidRequest(format!("{} is required", field)));
            }
        }
        if self.from_path.trim().trim_matches('/').is_empty() {
            return Err(AssembleError::InvalidRequest(format!(
                "from_path is required, got {:?}",
                self.from_path
            )));
        }
        if self.to_path.ends_with('/') {
            return Err(AssembleError::InvalidRequest(format!(
                "to_path must name an object, got {:?}",
                self.to_path
            )));
        }
        if self.from_bucket == self.to_bucket && self.to_path.starts_with(&self.source_prefix()) {
            return Err(AssembleError::InvalidRequest(format!(
                "to_path {:?} lies under the source prefix {:?}",
                self.to_path,
                self.source_prefix()
            )));
        }
        Ok(())
    }

    /// Listing prefix for the source objects: `from_path` as a directory
    pub fn source_prefix(&self) -> String {
        let path = self.from_path.trim_matches('/');
        if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path)
        }
    }
}
