/*!
 * bucket-zip - archive object prefixes and verify stored digests
 *
 * A streaming toolkit for object stores with:
 * - ZIP assembly of every object under a prefix into one archive object
 * - Bounded parallel fetching with ordered, single-writer output
 * - Retry with exponential backoff and resume-at-offset for interrupted reads
 * - Commit-on-success uploads: a failed run never leaves a partial archive
 * - MD5 / SHA-256 verification against a JSON digest manifest
 *
 * # Example
 *
 * ```no_run
 * use bucket_zip::{ArchiveRequest, Assembler, MemoryClient, Verifier, ZipConfig};
 * use std::sync::Arc;
 *
 * #[tokio::main]
 * async fn main() -> Result<(), Box<dyn std::error::Error>> {
 *     let client = Arc::new(MemoryClient::new());
 *     client.insert("bucket", "zipfodder/hello.txt", b"Hello World");
 *
 *     let config = ZipConfig::default();
 *     let request = ArchiveRequest::new("bucket", "zipfodder", "bucket", "zipped/zip.zip");
 *     let report = Assembler::new(client.clone(), config.clone()).assemble(&request).await?;
 *     println!("{} entries, {} bytes", report.entries.len(), report.archive_size);
 *     client.insert("bucket", "zipfodder/md5.json", report.manifest().to_json()?);
 *
 *     let result = Verifier::new(client, &config)
 *         .verify("bucket", "zipfodder/md5.json")
 *         .await?;
 *     assert!(result.all_match());
 *     Ok(())
 * }
 * ```
 */

pub mod archive;
pub mod assemble;
pub mod backend;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod verify;

// Re-export commonly used types
pub use assemble::{AssembleReport, Assembler, EntrySummary};
pub use backend::{MemoryClient, ObjectClient, ObjectStoreClient, StoreProvider};
pub use config::{ArchiveRequest, CompressionType, LogLevel, ZipConfig};
pub use core::checksum::DigestAlgorithm;
pub use core::manifest::Manifest;
pub use error::{BucketZipError, Result};
pub use verify::{EntryVerification, VerificationResult, Verifier};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
