/*!
 * Core building blocks shared by assembly and verification
 */

pub mod checksum;
pub mod fetch;
pub mod lister;
pub mod manifest;
pub mod retry;

pub use checksum::{DigestAlgorithm, StreamingHasher};
pub use fetch::{ObjectFetcher, ObjectReader};
pub use lister::list_objects;
pub use manifest::{read_manifest, Manifest};
pub use retry::{RetryPolicy, BackoffStrategy};
