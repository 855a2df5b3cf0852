//! ZIP archive production
//!
//! - [`format`]: byte layout of the ZIP records
//! - [`writer`]: the streaming builder and its state machine
//! - [`sink`]: staged upload of the produced bytes

pub mod format;
pub mod sink;
pub mod writer;

pub use format::{ArchiveEntry, CompressionMethod};
pub use sink::{SinkOptions, UploadSink};
pub use writer::{ArchiveOutput, ArchiveState, ArchiveSummary, ArchiveWriter};
