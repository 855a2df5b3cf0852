/*!
 * Streaming ZIP builder
 *
 * [`ArchiveWriter`] turns an ordered sequence of entries into ZIP bytes
 * without seeking: each entry is a local header, its payload, and a data
 * descriptor; the central directory and end record follow the last entry.
 *
 * State machine:
 *
 * ```text
 * Idle -> Open -> (WritingEntry -> Open)* -> Finalizing -> Closed
 *           \___________ any failure __________/-> Failed
 * ```
 */

use super::format::{self, ArchiveEntry, CompressionMethod};
use crate::config::CompressionType;
use crate::error::{ArchiveError, SinkError};
use async_trait::async_trait;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::collections::HashSet;
use std::io::Write;

/// Destination for the bytes produced by an [`ArchiveWriter`]
#[async_trait]
pub trait ArchiveOutput: Send {
    /// Accept the next bytes of the archive, in order
    async fn write_all(&mut self, data: &[u8]) -> Result<(), SinkError>;
}

#[async_trait]
impl ArchiveOutput for Vec<u8> {
    async fn write_all(&mut self, data: &[u8]) -> Result<(), SinkError> {
        self.extend_from_slice(data);
        Ok(())
    }
}

/// Lifecycle of one archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveState {
    Idle,
    Open,
    WritingEntry,
    Finalizing,
    Closed,
    Failed,
}

impl ArchiveState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveState::Idle => "idle",
            ArchiveState::Open => "open",
            ArchiveState::WritingEntry => "writing entry",
            ArchiveState::Finalizing => "finalizing",
            ArchiveState::Closed => "closed",
            ArchiveState::Failed => "failed",
        }
    }
}

/// Totals of a closed archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: usize,
    pub archive_size: u64,
}

struct PendingEntry {
    name: String,
    header_offset: u64,
    crc: crc32fast::Hasher,
    uncompressed_size: u64,
    compressed_size: u64,
    encoder: Option<DeflateEncoder<Vec<u8>>>,
}

/// Single-writer ZIP encoder over an [`ArchiveOutput`]
pub struct ArchiveWriter<O: ArchiveOutput> {
    output: O,
    state: ArchiveState,
    method: CompressionMethod,
    level: u32,
    offset: u64,
    entries: Vec<ArchiveEntry>,
    names: HashSet<String>,
    current: Option<PendingEntry>,
}

impl<O: ArchiveOutput> ArchiveWriter<O> {
    pub fn new(output: O, compression: CompressionType) -> Self {
        let (method, level) = match compression {
            CompressionType::Store => (CompressionMethod::Stored, 0),
            CompressionType::Deflate { level } => (CompressionMethod::Deflated, level.min(9)),
        };
        Self {
            output,
            state: ArchiveState::Idle,
            method,
            level,
            offset: 0,
            entries: Vec::new(),
            names: HashSet::new(),
            current: None,
        }
    }

    pub fn state(&self) -> ArchiveState {
        self.state
    }

    /// Bytes emitted so far
    pub fn bytes_written(&self) -> u64 {
        self.offset
    }

    /// Finished entries in write order
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// Give back the output, whatever the state
    pub fn into_output(self) -> O {
        self.output
    }

    /// Begin the archive
    pub fn open(&mut self) -> Result<(), ArchiveError> {
        self.expect_state("open", ArchiveState::Idle)?;
        self.state = ArchiveState::Open;
        Ok(())
    }

    /// Mark the archive as failed; every later call is rejected
    pub fn fail(&mut self) {
        if self.state != ArchiveState::Closed {
            self.state = ArchiveState::Failed;
            self.current = None;
        }
    }

    /// Start a new entry and emit its local header
    ///
    /// A rejected name leaves the archive open; nothing has been emitted.
    pub async fn start_entry(&mut self, name: &str) -> Result<(), ArchiveError> {
        self.expect_state("start entry", ArchiveState::Open)?;
        self.check_name(name)?;
        if self.entries.len() >= format::MAX_ENTRIES {
            return Err(self.limit(format!(
                "more than {} entries require ZIP64",
                format::MAX_ENTRIES
            )));
        }
        if !format::fits_u32_field(self.offset) {
            return Err(self.limit(format!(
                "entry {:?} would start beyond the 4 GiB offset limit",
                name
            )));
        }

        let header = format::local_file_header(name, self.method);
        let header_offset = self.offset;
        self.state = ArchiveState::WritingEntry;
        let result = self.emit(&header).await;
        self.poison(result)?;

        self.names.insert(name.to_string());
        self.current = Some(PendingEntry {
            name: name.to_string(),
            header_offset,
            crc: crc32fast::Hasher::new(),
            uncompressed_size: 0,
            compressed_size: 0,
            encoder: match self.method {
                CompressionMethod::Stored => None,
                CompressionMethod::Deflated => {
                    Some(DeflateEncoder::new(Vec::new(), Compression::new(self.level)))
                }
            },
        });
        Ok(())
    }

    /// Append payload bytes to the current entry
    pub async fn write_data(&mut self, data: &[u8]) -> Result<(), ArchiveError> {
        self.expect_state("write data", ArchiveState::WritingEntry)?;
        let result = self.write_data_inner(data).await;
        self.poison(result)
    }

    /// Close the current entry and emit its data descriptor
    pub async fn finish_entry(&mut self) -> Result<ArchiveEntry, ArchiveError> {
        self.expect_state("finish entry", ArchiveState::WritingEntry)?;
        let result = self.finish_entry_inner().await;
        let entry = self.poison(result)?;
        self.state = ArchiveState::Open;
        Ok(entry)
    }

    /// Emit the central directory and end record
    pub async fn finish(&mut self) -> Result<ArchiveSummary, ArchiveError> {
        self.expect_state("finish", ArchiveState::Open)?;
        self.state = ArchiveState::Finalizing;
        let result = self.finish_inner().await;
        let summary = self.poison(result)?;
        self.state = ArchiveState::Closed;
        Ok(summary)
    }

    async fn write_data_inner(&mut self, data: &[u8]) -> Result<(), ArchiveError> {
        let pending = self.current.as_mut().ok_or(ArchiveError::InvalidState {
            operation: "write data",
            state: "without an entry",
        })?;

        pending.crc.update(data);
        pending.uncompressed_size += data.len() as u64;
        if !format::fits_u32_field(pending.uncompressed_size) {
            return Err(ArchiveError::LimitExceeded(format!(
                "entry {:?} is larger than 4 GiB",
                pending.name
            )));
        }

        match pending.encoder.as_mut() {
            Some(encoder) => {
                encoder.write_all(data)?;
                let compressed = std::mem::take(encoder.get_mut());
                pending.compressed_size += compressed.len() as u64;
                self.emit(&compressed).await
            }
            None => {
                pending.compressed_size += data.len() as u64;
                self.emit(data).await
            }
        }
    }

    async fn finish_entry_inner(&mut self) -> Result<ArchiveEntry, ArchiveError> {
        let mut pending = self.current.take().ok_or(ArchiveError::InvalidState {
            operation: "finish entry",
            state: "without an entry",
        })?;

        if let Some(encoder) = pending.encoder.take() {
            let tail = encoder.finish()?;
            pending.compressed_size += tail.len() as u64;
            self.emit(&tail).await?;
        }
        if !format::fits_u32_field(pending.compressed_size) {
            return Err(ArchiveError::LimitExceeded(format!(
                "compressed entry {:?} is larger than 4 GiB",
                pending.name
            )));
        }

        let entry = ArchiveEntry {
            name: pending.name,
            method: self.method,
            crc32: pending.crc.finalize(),
            compressed_size: pending.compressed_size,
            uncompressed_size: pending.uncompressed_size,
            header_offset: pending.header_offset,
        };
        self.emit(&format::data_descriptor(&entry)).await?;

        tracing::debug!(
            name = %entry.name,
            size = entry.uncompressed_size,
            compressed = entry.compressed_size,
            crc32 = format_args!("{:08x}", entry.crc32),
            "Finished archive entry"
        );
        self.entries.push(entry.clone());
        Ok(entry)
    }

    async fn finish_inner(&mut self) -> Result<ArchiveSummary, ArchiveError> {
        let cd_offset = self.offset;
        let mut directory = Vec::new();
        for entry in &self.entries {
            directory.extend_from_slice(&format::central_directory_header(entry));
        }
        let cd_size = directory.len() as u64;

        if !format::fits_u32_field(cd_offset) || !format::fits_u32_field(cd_size) {
            return Err(ArchiveError::LimitExceeded(
                "central directory lies beyond the 4 GiB offset limit".to_string(),
            ));
        }

        directory.extend_from_slice(&format::end_of_central_directory(
            self.entries.len(),
            cd_size,
            cd_offset,
        ));
        self.emit(&directory).await?;

        Ok(ArchiveSummary {
            entries: self.entries.len(),
            archive_size: self.offset,
        })
    }

    async fn emit(&mut self, data: &[u8]) -> Result<(), ArchiveError> {
        if data.is_empty() {
            return Ok(());
        }
        self.output.write_all(data).await?;
        self.offset += data.len() as u64;
        Ok(())
    }

    fn check_name(&self, name: &str) -> Result<(), ArchiveError> {
        let reason = if name.is_empty() {
            "name is empty"
        } else if name.len() > format::MAX_NAME_LEN {
            "name is longer than 65535 bytes"
        } else if self.names.contains(name) {
            "duplicate entry name"
        } else {
            return Ok(());
        };
        Err(ArchiveError::InvalidName {
            name: name.to_string(),
            reason,
        })
    }

    fn expect_state(
        &self,
        operation: &'static str,
        expected: ArchiveState,
    ) -> Result<(), ArchiveError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ArchiveError::InvalidState {
                operation,
                state: self.state.as_str(),
            })
        }
    }

    fn limit(&mut self, message: String) -> ArchiveError {
        self.state = ArchiveState::Failed;
        ArchiveError::LimitExceeded(message)
    }

    fn poison<T>(&mut self, result: Result<T, ArchiveError>) -> Result<T, ArchiveError> {
        if result.is_err() {
            self.state = ArchiveState::Failed;
            self.current = None;
        }
        result
    }
}
