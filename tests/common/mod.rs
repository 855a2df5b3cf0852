//! Shared helpers for integration tests
//!
//! [`read_zip`] is a minimal ZIP reader: it finds the end-of-central-directory
//! record from the end of the archive, walks the central directory, and
//! extracts every entry (stored or deflated), checking CRC and sizes against
//! the data descriptor.

#![allow(dead_code)]

use anyhow::{bail, ensure, Context, Result};
use bucket_zip::ZipConfig;
use std::io::Read;

/// One extracted entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntry {
    pub name: String,
    pub method: u16,
    pub crc32: u32,
    pub data: Vec<u8>,
}

fn u16_at(buf: &[u8], pos: usize) -> Result<u16> {
    let bytes = buf.get(pos..pos + 2).context("truncated u16")?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn u32_at(buf: &[u8], pos: usize) -> Result<u32> {
    let bytes = buf.get(pos..pos + 4).context("truncated u32")?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Parse and extract a whole archive, in central directory order
pub fn read_zip(archive: &[u8]) -> Result<Vec<ZipEntry>> {
    ensure!(archive.len() >= 22, "archive shorter than an end record");

    let eocd = (0..=archive.len() - 22)
        .rev()
        .find(|&pos| u32_at(archive, pos).ok() == Some(0x0605_4b50))
        .context("end of central directory not found")?;

    let count = u16_at(archive, eocd + 10)? as usize;
    let cd_size = u32_at(archive, eocd + 12)? as usize;
    let cd_offset = u32_at(archive, eocd + 16)? as usize;
    ensure!(cd_offset + cd_size == eocd, "central directory does not end at the end record");

    let mut entries = Vec::with_capacity(count);
    let mut pos = cd_offset;
    for _ in 0..count {
        ensure!(u32_at(archive, pos)? == 0x0201_4b50, "bad central directory signature");
        let flags = u16_at(archive, pos + 8)?;
        let method = u16_at(archive, pos + 10)?;
        let crc32 = u32_at(archive, pos + 16)?;
        let compressed = u32_at(archive, pos + 20)? as usize;
        let uncompressed = u32_at(archive, pos + 24)? as usize;
        let name_len = u16_at(archive, pos + 28)? as usize;
        let extra_len = u16_at(archive, pos + 30)? as usize;
        let comment_len = u16_at(archive, pos + 32)? as usize;
        let header_offset = u32_at(archive, pos + 42)? as usize;
        let name = std::str::from_utf8(&archive[pos + 46..pos + 46 + name_len])?.to_string();
        ensure!(flags & (1 << 3) != 0, "entry {} has no data descriptor flag", name);

        ensure!(
            u32_at(archive, header_offset)? == 0x0403_4b50,
            "bad local header for {}",
            name
        );
        let local_name_len = u16_at(archive, header_offset + 26)? as usize;
        let local_extra_len = u16_at(archive, header_offset + 28)? as usize;
        let data_start = header_offset + 30 + local_name_len + local_extra_len;
        let raw = archive
            .get(data_start..data_start + compressed)
            .context("entry data out of bounds")?;

        let data = match method {
            0 => raw.to_vec(),
            8 => {
                let mut out = Vec::with_capacity(uncompressed);
                flate2::read::DeflateDecoder::new(raw).read_to_end(&mut out)?;
                out
            }
            other => bail!("unsupported method {}", other),
        };
        ensure!(data.len() == uncompressed, "size mismatch for {}", name);
        ensure!(crc32fast::hash(&data) == crc32, "crc mismatch for {}", name);

        let descriptor = data_start + compressed;
        ensure!(u32_at(archive, descriptor)? == 0x0807_4b50, "missing data descriptor for {}", name);
        ensure!(u32_at(archive, descriptor + 4)? == crc32, "descriptor crc differs for {}", name);

        entries.push(ZipEntry {
            name,
            method,
            crc32,
            data,
        });
        pos += 46 + name_len + extra_len + comment_len;
    }

    Ok(entries)
}

/// Config with fast retries for tests
pub fn test_config() -> ZipConfig {
    ZipConfig {
        retry_attempts: 3,
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 10,
        retry_jitter: 0.0,
        ..Default::default()
    }
}

/// md5 hex of a buffer, computed independently of the crate
pub fn md5_hex(data: &[u8]) -> String {
    use md5::{Digest, Md5};
    hex::encode(Md5::digest(data))
}
