/*!
 * ZIP record layouts (streaming variant, no ZIP64)
 *
 * All multi-byte fields are little-endian. Local headers carry zero CRC and
 * sizes; the real values follow the entry data in a data descriptor and are
 * repeated in the central directory.
 */

pub const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x0403_4b50;
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x0807_4b50;
pub const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0201_4b50;
pub const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0605_4b50;

/// Version needed to extract: 2.0 (deflate, data descriptors)
pub const VERSION_NEEDED: u16 = 20;

/// Version made by: UNIX host, ZIP 2.0
pub const VERSION_MADE_BY: u16 = (3 << 8) | 20;

/// Bit 3: sizes and CRC live in the data descriptor
pub const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;

/// Bit 11: file name is UTF-8
pub const FLAG_UTF8: u16 = 1 << 11;

/// DOS date for 1980-01-01; entries carry a fixed timestamp so identical
/// inputs produce identical archives
pub const DOS_DATE: u16 = (1 << 5) | 1;
pub const DOS_TIME: u16 = 0;

/// Largest plain value of a 32-bit size or offset field; all-ones marks ZIP64
pub const MAX_U32_FIELD: u64 = u32::MAX as u64 - 1;

/// Largest entry count the end-of-central-directory record can hold
pub const MAX_ENTRIES: usize = u16::MAX as usize - 1;

/// Whether `value` can be stored in a 32-bit size or offset field
pub fn fits_u32_field(value: u64) -> bool {
    value <= MAX_U32_FIELD
}

/// Largest name the 16-bit length field can hold
pub const MAX_NAME_LEN: usize = u16::MAX as usize;

pub const LOCAL_FILE_HEADER_LEN: usize = 30;
pub const DATA_DESCRIPTOR_LEN: usize = 16;
pub const CENTRAL_DIRECTORY_HEADER_LEN: usize = 46;
pub const END_OF_CENTRAL_DIRECTORY_LEN: usize = 22;

/// Unix regular file, rw-r--r--, in the high half of external attributes
const EXTERNAL_ATTRIBUTES: u32 = 0o100644 << 16;

/// Entry payload encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflated,
}

impl CompressionMethod {
    /// Method number in the ZIP headers
    pub fn code(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflated => 8,
        }
    }
}

/// A finished entry, as recorded in the central directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub method: CompressionMethod,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub header_offset: u64,
}

fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn general_flags() -> u16 {
    FLAG_DATA_DESCRIPTOR | FLAG_UTF8
}

/// Local file header; CRC and sizes are deferred to the data descriptor
///
/// `name` must already be checked against [`MAX_NAME_LEN`].
pub fn local_file_header(name: &str, method: CompressionMethod) -> Vec<u8> {
    let mut buf = Vec::with_capacity(LOCAL_FILE_HEADER_LEN + name.len());
    put_u32(&mut buf, LOCAL_FILE_HEADER_SIGNATURE);
    put_u16(&mut buf, VERSION_NEEDED);
    put_u16(&mut buf, general_flags());
    put_u16(&mut buf, method.code());
    put_u16(&mut buf, DOS_TIME);
    put_u16(&mut buf, DOS_DATE);
    put_u32(&mut buf, 0); // crc32
    put_u32(&mut buf, 0); // compressed size
    put_u32(&mut buf, 0); // uncompressed size
    put_u16(&mut buf, name.len() as u16);
    put_u16(&mut buf, 0); // extra field length
    buf.extend_from_slice(name.as_bytes());
    buf
}

/// Data descriptor following an entry's payload
///
/// Sizes must already be checked against [`MAX_U32_FIELD`].
pub fn data_descriptor(entry: &ArchiveEntry) -> Vec<u8> {
    let mut buf = Vec::with_capacity(DATA_DESCRIPTOR_LEN);
    put_u32(&mut buf, DATA_DESCRIPTOR_SIGNATURE);
    put_u32(&mut buf, entry.crc32);
    put_u32(&mut buf, entry.compressed_size as u32);
    put_u32(&mut buf, entry.uncompressed_size as u32);
    buf
}

/// Central directory file header for one entry
pub fn central_directory_header(entry: &ArchiveEntry) -> Vec<u8> {
    let mut buf = Vec::with_capacity(CENTRAL_DIRECTORY_HEADER_LEN + entry.name.len());
    put_u32(&mut buf, CENTRAL_DIRECTORY_SIGNATURE);
    put_u16(&mut buf, VERSION_MADE_BY);
    put_u16(&mut buf, VERSION_NEEDED);
    put_u16(&mut buf, general_flags());
    put_u16(&mut buf, entry.method.code());
    put_u16(&mut buf, DOS_TIME);
    put_u16(&mut buf, DOS_DATE);
    put_u32(&mut buf, entry.crc32);
    put_u32(&mut buf, entry.compressed_size as u32);
    put_u32(&mut buf, entry.uncompressed_size as u32);
    put_u16(&mut buf, entry.name.len() as u16);
    put_u16(&mut buf, 0); // extra field length
    put_u16(&mut buf, 0); // comment length
    put_u16(&mut buf, 0); // disk number start
    put_u16(&mut buf, 0); // internal attributes
    put_u32(&mut buf, EXTERNAL_ATTRIBUTES);
    put_u32(&mut buf, entry.header_offset as u32);
    buf.extend_from_slice(entry.name.as_bytes());
    buf
}

/// End of central directory record
pub fn end_of_central_directory(entries: usize, cd_size: u64, cd_offset: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(END_OF_CENTRAL_DIRECTORY_LEN);
    put_u32(&mut buf, END_OF_CENTRAL_DIRECTORY_SIGNATURE);
    put_u16(&mut buf, 0); // this disk
    put_u16(&mut buf, 0); // disk with central directory
    put_u16(&mut buf, entries as u16);
    put_u16(&mut buf, entries as u16);
    put_u32(&mut buf, cd_size as u32);
    put_u32(&mut buf, cd_offset as u32);
    put_u16(&mut buf, 0); // comment length
    buf
}
