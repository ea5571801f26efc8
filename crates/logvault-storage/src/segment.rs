//! Segment Storage Format
//!
//! A segment is the unit of compressed storage inside an archive: the
//! concatenated encoded columns of many files, passed through a block codec
//! and written to `segments/<segment_id>`.
//!
//! ## Segment File Structure
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ Header (16 bytes)                                           │
//! │ - Magic bytes: "LVSG" (4 bytes)                             │
//! │ - Version: 1 (2 bytes)                                      │
//! │ - Codec id: None/Lz4/Zstd (2 bytes)                         │
//! │ - Uncompressed size (8 bytes)                               │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Compressed payload                                          │
//! │ - The concatenated per-file column streams                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Footer (4 bytes)                                            │
//! │ - CRC32 over everything before it                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Why This Design?
//!
//! The payload is compressed as one block: a segment is read in full anyway
//! (the catalog records each file's byte offsets into the *uncompressed*
//! payload), and a single block gives the codec the longest possible match
//! window over highly repetitive column data.
//!
//! The codec id appears both here and in the archive manifest; a reader
//! rejects a segment whose header disagrees with the manifest, since that
//! can only mean a corrupted or mixed-up archive.
//!
//! ## Accumulation
//!
//! While open, a [`Segment`] is just an uncompressed append buffer. The
//! archive tracks the buffer's size against its target and calls
//! [`Segment::seal`] once reached, which is the only point at which the
//! codec runs and the file is written.

use std::fs;
use std::io::Write;
use std::path::Path;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Magic bytes for segment files: "LVSG"
pub const SEGMENT_MAGIC: [u8; 4] = [0x4C, 0x56, 0x53, 0x47];

/// Version number for the segment format
pub const SEGMENT_VERSION: u16 = 1;

/// Segment header size (16 bytes)
pub const HEADER_SIZE: usize = 16;

/// Segment footer size (4 bytes, CRC32)
pub const FOOTER_SIZE: usize = 4;

/// Block codec applied to sealed segments
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u16)]
pub enum Compression {
    None = 0,
    Lz4 = 1,
    #[default]
    Zstd = 2,
}

impl TryFrom<u16> for Compression {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Lz4),
            2 => Ok(Compression::Zstd),
            _ => Err(Error::UnsupportedCodec(value)),
        }
    }
}

/// Sizes of a sealed segment as recorded in the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SealedSegment {
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

/// An open segment accumulating uncompressed column streams
#[derive(Debug, Default)]
pub struct Segment {
    buf: BytesMut,
}

impl Segment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a byte stream, returning its offset within the uncompressed
    /// payload. The catalog stores these offsets per file column.
    pub fn append(&mut self, bytes: &[u8]) -> u64 {
        let offset = self.buf.len() as u64;
        self.buf.put_slice(bytes);
        offset
    }

    pub fn uncompressed_size(&self) -> u64 {
        self.buf.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Compress the accumulated payload and write it to
    /// `<segments_dir>/<id>`, fsyncing the file before returning.
    pub fn seal(
        self,
        id: u64,
        segments_dir: &Path,
        compression: Compression,
        compression_level: i32,
    ) -> Result<SealedSegment> {
        let uncompressed_size = self.buf.len() as u64;

        let payload = match compression {
            Compression::None => self.buf.to_vec(),
            Compression::Lz4 => lz4_flex::compress_prepend_size(&self.buf),
            Compression::Zstd => zstd::encode_all(&self.buf[..], compression_level)?,
        };

        let mut out = BytesMut::with_capacity(HEADER_SIZE + payload.len() + FOOTER_SIZE);
        out.put_slice(&SEGMENT_MAGIC);
        out.put_u16(SEGMENT_VERSION);
        out.put_u16(compression as u16);
        out.put_u64(uncompressed_size);
        out.put_slice(&payload);
        let crc = crc32fast::hash(&out[..]);
        out.put_u32(crc);

        let path = segments_dir.join(id.to_string());
        let mut file = fs::File::create(&path)?;
        file.write_all(&out)?;
        file.sync_all()?;

        debug!(
            segment_id = id,
            uncompressed_size,
            compressed_size = out.len(),
            "sealed segment"
        );
        Ok(SealedSegment {
            compressed_size: out.len() as u64,
            uncompressed_size,
        })
    }
}

/// Read a sealed segment back, verifying magic, version, checksum, and that
/// its codec matches the archive's. Returns the uncompressed payload.
pub fn read_segment(path: &Path, expected_compression: Compression) -> Result<Bytes> {
    let data = fs::read(path)?;
    if data.len() < HEADER_SIZE + FOOTER_SIZE {
        return Err(Error::CorruptArchive(format!(
            "segment {} is too short ({} bytes)",
            path.display(),
            data.len()
        )));
    }

    let footer_start = data.len() - FOOTER_SIZE;
    let stored_crc = u32::from_be_bytes([
        data[footer_start],
        data[footer_start + 1],
        data[footer_start + 2],
        data[footer_start + 3],
    ]);
    if stored_crc != crc32fast::hash(&data[..footer_start]) {
        return Err(Error::CorruptArchive(format!(
            "segment {} failed checksum verification",
            path.display()
        )));
    }

    let mut header = &data[..HEADER_SIZE];
    let mut magic = [0u8; 4];
    header.copy_to_slice(&mut magic);
    if magic != SEGMENT_MAGIC {
        return Err(Error::CorruptArchive(format!(
            "segment {} has bad magic bytes",
            path.display()
        )));
    }
    let version = header.get_u16();
    if version != SEGMENT_VERSION {
        return Err(Error::CorruptArchive(format!(
            "segment {} has unsupported version {version}",
            path.display()
        )));
    }
    let compression = Compression::try_from(header.get_u16())?;
    if compression != expected_compression {
        return Err(Error::CorruptArchive(format!(
            "segment {} codec {compression:?} disagrees with archive codec {expected_compression:?}",
            path.display()
        )));
    }
    let uncompressed_size = header.get_u64();

    let payload = &data[HEADER_SIZE..footer_start];
    let decompressed = match compression {
        Compression::None => payload.to_vec(),
        Compression::Lz4 => lz4_flex::decompress_size_prepended(payload)
            .map_err(|e| Error::CorruptArchive(format!("lz4 decompression failed: {e}")))?,
        Compression::Zstd => zstd::decode_all(payload)
            .map_err(|e| Error::CorruptArchive(format!("zstd decompression failed: {e}")))?,
    };

    if decompressed.len() as u64 != uncompressed_size {
        return Err(Error::CorruptArchive(format!(
            "segment {} decompressed to {} bytes, header claims {}",
            path.display(),
            decompressed.len(),
            uncompressed_size
        )));
    }

    Ok(Bytes::from(decompressed))
}
