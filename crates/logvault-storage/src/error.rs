//! Error Types for the Archive Writer and Reader
//!
//! ## Error Categories
//!
//! ### Lifecycle Errors
//! - `DuplicateArchive`: the target archive directory already exists
//! - `FileNotTracked`: the given file id is not owned by this archive (or is
//!   in the wrong lifecycle stage for the requested operation)
//! - `InvalidState`: an operation was attempted out of lifecycle order, e.g.
//!   writing to a closed file or closing an archive with files still open
//!
//! ### Data Integrity Errors
//! - `CorruptArchive`: a segment, dictionary, or catalog row read back from
//!   disk is inconsistent (bad magic, checksum mismatch, dangling dictionary
//!   reference, truncated column)
//! - `UnsupportedCodec`: a segment header names a codec id this build does
//!   not know
//!
//! Errors from the core codecs, the metadata catalogs, and the filesystem
//! convert via `#[from]` so `?` works across the crate seams.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] logvault_core::Error),

    #[error(transparent)]
    Metadata(#[from] logvault_metadata::MetadataError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Archive already exists: {0}")]
    DuplicateArchive(String),

    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("Unsupported compression codec id: {0}")]
    UnsupportedCodec(u16),

    #[error("File not tracked by this archive: {0}")]
    FileNotTracked(Uuid),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, Error>;
