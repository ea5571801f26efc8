//! Archive Writer Configuration
//!
//! ## ArchiveWriterConfig
//!
//! Settings supplied when opening a new archive:
//!
//! - **id**: the archive's identity; also names its directory
//! - **creator_id / creation_num**: together these totally order the archives
//!   written by one producer, which is what lets a logical file split across
//!   consecutive archives be reassembled in order
//! - **storage_id**: label of the storage tier the archive lands on
//! - **output_dir**: the archives root; the archive directory is created
//!   beneath it
//! - **target_segment_uncompressed_size**: a segment seals once its
//!   accumulated uncompressed size reaches this (default: 64MB)
//! - **compression / compression_level**: the block codec applied to sealed
//!   segments, persisted in the archive manifest (default: Zstd level 3)
//!
//! ## Usage
//!
//! ```ignore
//! use logvault_storage::ArchiveWriterConfig;
//!
//! // Defaults for everything but the destination
//! let config = ArchiveWriterConfig::new("/data/archives");
//!
//! // Small segments for faster testing
//! let config = ArchiveWriterConfig {
//!     target_segment_uncompressed_size: 64 * 1024,
//!     ..ArchiveWriterConfig::new("/tmp/archives")
//! };
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::segment::Compression;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveWriterConfig {
    /// Archive id; also the archive directory's name
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    /// Identity of the producer writing this archive
    #[serde(default = "Uuid::new_v4")]
    pub creator_id: Uuid,

    /// Sequence number of this archive among the producer's archives
    #[serde(default)]
    pub creation_num: u64,

    /// Label of the storage tier this archive is written to
    #[serde(default = "default_storage_id")]
    pub storage_id: String,

    /// Directory the archive directory is created under
    pub output_dir: PathBuf,

    /// Seal a segment once it holds this much uncompressed data (default: 64MB)
    #[serde(default = "default_target_segment_uncompressed_size")]
    pub target_segment_uncompressed_size: u64,

    /// Block codec for sealed segments (default: Zstd)
    #[serde(default)]
    pub compression: Compression,

    /// Codec-specific compression level (default: 3)
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

impl ArchiveWriterConfig {
    /// Defaults for everything but the destination directory
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            creator_id: Uuid::new_v4(),
            creation_num: 0,
            storage_id: default_storage_id(),
            output_dir: output_dir.into(),
            target_segment_uncompressed_size: default_target_segment_uncompressed_size(),
            compression: Compression::default(),
            compression_level: default_compression_level(),
        }
    }
}

fn default_storage_id() -> String {
    "local".to_string()
}

fn default_target_segment_uncompressed_size() -> u64 {
    64 * 1024 * 1024 // 64MB
}

fn default_compression_level() -> i32 {
    3
}
