//! Metadata Type Definitions
//!
//! ## Types Overview
//!
//! ### FileMetadata
//! One row per file *split*: a contiguous piece of a logical input file that
//! fits within a single archive. A logical file split across consecutive
//! archives appears once per archive with distinct split ids but a common
//! `orig_file_id`.
//!
//! ### SegmentMetadata
//! A sealed segment's sizes plus the sets of log-type and variable dictionary
//! ids its member files reference. Readers use the id sets to prefilter
//! which segments can possibly contain a match.
//!
//! ### ArchiveMetadata
//! The global catalog's row for one closed archive. `creator_id` +
//! `creation_num` totally order the archives written by one producer, which
//! is what lets split parts be reassembled in order.
//!
//! ## Design Decisions
//!
//! - Timestamps are i64 milliseconds since epoch; `i64::MIN` is the
//!   "no timestamp" sentinel
//! - Ids that are UUIDs are stored as their hyphenated text form
//! - Variable-length id sets and timestamp-pattern ranges are JSON-typed
//!   TEXT columns

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Catalog row for one file split
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Unique id of this split
    pub id: Uuid,

    /// Id of the logical input file this split came from
    pub orig_file_id: Uuid,

    /// Original path of the input file
    pub path: String,

    /// Caller-assigned group for grouped decompression
    pub group_id: u64,

    /// Position of this split within the logical file
    pub split_ix: u32,

    /// First timestamp in the split (`i64::MIN` if none)
    pub begin_ts: i64,

    /// Last timestamp in the split (`i64::MIN` if none)
    pub end_ts: i64,

    /// Bytes of original text this split covers
    pub num_uncompressed_bytes: u64,

    /// Messages encoded in this split
    pub num_messages: u64,

    /// Total variables encoded across those messages
    pub num_variables: u64,

    /// Segment holding this split's columns, once sealed
    pub segment_id: Option<u64>,

    /// Byte offset of the timestamp column within the segment
    pub segment_timestamps_pos: Option<u64>,

    /// Byte offset of the log-type column within the segment
    pub segment_logtypes_pos: Option<u64>,

    /// Byte offset of the variable column within the segment
    pub segment_variables_pos: Option<u64>,

    /// JSON-encoded `(message_ix, pattern)` ranges describing which timestamp
    /// pattern was active for each range of messages
    pub ts_patterns: String,
}

/// Catalog row for one sealed segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMetadata {
    pub id: u64,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    /// Log-type dictionary ids referenced by the segment's files
    pub logtype_ids: Vec<u64>,
    /// Variable dictionary ids referenced by the segment's files
    pub var_ids: Vec<u64>,
}

/// Global catalog row for one closed archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    pub id: Uuid,
    pub begin_ts: i64,
    pub end_ts: i64,
    pub uncompressed_size: u64,
    pub size: u64,
    pub creator_id: Uuid,
    pub creation_num: u64,
    pub storage_id: String,
}
