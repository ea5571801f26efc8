//! Per-File Encoded Streams
//!
//! A [`File`] buffers the encoded form of one logical input file (or one
//! split of it) while the archive ingests it. Three column-oriented byte
//! streams accumulate per file:
//!
//! - **timestamp column**: one ZigZag varint per message, delta-encoded
//!   against the previous message's timestamp (the first delta is against 0,
//!   i.e. absolute)
//! - **log-type column**: one varint log-type id per message
//! - **variable column**: per message, one varint per template placeholder
//!   in placeholder order
//!
//! ## Storage Modes
//!
//! A file is created in one of two modes and the mode never changes after
//! release:
//!
//! - **InMemory**: columns buffer in RAM; release materializes them to
//!   scratch files under the archive's `logs/` directory
//! - **OnDisk**: columns stream to the scratch files as messages arrive,
//!   for inputs too large to buffer
//!
//! Either way, a released file's columns sit in `logs/` until the file is
//! appended to a segment, after which the scratch files are removed.
//!
//! ## Lifecycle
//!
//! `Open → close() → Closed → release() → Released → (append to segment)`
//!
//! Timestamp-pattern changes are recorded as `(message_ix, pattern)` pairs so
//! the reader can re-render the textual timestamp form that was active for
//! each range of messages; a `None` pattern marks a range of messages with
//! no recognized timestamp.

use std::collections::HashSet;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::BytesMut;
use logvault_core::timestamp::{TimestampPattern, NO_TIMESTAMP};
use logvault_core::varint;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::encoder::EncodedVariable;
use crate::error::{Error, Result};

/// Scratch file extensions for the three columns
const TIMESTAMPS_EXT: &str = "ts";
const LOGTYPES_EXT: &str = "lt";
const VARIABLES_EXT: &str = "var";

/// One `(message_ix, pattern)` range; serialized as JSON into the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampPatternRange {
    pub message_ix: u64,
    pub pattern: Option<TimestampPattern>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Closed,
    Released,
}

enum Storage {
    InMemory {
        timestamps: BytesMut,
        logtypes: BytesMut,
        variables: BytesMut,
    },
    OnDisk {
        timestamps: BufWriter<fs::File>,
        logtypes: BufWriter<fs::File>,
        variables: BufWriter<fs::File>,
    },
    /// Columns live in the scratch files; buffers and writers are gone
    Released,
}

/// Buffered encoded streams for one input file split
pub struct File {
    id: Uuid,
    orig_file_id: Uuid,
    orig_path: String,
    group_id: u64,
    split_ix: u32,

    begin_ts: i64,
    end_ts: i64,
    prev_ts: i64,

    num_messages: u64,
    num_variables: u64,
    num_uncompressed_bytes: u64,

    ts_pattern_ranges: Vec<TimestampPatternRange>,

    /// Dictionary ids this file references; unioned into its segment's sets
    logtype_ids: HashSet<u64>,
    var_ids: HashSet<u64>,

    logs_dir: PathBuf,
    storage: Storage,
    state: State,

    // Segment placement, filled in while the file is appended
    segment_timestamps_pos: Option<u64>,
    segment_logtypes_pos: Option<u64>,
    segment_variables_pos: Option<u64>,
}

impl File {
    /// Create a file that buffers its columns in memory
    pub(crate) fn new_in_memory(
        id: Uuid,
        orig_path: String,
        group_id: u64,
        orig_file_id: Uuid,
        split_ix: u32,
        logs_dir: PathBuf,
    ) -> Self {
        Self::new(
            id,
            orig_path,
            group_id,
            orig_file_id,
            split_ix,
            logs_dir,
            Storage::InMemory {
                timestamps: BytesMut::new(),
                logtypes: BytesMut::new(),
                variables: BytesMut::new(),
            },
        )
    }

    /// Create a file that streams its columns to scratch files as it goes
    pub(crate) fn new_on_disk(
        id: Uuid,
        orig_path: String,
        group_id: u64,
        orig_file_id: Uuid,
        split_ix: u32,
        logs_dir: PathBuf,
    ) -> Result<Self> {
        let open = |ext: &str| -> Result<BufWriter<fs::File>> {
            Ok(BufWriter::new(fs::File::create(scratch_path(
                &logs_dir, id, ext,
            ))?))
        };
        let storage = Storage::OnDisk {
            timestamps: open(TIMESTAMPS_EXT)?,
            logtypes: open(LOGTYPES_EXT)?,
            variables: open(VARIABLES_EXT)?,
        };
        Ok(Self::new(
            id, orig_path, group_id, orig_file_id, split_ix, logs_dir, storage,
        ))
    }

    fn new(
        id: Uuid,
        orig_path: String,
        group_id: u64,
        orig_file_id: Uuid,
        split_ix: u32,
        logs_dir: PathBuf,
        storage: Storage,
    ) -> Self {
        Self {
            id,
            orig_file_id,
            orig_path,
            group_id,
            split_ix,
            begin_ts: NO_TIMESTAMP,
            end_ts: NO_TIMESTAMP,
            prev_ts: 0,
            num_messages: 0,
            num_variables: 0,
            num_uncompressed_bytes: 0,
            ts_pattern_ranges: Vec::new(),
            logtype_ids: HashSet::new(),
            var_ids: HashSet::new(),
            logs_dir,
            storage,
            state: State::Open,
            segment_timestamps_pos: None,
            segment_logtypes_pos: None,
            segment_variables_pos: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn orig_file_id(&self) -> Uuid {
        self.orig_file_id
    }

    pub fn orig_path(&self) -> &str {
        &self.orig_path
    }

    pub fn group_id(&self) -> u64 {
        self.group_id
    }

    pub fn split_ix(&self) -> u32 {
        self.split_ix
    }

    pub fn begin_ts(&self) -> i64 {
        self.begin_ts
    }

    pub fn end_ts(&self) -> i64 {
        self.end_ts
    }

    pub fn num_messages(&self) -> u64 {
        self.num_messages
    }

    pub fn num_uncompressed_bytes(&self) -> u64 {
        self.num_uncompressed_bytes
    }

    /// Whether any message in this file carried a timestamp
    pub fn has_timestamps(&self) -> bool {
        self.end_ts != NO_TIMESTAMP
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self.storage, Storage::InMemory { .. })
    }

    pub(crate) fn logtype_ids(&self) -> &HashSet<u64> {
        &self.logtype_ids
    }

    pub(crate) fn var_ids(&self) -> &HashSet<u64> {
        &self.var_ids
    }

    /// Record that subsequent messages use a different timestamp pattern
    /// (`None` for messages with no recognized timestamp)
    pub fn change_ts_pattern(&mut self, pattern: Option<&TimestampPattern>) {
        self.ts_pattern_ranges.push(TimestampPatternRange {
            message_ix: self.num_messages,
            pattern: pattern.cloned(),
        });
    }

    /// Append one encoded message to the three columns
    pub fn write_message(
        &mut self,
        timestamp: Option<i64>,
        logtype_id: u64,
        variables: &[EncodedVariable],
        num_uncompressed_bytes: u64,
    ) -> Result<()> {
        if self.state != State::Open {
            return Err(Error::InvalidState(format!(
                "write to file {} which is not open",
                self.id
            )));
        }

        let mut ts_buf = BytesMut::new();
        match timestamp {
            Some(ts) => {
                varint::encode_varint(&mut ts_buf, ts.wrapping_sub(self.prev_ts));
                self.prev_ts = ts;
                // Min/max rather than first/last, so begin_ts <= end_ts holds
                // even for inputs whose timestamps regress
                if self.begin_ts == NO_TIMESTAMP || ts < self.begin_ts {
                    self.begin_ts = ts;
                }
                if self.end_ts == NO_TIMESTAMP || ts > self.end_ts {
                    self.end_ts = ts;
                }
            }
            // Keep the column aligned; the pattern ranges mark these
            // messages as timestamp-less so the value is never rendered
            None => varint::encode_varint(&mut ts_buf, 0),
        }

        let mut logtype_buf = BytesMut::new();
        varint::encode_varint_u64(&mut logtype_buf, logtype_id);
        self.logtype_ids.insert(logtype_id);

        let mut var_buf = BytesMut::new();
        for variable in variables {
            match variable {
                EncodedVariable::Int(value) => varint::encode_varint(&mut var_buf, *value),
                EncodedVariable::Float(packed) => varint::encode_varint_u64(&mut var_buf, *packed),
                EncodedVariable::DictId(id) => {
                    varint::encode_varint_u64(&mut var_buf, *id);
                    self.var_ids.insert(*id);
                }
            }
        }

        match &mut self.storage {
            Storage::InMemory {
                timestamps,
                logtypes,
                variables,
            } => {
                timestamps.extend_from_slice(&ts_buf);
                logtypes.extend_from_slice(&logtype_buf);
                variables.extend_from_slice(&var_buf);
            }
            Storage::OnDisk {
                timestamps,
                logtypes,
                variables,
            } => {
                timestamps.write_all(&ts_buf)?;
                logtypes.write_all(&logtype_buf)?;
                variables.write_all(&var_buf)?;
            }
            Storage::Released => {
                return Err(Error::InvalidState(format!(
                    "write to released file {}",
                    self.id
                )));
            }
        }

        self.num_messages += 1;
        self.num_variables += variables.len() as u64;
        self.num_uncompressed_bytes += num_uncompressed_bytes;
        Ok(())
    }

    /// No more messages will be written
    pub fn close(&mut self) -> Result<()> {
        if self.state != State::Open {
            return Err(Error::InvalidState(format!(
                "close of file {} which is not open",
                self.id
            )));
        }
        if let Storage::OnDisk {
            timestamps,
            logtypes,
            variables,
        } = &mut self.storage
        {
            timestamps.flush()?;
            logtypes.flush()?;
            variables.flush()?;
        }
        self.state = State::Closed;
        Ok(())
    }

    /// Materialize the columns to scratch files (a no-op move for the
    /// on-disk mode, a write-out for the in-memory mode) and drop the
    /// buffers. The storage mode itself never changes after this point.
    pub(crate) fn release(&mut self) -> Result<()> {
        if self.state != State::Closed {
            return Err(Error::InvalidState(format!(
                "release of file {} which is not closed",
                self.id
            )));
        }

        match std::mem::replace(&mut self.storage, Storage::Released) {
            Storage::InMemory {
                timestamps,
                logtypes,
                variables,
            } => {
                fs::write(self.scratch_path(TIMESTAMPS_EXT), &timestamps)?;
                fs::write(self.scratch_path(LOGTYPES_EXT), &logtypes)?;
                fs::write(self.scratch_path(VARIABLES_EXT), &variables)?;
            }
            Storage::OnDisk {
                timestamps,
                logtypes,
                variables,
            } => {
                // Writers were flushed at close; dropping them closes the fds
                drop((timestamps, logtypes, variables));
            }
            Storage::Released => {
                return Err(Error::InvalidState(format!(
                    "double release of file {}",
                    self.id
                )));
            }
        }

        self.state = State::Released;
        Ok(())
    }

    /// Read the released columns back for segment insertion
    pub(crate) fn read_columns(&self) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>)> {
        if self.state != State::Released {
            return Err(Error::InvalidState(format!(
                "column read of file {} which is not released",
                self.id
            )));
        }
        Ok((
            fs::read(self.scratch_path(TIMESTAMPS_EXT))?,
            fs::read(self.scratch_path(LOGTYPES_EXT))?,
            fs::read(self.scratch_path(VARIABLES_EXT))?,
        ))
    }

    /// Remove the scratch files once the columns live in a sealed segment
    pub(crate) fn remove_scratch_files(&self) -> Result<()> {
        for ext in [TIMESTAMPS_EXT, LOGTYPES_EXT, VARIABLES_EXT] {
            fs::remove_file(self.scratch_path(ext))?;
        }
        Ok(())
    }

    pub(crate) fn set_segment_positions(
        &mut self,
        timestamps_pos: u64,
        logtypes_pos: u64,
        variables_pos: u64,
    ) {
        self.segment_timestamps_pos = Some(timestamps_pos);
        self.segment_logtypes_pos = Some(logtypes_pos);
        self.segment_variables_pos = Some(variables_pos);
    }

    /// Catalog row for this file's current state
    pub(crate) fn to_metadata(
        &self,
        segment_id: Option<u64>,
    ) -> Result<logvault_metadata::FileMetadata> {
        Ok(logvault_metadata::FileMetadata {
            id: self.id,
            orig_file_id: self.orig_file_id,
            path: self.orig_path.clone(),
            group_id: self.group_id,
            split_ix: self.split_ix,
            begin_ts: self.begin_ts,
            end_ts: self.end_ts,
            num_uncompressed_bytes: self.num_uncompressed_bytes,
            num_messages: self.num_messages,
            num_variables: self.num_variables,
            segment_id,
            segment_timestamps_pos: self.segment_timestamps_pos,
            segment_logtypes_pos: self.segment_logtypes_pos,
            segment_variables_pos: self.segment_variables_pos,
            ts_patterns: serde_json::to_string(&self.ts_pattern_ranges)?,
        })
    }

    fn scratch_path(&self, ext: &str) -> PathBuf {
        scratch_path(&self.logs_dir, self.id, ext)
    }
}

fn scratch_path(logs_dir: &Path, id: Uuid, ext: &str) -> PathBuf {
    logs_dir.join(format!("{id}.{ext}"))
}

/// Total order on files inside a segment: group, then end timestamp, then
/// path, with the id as the uniqueness tiebreaker. Group-first ordering
/// keeps grouped files adjacent for grouped decompression; end-timestamp
/// second gives locality for time-range queries.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct FileOrderKey {
    pub group_id: u64,
    pub end_ts: i64,
    pub orig_path: String,
    pub id: Uuid,
}

impl FileOrderKey {
    pub fn for_file(file: &File) -> Self {
        Self {
            group_id: file.group_id(),
            end_ts: file.end_ts(),
            orig_path: file.orig_path().to_string(),
            id: file.id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logvault_core::varint::{decode_varint, decode_varint_u64};
    use tempfile::TempDir;

    fn in_memory_file(dir: &TempDir) -> File {
        File::new_in_memory(
            Uuid::new_v4(),
            "logs/app.log".to_string(),
            0,
            Uuid::new_v4(),
            0,
            dir.path().to_path_buf(),
        )
    }

    #[test]
    fn test_counters_and_timestamp_range() {
        let dir = TempDir::new().unwrap();
        let mut file = in_memory_file(&dir);

        file.write_message(Some(1_000), 0, &[EncodedVariable::Int(7)], 20)
            .unwrap();
        file.write_message(Some(3_500), 1, &[], 15).unwrap();
        file.write_message(Some(2_000), 0, &[EncodedVariable::DictId(4)], 25)
            .unwrap();

        assert_eq!(file.num_messages(), 3);
        assert_eq!(file.num_uncompressed_bytes(), 60);
        assert_eq!(file.begin_ts(), 1_000);
        // Max over all messages, even when timestamps regress
        assert_eq!(file.end_ts(), 3_500);
        assert!(file.has_timestamps());
    }

    #[test]
    fn test_file_without_timestamps_keeps_sentinel() {
        let dir = TempDir::new().unwrap();
        let mut file = in_memory_file(&dir);

        file.change_ts_pattern(None);
        file.write_message(None, 0, &[], 10).unwrap();
        file.write_message(None, 0, &[], 10).unwrap();

        assert_eq!(file.begin_ts(), NO_TIMESTAMP);
        assert_eq!(file.end_ts(), NO_TIMESTAMP);
        assert!(!file.has_timestamps());
    }

    #[test]
    fn test_referenced_id_sets() {
        let dir = TempDir::new().unwrap();
        let mut file = in_memory_file(&dir);

        file.write_message(
            Some(1),
            5,
            &[EncodedVariable::DictId(2), EncodedVariable::Int(9)],
            10,
        )
        .unwrap();
        file.write_message(Some(2), 5, &[EncodedVariable::DictId(3)], 10)
            .unwrap();

        assert_eq!(file.logtype_ids().len(), 1);
        assert!(file.logtype_ids().contains(&5));
        assert_eq!(file.var_ids().len(), 2);
        assert!(file.var_ids().contains(&2) && file.var_ids().contains(&3));
    }

    #[test]
    fn test_release_materializes_columns() {
        let dir = TempDir::new().unwrap();
        let mut file = in_memory_file(&dir);

        file.write_message(Some(100), 3, &[EncodedVariable::Int(-4)], 12)
            .unwrap();
        file.write_message(Some(150), 3, &[EncodedVariable::Int(8)], 12)
            .unwrap();
        file.close().unwrap();
        file.release().unwrap();

        let (timestamps, logtypes, vars) = file.read_columns().unwrap();

        // Timestamp column: deltas 100, 50
        let mut cursor = &timestamps[..];
        assert_eq!(decode_varint(&mut cursor).unwrap(), 100);
        assert_eq!(decode_varint(&mut cursor).unwrap(), 50);
        assert!(cursor.is_empty());

        // Log-type column: id 3 twice
        let mut cursor = &logtypes[..];
        assert_eq!(decode_varint_u64(&mut cursor).unwrap(), 3);
        assert_eq!(decode_varint_u64(&mut cursor).unwrap(), 3);
        assert!(cursor.is_empty());

        // Variable column: -4 then 8
        let mut cursor = &vars[..];
        assert_eq!(decode_varint(&mut cursor).unwrap(), -4);
        assert_eq!(decode_varint(&mut cursor).unwrap(), 8);
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_on_disk_file_streams_identical_columns() {
        let dir = TempDir::new().unwrap();

        let write_all = |file: &mut File| {
            file.write_message(Some(500), 1, &[EncodedVariable::Float(42)], 30)
                .unwrap();
            file.write_message(None, 0, &[], 5).unwrap();
            file.write_message(Some(750), 1, &[EncodedVariable::DictId(0)], 30)
                .unwrap();
            file.close().unwrap();
            file.release().unwrap();
        };

        let mut in_memory = in_memory_file(&dir);
        write_all(&mut in_memory);

        let mut on_disk = File::new_on_disk(
            Uuid::new_v4(),
            "logs/app.log".to_string(),
            0,
            Uuid::new_v4(),
            0,
            dir.path().to_path_buf(),
        )
        .unwrap();
        assert!(!on_disk.is_in_memory());
        write_all(&mut on_disk);

        assert_eq!(
            in_memory.read_columns().unwrap(),
            on_disk.read_columns().unwrap()
        );
        assert_eq!(in_memory.begin_ts(), on_disk.begin_ts());
        assert_eq!(in_memory.end_ts(), on_disk.end_ts());
    }

    #[test]
    fn test_lifecycle_enforcement() {
        let dir = TempDir::new().unwrap();
        let mut file = in_memory_file(&dir);

        // Release before close is rejected
        assert!(file.release().is_err());

        file.close().unwrap();
        assert!(file.write_message(Some(1), 0, &[], 1).is_err());
        assert!(file.close().is_err());

        file.release().unwrap();
        assert!(file.release().is_err());
    }

    #[test]
    fn test_scratch_files_removed_after_segment_insertion() {
        let dir = TempDir::new().unwrap();
        let mut file = in_memory_file(&dir);

        file.write_message(Some(1), 0, &[], 1).unwrap();
        file.close().unwrap();
        file.release().unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 3);

        file.remove_scratch_files().unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_metadata_row_carries_pattern_ranges() {
        let dir = TempDir::new().unwrap();
        let mut file = in_memory_file(&dir);

        let pattern = TimestampPattern::new(0, "%Y-%m-%d %H:%M:%S");
        file.change_ts_pattern(Some(&pattern));
        file.write_message(Some(1_422_752_523_000), 0, &[], 20)
            .unwrap();
        file.change_ts_pattern(None);
        file.write_message(None, 1, &[], 10).unwrap();

        let metadata = file.to_metadata(None).unwrap();
        let ranges: Vec<TimestampPatternRange> =
            serde_json::from_str(&metadata.ts_patterns).unwrap();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].message_ix, 0);
        assert_eq!(ranges[0].pattern.as_ref().unwrap(), &pattern);
        assert_eq!(ranges[1].message_ix, 1);
        assert!(ranges[1].pattern.is_none());
    }

    #[test]
    fn test_file_order_key_total_order() {
        let key = |group_id, end_ts, path: &str| FileOrderKey {
            group_id,
            end_ts,
            orig_path: path.to_string(),
            id: Uuid::nil(),
        };

        // Group id dominates, then end timestamp, then path
        assert!(key(0, 500, "z.log") < key(1, 100, "a.log"));
        assert!(key(1, 100, "z.log") < key(1, 200, "a.log"));
        assert!(key(1, 100, "a.log") < key(1, 100, "b.log"));
        // Timestamp-less files (MIN sentinel) sort first within a group
        assert!(key(0, NO_TIMESTAMP, "z.log") < key(0, 0, "a.log"));
    }
}
