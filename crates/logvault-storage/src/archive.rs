//! Archive Writer
//!
//! The [`Archive`] orchestrates the whole compression pipeline for one output
//! archive: it owns the two dictionaries, the per-file encoded streams, the
//! two open segments, and the archive-local metadata catalog.
//!
//! ## Write Flow
//!
//! ```text
//! create_*_file()
//!     ↓
//! write_msg()            ← encode one message, intern templates/variables
//!     ↓ (repeat)
//! close_file()
//!     ↓
//! release_*_file()       ← columns materialize to logs/ scratch files
//!     ↓
//! mark_file_ready_for_segment()
//!     ↓
//! (append to open segment, ordered)
//!     ↓ segment reaches target size
//! seal: flush dictionaries → compress → write → commit metadata
//! ```
//!
//! ## Two Open Segments
//!
//! Files route by whether they carry any timestamp: one open segment holds
//! timestamped files, the other holds timestamp-less ones. Separating them
//! keeps similar content adjacent for the codec and lets time-range queries
//! skip the timestamp-less segment entirely.
//!
//! ## Ordering
//!
//! Ready files wait in a set ordered by `(group_id, end_ts, path, id)` and
//! are appended to their segment in that order, so archives are reproducible
//! and grouped files decompress together.
//!
//! ## Atomicity
//!
//! Dictionaries are flushed *before* a segment's metadata commits, so every
//! dictionary id a committed segment references is already persisted. The
//! metadata transaction at seal time is the commit record; the archive's row
//! in the global catalog (written at `close`) is the commit record for the
//! archive as a whole. A crashed archive directory without that row is
//! simply discarded.
//!
//! ## Concurrency
//!
//! An `Archive` is single-writer. Producers parallelize by writing several
//! archives at once, one per task, which is why `creator_id + creation_num`
//! exist: they order one producer's archives so file splits reassemble
//! correctly.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use logvault_core::timestamp::{TimestampPattern, NO_TIMESTAMP};
use logvault_metadata::{
    ArchiveMetadata, ArchiveMetadataDb, FileMetadata, GlobalCatalog, SegmentMetadata,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ArchiveWriterConfig;
use crate::dictionary::DictionaryWriter;
use crate::encoder;
use crate::error::{Error, Result};
use crate::file::{File, FileOrderKey};
use crate::segment::{Compression, Segment};
use crate::{
    ARCHIVE_FORMAT_VERSION, ARCHIVE_METADATA_FILENAME, LOGS_DIR_NAME, LOGTYPE_DICT_FILENAME,
    LOGTYPE_INDEX_FILENAME, METADATA_DB_FILENAME, SEGMENTS_DIR_NAME, VAR_DICT_FILENAME,
    VAR_INDEX_FILENAME,
};

/// The archive-level `metadata` document written at close
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub version: u16,
    pub id: Uuid,
    pub creator_id: Uuid,
    pub creation_num: u64,
    pub begin_ts: i64,
    pub end_ts: i64,
    pub uncompressed_size: u64,
    pub size: u64,
    pub compression: Compression,
    pub compression_level: i32,
    pub storage_id: String,
}

/// An open segment plus the bookkeeping that travels with it
#[derive(Default)]
struct OpenSegment {
    segment: Segment,
    files: Vec<File>,
    logtype_ids: HashSet<u64>,
    var_ids: HashSet<u64>,
}

/// Writer for one archive directory
pub struct Archive {
    id: Uuid,
    creator_id: Uuid,
    creation_num: u64,
    storage_id: String,

    path: PathBuf,
    logs_dir: PathBuf,
    segments_dir: PathBuf,
    // Held open for the archive's lifetime so close() can fsync them
    logs_dir_handle: fs::File,
    segments_dir_handle: fs::File,

    logtype_dict: DictionaryWriter,
    var_dict: DictionaryWriter,
    metadata_db: ArchiveMetadataDb,
    global_catalog: Arc<dyn GlobalCatalog>,

    target_segment_uncompressed_size: u64,
    compression: Compression,
    compression_level: i32,

    next_segment_id: u64,
    mutable_files: HashMap<Uuid, File>,
    /// Released but with metadata not yet persisted and no segment assigned
    released_files: Vec<File>,
    /// Ready for a segment, in append order
    ready_files: BTreeMap<FileOrderKey, File>,

    segment_with_timestamps: OpenSegment,
    segment_without_timestamps: OpenSegment,

    begin_ts: i64,
    end_ts: i64,
    /// Sizes that can no longer change (sealed segments' contents)
    stable_uncompressed_size: u64,
    stable_size: u64,
    /// Original paths of every file committed to this archive
    file_paths: BTreeSet<String>,
}

impl Archive {
    /// Create the archive directory structure, open the dictionaries and the
    /// archive-local catalog. Fails with [`Error::DuplicateArchive`] if the
    /// directory already exists.
    pub async fn open(
        config: &ArchiveWriterConfig,
        global_catalog: Arc<dyn GlobalCatalog>,
    ) -> Result<Self> {
        let path = config.output_dir.join(config.id.to_string());
        if path.exists() {
            return Err(Error::DuplicateArchive(path.display().to_string()));
        }

        let logs_dir = path.join(LOGS_DIR_NAME);
        let segments_dir = path.join(SEGMENTS_DIR_NAME);
        fs::create_dir_all(&logs_dir)?;
        fs::create_dir_all(&segments_dir)?;
        let logs_dir_handle = fs::File::open(&logs_dir)?;
        let segments_dir_handle = fs::File::open(&segments_dir)?;

        let logtype_dict = DictionaryWriter::open(
            &path.join(LOGTYPE_DICT_FILENAME),
            &path.join(LOGTYPE_INDEX_FILENAME),
        )?;
        let var_dict =
            DictionaryWriter::open(&path.join(VAR_DICT_FILENAME), &path.join(VAR_INDEX_FILENAME))?;

        let metadata_db = ArchiveMetadataDb::open(path.join(METADATA_DB_FILENAME)).await?;

        info!(
            archive_id = %config.id,
            path = %path.display(),
            compression = ?config.compression,
            "opened archive for writing"
        );

        Ok(Self {
            id: config.id,
            creator_id: config.creator_id,
            creation_num: config.creation_num,
            storage_id: config.storage_id.clone(),
            path,
            logs_dir,
            segments_dir,
            logs_dir_handle,
            segments_dir_handle,
            logtype_dict,
            var_dict,
            metadata_db,
            global_catalog,
            target_segment_uncompressed_size: config.target_segment_uncompressed_size,
            compression: config.compression,
            compression_level: config.compression_level,
            next_segment_id: 0,
            mutable_files: HashMap::new(),
            released_files: Vec::new(),
            ready_files: BTreeMap::new(),
            segment_with_timestamps: OpenSegment::default(),
            segment_without_timestamps: OpenSegment::default(),
            begin_ts: NO_TIMESTAMP,
            end_ts: NO_TIMESTAMP,
            stable_uncompressed_size: 0,
            stable_size: 0,
            file_paths: BTreeSet::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn get_data_size_of_dictionaries(&self) -> u64 {
        self.logtype_dict.get_data_size() + self.var_dict.get_data_size()
    }

    /// Create a file whose columns buffer in memory until release
    pub fn create_in_memory_file(
        &mut self,
        orig_path: &str,
        group_id: u64,
        orig_file_id: Uuid,
        split_ix: u32,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let file = File::new_in_memory(
            id,
            orig_path.to_string(),
            group_id,
            orig_file_id,
            split_ix,
            self.logs_dir.clone(),
        );
        self.mutable_files.insert(id, file);
        id
    }

    /// Create a file whose columns stream to scratch files as it is written
    pub fn create_on_disk_file(
        &mut self,
        orig_path: &str,
        group_id: u64,
        orig_file_id: Uuid,
        split_ix: u32,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let file = File::new_on_disk(
            id,
            orig_path.to_string(),
            group_id,
            orig_file_id,
            split_ix,
            self.logs_dir.clone(),
        )?;
        self.mutable_files.insert(id, file);
        Ok(id)
    }

    fn mutable_file(&mut self, file_id: Uuid) -> Result<&mut File> {
        self.mutable_files
            .get_mut(&file_id)
            .ok_or(Error::FileNotTracked(file_id))
    }

    /// Record that subsequent messages of `file_id` use a different
    /// timestamp pattern (`None` for messages with no recognized timestamp)
    pub fn change_ts_pattern(
        &mut self,
        file_id: Uuid,
        pattern: Option<&TimestampPattern>,
    ) -> Result<()> {
        self.mutable_file(file_id)?.change_ts_pattern(pattern);
        Ok(())
    }

    /// Encode and append one message to the given file.
    ///
    /// `message` is the line content with the timestamp's byte range already
    /// removed; `timestamp` is the parsed epoch value (or `None` when the
    /// line carried no recognizable timestamp). `num_uncompressed_bytes` is
    /// the original line's full length.
    pub fn write_msg(
        &mut self,
        file_id: Uuid,
        timestamp: Option<i64>,
        message: &str,
        num_uncompressed_bytes: u64,
    ) -> Result<()> {
        let file = self
            .mutable_files
            .get_mut(&file_id)
            .ok_or(Error::FileNotTracked(file_id))?;

        let (logtype_id, variables) =
            encoder::encode_message(message, &mut self.logtype_dict, &mut self.var_dict);
        file.write_message(timestamp, logtype_id, &variables, num_uncompressed_bytes)
    }

    /// No more messages will be written to the file
    pub fn close_file(&mut self, file_id: Uuid) -> Result<()> {
        self.mutable_file(file_id)?.close()
    }

    pub fn is_file_open(&self, file_id: Uuid) -> bool {
        self.mutable_files.contains_key(&file_id)
    }

    /// Release an in-memory file: write its buffered columns to scratch
    /// files under `logs/` and stop tracking it as mutable
    pub fn release_and_write_in_memory_file_to_disk(&mut self, file_id: Uuid) -> Result<()> {
        if !self
            .mutable_files
            .get(&file_id)
            .ok_or(Error::FileNotTracked(file_id))?
            .is_in_memory()
        {
            return Err(Error::InvalidState(format!(
                "file {file_id} is not an in-memory file"
            )));
        }
        self.release_file(file_id)
    }

    /// Release an on-disk file: its columns already sit in `logs/`
    pub fn release_on_disk_file(&mut self, file_id: Uuid) -> Result<()> {
        if self
            .mutable_files
            .get(&file_id)
            .ok_or(Error::FileNotTracked(file_id))?
            .is_in_memory()
        {
            return Err(Error::InvalidState(format!(
                "file {file_id} is not an on-disk file"
            )));
        }
        self.release_file(file_id)
    }

    fn release_file(&mut self, file_id: Uuid) -> Result<()> {
        let mut file = self
            .mutable_files
            .remove(&file_id)
            .ok_or(Error::FileNotTracked(file_id))?;
        if let Err(e) = file.release() {
            // Put it back so the caller can close() it first
            self.mutable_files.insert(file_id, file);
            return Err(e);
        }
        self.released_files.push(file);
        Ok(())
    }

    /// Queue a released file for its segment and append everything eligible.
    /// Files with timestamps go to one open segment, files without to the
    /// other; a segment that reaches the target size is sealed here.
    pub async fn mark_file_ready_for_segment(&mut self, file_id: Uuid) -> Result<()> {
        let position = self
            .released_files
            .iter()
            .position(|file| file.id() == file_id)
            .ok_or(Error::FileNotTracked(file_id))?;
        let file = self.released_files.swap_remove(position);
        self.ready_files.insert(FileOrderKey::for_file(&file), file);

        self.append_ready_files().await
    }

    /// Record directories that contained no files, so decompression can
    /// recreate them
    pub async fn add_empty_directories(&self, paths: &[String]) -> Result<()> {
        self.metadata_db.add_empty_directories(paths).await?;
        Ok(())
    }

    /// Flush new dictionary entries and persist current metadata for every
    /// file that is released or sitting in an open segment
    pub async fn write_dir_snapshot(&mut self) -> Result<()> {
        self.logtype_dict.write_snapshot()?;
        self.var_dict.write_snapshot()?;

        let mut rows: Vec<FileMetadata> = Vec::new();
        for file in self
            .released_files
            .iter()
            .chain(self.segment_with_timestamps.files.iter())
            .chain(self.segment_without_timestamps.files.iter())
        {
            rows.push(file.to_metadata(None)?);
        }
        self.metadata_db.persist_file_metadata(&rows).await?;
        Ok(())
    }

    async fn append_ready_files(&mut self) -> Result<()> {
        while let Some((_, mut file)) = self.ready_files.pop_first() {
            let timestamped = file.has_timestamps();
            let (timestamps, logtypes, variables) = file.read_columns()?;

            let open = if timestamped {
                &mut self.segment_with_timestamps
            } else {
                &mut self.segment_without_timestamps
            };
            let timestamps_pos = open.segment.append(&timestamps);
            let logtypes_pos = open.segment.append(&logtypes);
            let variables_pos = open.segment.append(&variables);
            file.set_segment_positions(timestamps_pos, logtypes_pos, variables_pos);

            open.logtype_ids.extend(file.logtype_ids().iter().copied());
            open.var_ids.extend(file.var_ids().iter().copied());
            debug!(
                file_id = %file.id(),
                path = file.orig_path(),
                timestamped,
                "appended file to open segment"
            );
            open.files.push(file);

            if open.segment.uncompressed_size() >= self.target_segment_uncompressed_size {
                self.seal_segment(timestamped).await?;
            }
        }
        Ok(())
    }

    /// Seal one of the open segments: flush dictionaries, compress and write
    /// the segment file, then atomically commit the member files' metadata
    /// together with the segment's dictionary-id sets.
    async fn seal_segment(&mut self, timestamped: bool) -> Result<()> {
        let open = std::mem::take(if timestamped {
            &mut self.segment_with_timestamps
        } else {
            &mut self.segment_without_timestamps
        });
        if open.files.is_empty() && open.segment.is_empty() {
            return Ok(());
        }

        // Every id the segment references must be on disk before the
        // segment's metadata becomes visible
        self.logtype_dict.write_snapshot()?;
        self.var_dict.write_snapshot()?;

        let segment_id = self.next_segment_id;
        self.next_segment_id += 1;

        let sealed = open.segment.seal(
            segment_id,
            &self.segments_dir,
            self.compression,
            self.compression_level,
        )?;

        let rows: Vec<FileMetadata> = open
            .files
            .iter()
            .map(|file| file.to_metadata(Some(segment_id)))
            .collect::<Result<_>>()?;

        let mut logtype_ids: Vec<u64> = open.logtype_ids.into_iter().collect();
        logtype_ids.sort_unstable();
        let mut var_ids: Vec<u64> = open.var_ids.into_iter().collect();
        var_ids.sort_unstable();

        self.metadata_db
            .commit_segment(
                &SegmentMetadata {
                    id: segment_id,
                    compressed_size: sealed.compressed_size,
                    uncompressed_size: sealed.uncompressed_size,
                    logtype_ids,
                    var_ids,
                },
                &rows,
            )
            .await?;

        for file in &open.files {
            file.remove_scratch_files()?;
            self.file_paths.insert(file.orig_path().to_string());
            self.stable_uncompressed_size += file.num_uncompressed_bytes();
            if file.has_timestamps() {
                if self.begin_ts == NO_TIMESTAMP || file.begin_ts() < self.begin_ts {
                    self.begin_ts = file.begin_ts();
                }
                if self.end_ts == NO_TIMESTAMP || file.end_ts() > self.end_ts {
                    self.end_ts = file.end_ts();
                }
            }
        }
        self.stable_size += sealed.compressed_size;

        info!(
            archive_id = %self.id,
            segment_id,
            timestamped,
            num_files = open.files.len(),
            compressed_size = sealed.compressed_size,
            uncompressed_size = sealed.uncompressed_size,
            "sealed segment"
        );
        Ok(())
    }

    /// Seal both open segments (even under target), flush the dictionaries,
    /// write the archive manifest, and register the archive in the global
    /// catalog. The catalog row is the archive's commit record.
    ///
    /// Any file still open is an error; released files that were never
    /// marked ready are appended here so their data is not lost.
    pub async fn close(mut self) -> Result<()> {
        if !self.mutable_files.is_empty() {
            return Err(Error::InvalidState(format!(
                "cannot close archive {} with {} files still open",
                self.id,
                self.mutable_files.len()
            )));
        }

        for file in std::mem::take(&mut self.released_files) {
            self.ready_files.insert(FileOrderKey::for_file(&file), file);
        }
        self.append_ready_files().await?;
        self.seal_segment(true).await?;
        self.seal_segment(false).await?;

        let dictionary_size = self.get_data_size_of_dictionaries();
        let Archive {
            id,
            creator_id,
            creation_num,
            storage_id,
            path,
            logs_dir,
            logs_dir_handle,
            segments_dir_handle,
            logtype_dict,
            var_dict,
            metadata_db,
            global_catalog,
            begin_ts,
            end_ts,
            stable_uncompressed_size,
            stable_size,
            file_paths,
            compression,
            compression_level,
            ..
        } = self;

        logtype_dict.close()?;
        var_dict.close()?;

        let manifest = ArchiveManifest {
            version: ARCHIVE_FORMAT_VERSION,
            id,
            creator_id,
            creation_num,
            begin_ts,
            end_ts,
            uncompressed_size: stable_uncompressed_size,
            size: stable_size + dictionary_size,
            compression,
            compression_level,
            storage_id: storage_id.clone(),
        };
        let manifest_file = fs::File::create(path.join(ARCHIVE_METADATA_FILENAME))?;
        serde_json::to_writer_pretty(&manifest_file, &manifest)?;
        manifest_file.sync_all()?;

        global_catalog
            .add_archive(
                &ArchiveMetadata {
                    id,
                    begin_ts,
                    end_ts,
                    uncompressed_size: manifest.uncompressed_size,
                    size: manifest.size,
                    creator_id,
                    creation_num,
                    storage_id,
                },
                &file_paths.into_iter().collect::<Vec<_>>(),
            )
            .await?;

        metadata_db.close().await;

        // Scratch data all lives in segments now
        drop(logs_dir_handle);
        fs::remove_dir_all(&logs_dir)?;

        segments_dir_handle.sync_all()?;
        fs::File::open(&path)?.sync_all()?;

        info!(
            archive_id = %id,
            uncompressed_size = manifest.uncompressed_size,
            size = manifest.size,
            "closed archive"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logvault_metadata::SqliteGlobalCatalog;
    use tempfile::TempDir;

    async fn open_archive(root: &TempDir) -> (Archive, Arc<SqliteGlobalCatalog>) {
        let catalog = Arc::new(SqliteGlobalCatalog::open_in_memory().await.unwrap());
        let config = ArchiveWriterConfig {
            compression: Compression::Zstd,
            ..ArchiveWriterConfig::new(root.path())
        };
        let archive = Archive::open(&config, catalog.clone()).await.unwrap();
        (archive, catalog)
    }

    #[tokio::test]
    async fn test_open_creates_directory_structure() {
        let root = TempDir::new().unwrap();
        let (archive, _catalog) = open_archive(&root).await;

        let path = archive.path().to_path_buf();
        assert!(path.join(LOGS_DIR_NAME).is_dir());
        assert!(path.join(SEGMENTS_DIR_NAME).is_dir());
        assert!(path.join(LOGTYPE_DICT_FILENAME).is_file());
        assert!(path.join(VAR_DICT_FILENAME).is_file());
        assert!(path.join(METADATA_DB_FILENAME).is_file());
    }

    #[tokio::test]
    async fn test_duplicate_archive_rejected() {
        let root = TempDir::new().unwrap();
        let catalog = Arc::new(SqliteGlobalCatalog::open_in_memory().await.unwrap());
        let config = ArchiveWriterConfig::new(root.path());

        let _first = Archive::open(&config, catalog.clone()).await.unwrap();
        let second = Archive::open(&config, catalog).await;
        assert!(matches!(second, Err(Error::DuplicateArchive(_))));
    }

    #[tokio::test]
    async fn test_close_rejected_while_files_open() {
        let root = TempDir::new().unwrap();
        let (mut archive, _catalog) = open_archive(&root).await;

        archive.create_in_memory_file("a.log", 0, Uuid::new_v4(), 0);
        assert!(matches!(
            archive.close().await,
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_release_requires_matching_storage_mode() {
        let root = TempDir::new().unwrap();
        let (mut archive, _catalog) = open_archive(&root).await;

        let in_memory = archive.create_in_memory_file("a.log", 0, Uuid::new_v4(), 0);
        let on_disk = archive
            .create_on_disk_file("b.log", 0, Uuid::new_v4(), 0)
            .unwrap();
        archive.close_file(in_memory).unwrap();
        archive.close_file(on_disk).unwrap();

        assert!(archive.release_on_disk_file(in_memory).is_err());
        assert!(archive
            .release_and_write_in_memory_file_to_disk(on_disk)
            .is_err());

        archive
            .release_and_write_in_memory_file_to_disk(in_memory)
            .unwrap();
        archive.release_on_disk_file(on_disk).unwrap();
    }

    #[tokio::test]
    async fn test_segment_routing_by_timestamp_presence() {
        let root = TempDir::new().unwrap();
        let (mut archive, _catalog) = open_archive(&root).await;
        let path = archive.path().to_path_buf();

        let with_ts = archive.create_in_memory_file("ts.log", 0, Uuid::new_v4(), 0);
        archive
            .write_msg(with_ts, Some(1_000), " has a timestamp\n", 30)
            .unwrap();
        archive.close_file(with_ts).unwrap();
        archive
            .release_and_write_in_memory_file_to_disk(with_ts)
            .unwrap();
        archive.mark_file_ready_for_segment(with_ts).await.unwrap();

        let without_ts = archive.create_in_memory_file("nots.log", 0, Uuid::new_v4(), 0);
        archive
            .write_msg(without_ts, None, "no timestamp here\n", 18)
            .unwrap();
        archive.close_file(without_ts).unwrap();
        archive
            .release_and_write_in_memory_file_to_disk(without_ts)
            .unwrap();
        archive
            .mark_file_ready_for_segment(without_ts)
            .await
            .unwrap();

        archive.close().await.unwrap();

        // Two segments sealed: the timestamped one first
        let db = ArchiveMetadataDb::open(path.join(METADATA_DB_FILENAME))
            .await
            .unwrap();
        let files = db.list_files().await.unwrap();
        assert_eq!(files.len(), 2);
        let ts_file = files.iter().find(|f| f.path == "ts.log").unwrap();
        let no_ts_file = files.iter().find(|f| f.path == "nots.log").unwrap();
        assert_eq!(ts_file.segment_id, Some(0));
        assert_eq!(no_ts_file.segment_id, Some(1));
        assert_ne!(ts_file.begin_ts, NO_TIMESTAMP);
        assert_eq!(no_ts_file.begin_ts, NO_TIMESTAMP);
    }

    #[tokio::test]
    async fn test_close_registers_archive_in_global_catalog() {
        let root = TempDir::new().unwrap();
        let (mut archive, catalog) = open_archive(&root).await;
        let archive_id = archive.id();

        let file = archive.create_in_memory_file("app.log", 0, Uuid::new_v4(), 0);
        archive
            .write_msg(file, Some(5_000), " message one\n", 25)
            .unwrap();
        archive.close_file(file).unwrap();
        archive
            .release_and_write_in_memory_file_to_disk(file)
            .unwrap();
        archive.mark_file_ready_for_segment(file).await.unwrap();
        archive.close().await.unwrap();

        let ids = catalog.archive_ids_for_file_path("app.log").await.unwrap();
        assert_eq!(ids, vec![archive_id]);
    }

    #[tokio::test]
    async fn test_close_removes_logs_dir_and_writes_manifest() {
        let root = TempDir::new().unwrap();
        let (mut archive, _catalog) = open_archive(&root).await;
        let path = archive.path().to_path_buf();

        let file = archive.create_in_memory_file("app.log", 0, Uuid::new_v4(), 0);
        archive
            .write_msg(file, Some(1_422_752_523_000), " started\n", 32)
            .unwrap();
        archive.close_file(file).unwrap();
        archive
            .release_and_write_in_memory_file_to_disk(file)
            .unwrap();
        archive.mark_file_ready_for_segment(file).await.unwrap();
        archive.close().await.unwrap();

        assert!(!path.join(LOGS_DIR_NAME).exists());

        let manifest: ArchiveManifest =
            serde_json::from_slice(&fs::read(path.join(ARCHIVE_METADATA_FILENAME)).unwrap())
                .unwrap();
        assert_eq!(manifest.version, ARCHIVE_FORMAT_VERSION);
        assert_eq!(manifest.compression, Compression::Zstd);
        assert_eq!(manifest.begin_ts, 1_422_752_523_000);
        assert_eq!(manifest.end_ts, 1_422_752_523_000);
        assert_eq!(manifest.uncompressed_size, 32);
        assert!(manifest.size > 0);
    }

    #[tokio::test]
    async fn test_small_target_seals_multiple_segments() {
        let root = TempDir::new().unwrap();
        let catalog = Arc::new(SqliteGlobalCatalog::open_in_memory().await.unwrap());
        // Each file's columns total ~40 bytes, so every append crosses the
        // target and seals a segment of its own
        let config = ArchiveWriterConfig {
            target_segment_uncompressed_size: 32,
            compression: Compression::None,
            ..ArchiveWriterConfig::new(root.path())
        };
        let mut archive = Archive::open(&config, catalog).await.unwrap();
        let path = archive.path().to_path_buf();

        for i in 0..4 {
            let file =
                archive.create_in_memory_file(&format!("f{i}.log"), 0, Uuid::new_v4(), 0);
            for ts in 0..20 {
                archive
                    .write_msg(file, Some(ts), " repeated message body here\n", 40)
                    .unwrap();
            }
            archive.close_file(file).unwrap();
            archive
                .release_and_write_in_memory_file_to_disk(file)
                .unwrap();
            archive.mark_file_ready_for_segment(file).await.unwrap();
        }
        archive.close().await.unwrap();

        let segment_count = fs::read_dir(path.join(SEGMENTS_DIR_NAME)).unwrap().count();
        assert_eq!(segment_count, 4);

        // Segment ids are dense and assigned in sealing order
        let db = ArchiveMetadataDb::open(path.join(METADATA_DB_FILENAME))
            .await
            .unwrap();
        for id in 0..segment_count as u64 {
            db.get_segment(id).await.unwrap();
        }
    }
}
