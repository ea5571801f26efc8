//! Archive-Local Metadata Store
//!
//! Every archive directory carries a `metadata.db` SQLite file describing its
//! contents: one row per file split, one row per sealed segment, and the
//! empty directories recorded at ingestion so the reader can recreate them.
//!
//! ## Why SQLite?
//!
//! The archive is a self-contained directory; an embedded database keeps it
//! that way. SQLite gives ACID transactions for the seal-time metadata
//! commits without any external service, and readers can open the catalog
//! directly off a copied archive.
//!
//! ## Write Pattern
//!
//! Metadata writes are batched: file rows are persisted in bulk inside one
//! transaction when their segment seals (or at a directory snapshot), using
//! `REPLACE` so a snapshot row is superseded by the seal-time row. The
//! metadata commit is the archive's atomicity point; a crash before it
//! leaves no visible trace of the segment.
//!
//! ## Concurrency
//!
//! One archive has one writer, so the pool holds a single connection. This
//! also makes `sqlite::memory:` usable as-is in tests.

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use crate::error::{MetadataError, Result};
use crate::types::{FileMetadata, SegmentMetadata};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS files (
        id TEXT PRIMARY KEY,
        orig_file_id TEXT NOT NULL,
        path TEXT NOT NULL,
        group_id INTEGER NOT NULL,
        split_ix INTEGER NOT NULL,
        begin_ts INTEGER NOT NULL,
        end_ts INTEGER NOT NULL,
        num_uncompressed_bytes INTEGER NOT NULL,
        num_messages INTEGER NOT NULL,
        num_variables INTEGER NOT NULL,
        segment_id INTEGER,
        segment_timestamps_pos INTEGER,
        segment_logtypes_pos INTEGER,
        segment_variables_pos INTEGER,
        ts_patterns TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS files_path ON files (path, split_ix)",
    "CREATE INDEX IF NOT EXISTS files_segment ON files (segment_id)",
    "CREATE TABLE IF NOT EXISTS segments (
        id INTEGER PRIMARY KEY,
        compressed_size INTEGER NOT NULL,
        uncompressed_size INTEGER NOT NULL,
        logtype_ids TEXT NOT NULL,
        var_ids TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS empty_directories (
        path TEXT PRIMARY KEY
    )",
];

/// SQLite-backed catalog for a single archive
pub struct ArchiveMetadataDb {
    pool: SqlitePool,
}

impl ArchiveMetadataDb {
    /// Open (creating if missing) the catalog at `path` and ensure the schema
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let options =
            SqliteConnectOptions::from_str(&format!("sqlite://{}", path.as_ref().display()))?
                .create_if_missing(true);

        // Single writer per archive; one connection keeps transactions simple
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory catalog (for testing)
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(pool).await?;
        }
        Ok(())
    }

    /// Persist (or supersede) the given file rows in one transaction
    pub async fn persist_file_metadata(&self, files: &[FileMetadata]) -> Result<()> {
        if files.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for file in files {
            upsert_file(&mut tx, file).await?;
        }
        tx.commit().await?;

        debug!(count = files.len(), "persisted file metadata");
        Ok(())
    }

    /// Atomically record a sealed segment together with the final rows of
    /// every file that joined it. This transaction is the seal's commit
    /// point: either the segment and all its files become visible, or none
    /// of them do.
    pub async fn commit_segment(
        &self,
        segment: &SegmentMetadata,
        files: &[FileMetadata],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        upsert_segment(&mut tx, segment).await?;
        for file in files {
            upsert_file(&mut tx, file).await?;
        }
        tx.commit().await?;

        debug!(
            segment_id = segment.id,
            num_files = files.len(),
            "committed sealed segment metadata"
        );
        Ok(())
    }

    /// All file splits, ordered for split reassembly (path, then split index)
    pub async fn list_files(&self) -> Result<Vec<FileMetadata>> {
        let rows = sqlx::query("SELECT * FROM files ORDER BY path, split_ix")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::file_from_row).collect()
    }

    /// File splits with the given original path, ordered by split index
    pub async fn files_for_path(&self, path: &str) -> Result<Vec<FileMetadata>> {
        let rows = sqlx::query("SELECT * FROM files WHERE path = ? ORDER BY split_ix")
            .bind(path)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::file_from_row).collect()
    }

    fn file_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<FileMetadata> {
        Ok(FileMetadata {
            id: Uuid::parse_str(row.try_get("id")?)?,
            orig_file_id: Uuid::parse_str(row.try_get("orig_file_id")?)?,
            path: row.try_get("path")?,
            group_id: row.try_get::<i64, _>("group_id")? as u64,
            split_ix: row.try_get::<i64, _>("split_ix")? as u32,
            begin_ts: row.try_get("begin_ts")?,
            end_ts: row.try_get("end_ts")?,
            num_uncompressed_bytes: row.try_get::<i64, _>("num_uncompressed_bytes")? as u64,
            num_messages: row.try_get::<i64, _>("num_messages")? as u64,
            num_variables: row.try_get::<i64, _>("num_variables")? as u64,
            segment_id: row.try_get::<Option<i64>, _>("segment_id")?.map(|v| v as u64),
            segment_timestamps_pos: row
                .try_get::<Option<i64>, _>("segment_timestamps_pos")?
                .map(|v| v as u64),
            segment_logtypes_pos: row
                .try_get::<Option<i64>, _>("segment_logtypes_pos")?
                .map(|v| v as u64),
            segment_variables_pos: row
                .try_get::<Option<i64>, _>("segment_variables_pos")?
                .map(|v| v as u64),
            ts_patterns: row.try_get("ts_patterns")?,
        })
    }

    /// Record a sealed segment's sizes and dictionary-id sets
    pub async fn add_segment(&self, segment: &SegmentMetadata) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        upsert_segment(&mut tx, segment).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_segment(&self, id: u64) -> Result<SegmentMetadata> {
        let row = sqlx::query("SELECT * FROM segments WHERE id = ?")
            .bind(id as i64)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("segment {id}")))?;

        Ok(SegmentMetadata {
            id: row.try_get::<i64, _>("id")? as u64,
            compressed_size: row.try_get::<i64, _>("compressed_size")? as u64,
            uncompressed_size: row.try_get::<i64, _>("uncompressed_size")? as u64,
            logtype_ids: serde_json::from_str(row.try_get("logtype_ids")?)?,
            var_ids: serde_json::from_str(row.try_get("var_ids")?)?,
        })
    }

    /// Record directories that contained no files
    pub async fn add_empty_directories(&self, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for path in paths {
            sqlx::query("INSERT OR IGNORE INTO empty_directories (path) VALUES (?)")
                .bind(path)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn list_empty_directories(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT path FROM empty_directories ORDER BY path")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| Ok(row.try_get("path")?))
            .collect()
    }

    /// Flush and release the catalog connection
    pub async fn close(self) {
        self.pool.close().await;
    }
}

async fn upsert_file(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    file: &FileMetadata,
) -> Result<()> {
    sqlx::query(
        "REPLACE INTO files (
            id, orig_file_id, path, group_id, split_ix,
            begin_ts, end_ts, num_uncompressed_bytes, num_messages, num_variables,
            segment_id, segment_timestamps_pos, segment_logtypes_pos,
            segment_variables_pos, ts_patterns
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(file.id.to_string())
    .bind(file.orig_file_id.to_string())
    .bind(&file.path)
    .bind(file.group_id as i64)
    .bind(i64::from(file.split_ix))
    .bind(file.begin_ts)
    .bind(file.end_ts)
    .bind(file.num_uncompressed_bytes as i64)
    .bind(file.num_messages as i64)
    .bind(file.num_variables as i64)
    .bind(file.segment_id.map(|v| v as i64))
    .bind(file.segment_timestamps_pos.map(|v| v as i64))
    .bind(file.segment_logtypes_pos.map(|v| v as i64))
    .bind(file.segment_variables_pos.map(|v| v as i64))
    .bind(&file.ts_patterns)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_segment(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    segment: &SegmentMetadata,
) -> Result<()> {
    sqlx::query(
        "REPLACE INTO segments (id, compressed_size, uncompressed_size, logtype_ids, var_ids)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(segment.id as i64)
    .bind(segment.compressed_size as i64)
    .bind(segment.uncompressed_size as i64)
    .bind(serde_json::to_string(&segment.logtype_ids)?)
    .bind(serde_json::to_string(&segment.var_ids)?)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file(path: &str, split_ix: u32) -> FileMetadata {
        FileMetadata {
            id: Uuid::new_v4(),
            orig_file_id: Uuid::new_v4(),
            path: path.to_string(),
            group_id: 0,
            split_ix,
            begin_ts: 1_422_752_523_000,
            end_ts: 1_422_752_523_004,
            num_uncompressed_bytes: 1024,
            num_messages: 12,
            num_variables: 30,
            segment_id: None,
            segment_timestamps_pos: None,
            segment_logtypes_pos: None,
            segment_variables_pos: None,
            ts_patterns: "[]".to_string(),
        }
    }

    #[tokio::test]
    async fn test_persist_and_list_files() {
        let db = ArchiveMetadataDb::open_in_memory().await.unwrap();

        let files = vec![sample_file("b.log", 0), sample_file("a.log", 0)];
        db.persist_file_metadata(&files).await.unwrap();

        let listed = db.list_files().await.unwrap();
        assert_eq!(listed.len(), 2);
        // Ordered by path
        assert_eq!(listed[0].path, "a.log");
        assert_eq!(listed[1].path, "b.log");
        assert_eq!(listed[1], files[0]);
    }

    #[tokio::test]
    async fn test_replace_supersedes_snapshot_row() {
        let db = ArchiveMetadataDb::open_in_memory().await.unwrap();

        let mut file = sample_file("a.log", 0);
        db.persist_file_metadata(std::slice::from_ref(&file))
            .await
            .unwrap();

        // Seal-time row carries segment placement
        file.segment_id = Some(3);
        file.segment_timestamps_pos = Some(0);
        file.segment_logtypes_pos = Some(100);
        file.segment_variables_pos = Some(200);
        db.persist_file_metadata(std::slice::from_ref(&file))
            .await
            .unwrap();

        let listed = db.list_files().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].segment_id, Some(3));
        assert_eq!(listed[0].segment_variables_pos, Some(200));
    }

    #[tokio::test]
    async fn test_files_for_path_orders_splits() {
        let db = ArchiveMetadataDb::open_in_memory().await.unwrap();

        let files = vec![
            sample_file("app.log", 1),
            sample_file("app.log", 0),
            sample_file("other.log", 0),
        ];
        db.persist_file_metadata(&files).await.unwrap();

        let splits = db.files_for_path("app.log").await.unwrap();
        assert_eq!(splits.len(), 2);
        assert_eq!(splits[0].split_ix, 0);
        assert_eq!(splits[1].split_ix, 1);
    }

    #[tokio::test]
    async fn test_segment_round_trip() {
        let db = ArchiveMetadataDb::open_in_memory().await.unwrap();

        let segment = SegmentMetadata {
            id: 0,
            compressed_size: 512,
            uncompressed_size: 4096,
            logtype_ids: vec![0, 1, 2],
            var_ids: vec![0, 5],
        };
        db.add_segment(&segment).await.unwrap();

        let fetched = db.get_segment(0).await.unwrap();
        assert_eq!(fetched, segment);

        assert!(matches!(
            db.get_segment(9).await,
            Err(MetadataError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_commit_segment_writes_segment_and_files_together() {
        let db = ArchiveMetadataDb::open_in_memory().await.unwrap();

        let mut file = sample_file("a.log", 0);
        file.segment_id = Some(0);
        file.segment_timestamps_pos = Some(0);
        file.segment_logtypes_pos = Some(10);
        file.segment_variables_pos = Some(20);
        let segment = SegmentMetadata {
            id: 0,
            compressed_size: 100,
            uncompressed_size: 30,
            logtype_ids: vec![0],
            var_ids: vec![],
        };

        db.commit_segment(&segment, std::slice::from_ref(&file))
            .await
            .unwrap();

        assert_eq!(db.get_segment(0).await.unwrap(), segment);
        let listed = db.list_files().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].segment_id, Some(0));
    }

    #[tokio::test]
    async fn test_empty_directories() {
        let db = ArchiveMetadataDb::open_in_memory().await.unwrap();

        db.add_empty_directories(&["logs/empty".to_string(), "logs/also".to_string()])
            .await
            .unwrap();
        // Duplicate insert is ignored
        db.add_empty_directories(&["logs/empty".to_string()])
            .await
            .unwrap();

        let dirs = db.list_empty_directories().await.unwrap();
        assert_eq!(dirs, vec!["logs/also".to_string(), "logs/empty".to_string()]);
    }

    #[tokio::test]
    async fn test_no_timestamp_sentinel_survives() {
        let db = ArchiveMetadataDb::open_in_memory().await.unwrap();

        let mut file = sample_file("no_ts.log", 0);
        file.begin_ts = i64::MIN;
        file.end_ts = i64::MIN;
        db.persist_file_metadata(std::slice::from_ref(&file))
            .await
            .unwrap();

        let listed = db.list_files().await.unwrap();
        assert_eq!(listed[0].begin_ts, i64::MIN);
        assert_eq!(listed[0].end_ts, i64::MIN);
    }
}
