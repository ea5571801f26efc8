//! Global Archive Catalog
//!
//! While each archive carries its own `metadata.db`, the archives *root*
//! directory carries one more SQLite file indexing every archive written
//! beneath it. This is what turns "decompress /var/log/app.log" into a
//! targeted operation: the catalog maps an original file path to the
//! archive(s) holding its splits, ordered so the splits reassemble correctly.
//!
//! ## Access Pattern
//!
//! The global catalog is shared across archives but touched only at archive
//! close: one `add_archive` call registers the archive row and its file
//! paths in a single transaction. Readers query it by path or enumerate all
//! archives.
//!
//! ## The Trait Seam
//!
//! The archive writer talks to [`GlobalCatalog`], not to SQLite. A deployment
//! that tracks archives elsewhere (an object store inventory, a service)
//! implements the same trait.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use crate::error::{MetadataError, Result};
use crate::types::ArchiveMetadata;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS archives (
        id TEXT PRIMARY KEY,
        begin_ts INTEGER NOT NULL,
        end_ts INTEGER NOT NULL,
        uncompressed_size INTEGER NOT NULL,
        size INTEGER NOT NULL,
        creator_id TEXT NOT NULL,
        creation_num INTEGER NOT NULL,
        storage_id TEXT NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS archives_creation
         ON archives (creator_id, creation_num)",
    "CREATE TABLE IF NOT EXISTS archive_files (
        path TEXT NOT NULL,
        archive_id TEXT NOT NULL,
        PRIMARY KEY (path, archive_id)
    )",
];

/// Cross-archive catalog the writer registers into at close
#[async_trait]
pub trait GlobalCatalog: Send + Sync {
    /// Register a closed archive and the original paths of its files
    async fn add_archive(&self, archive: &ArchiveMetadata, file_paths: &[String]) -> Result<()>;

    /// Ids of the archives holding splits of `path`, in producer order
    /// (`creator_id`, then `creation_num`)
    async fn archive_ids_for_file_path(&self, path: &str) -> Result<Vec<Uuid>>;

    /// All registered archive ids, in producer order
    async fn list_archive_ids(&self) -> Result<Vec<Uuid>>;
}

/// SQLite implementation of [`GlobalCatalog`]
pub struct SqliteGlobalCatalog {
    pool: SqlitePool,
}

impl SqliteGlobalCatalog {
    /// Open (creating if missing) the catalog at `path` and ensure the schema
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let options =
            SqliteConnectOptions::from_str(&format!("sqlite://{}", path.as_ref().display()))?
                .create_if_missing(true);

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

    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl GlobalCatalog for SqliteGlobalCatalog {
    async fn add_archive(&self, archive: &ArchiveMetadata, file_paths: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO archives (
                id, begin_ts, end_ts, uncompressed_size, size,
                creator_id, creation_num, storage_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(archive.id.to_string())
        .bind(archive.begin_ts)
        .bind(archive.end_ts)
        .bind(archive.uncompressed_size as i64)
        .bind(archive.size as i64)
        .bind(archive.creator_id.to_string())
        .bind(archive.creation_num as i64)
        .bind(&archive.storage_id)
        .execute(&mut *tx)
        .await;

        if let Err(e) = result {
            if e.to_string().contains("UNIQUE constraint failed") {
                return Err(MetadataError::Duplicate(archive.id.to_string()));
            }
            return Err(e.into());
        }

        for path in file_paths {
            sqlx::query("INSERT OR IGNORE INTO archive_files (path, archive_id) VALUES (?, ?)")
                .bind(path)
                .bind(archive.id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        info!(
            archive_id = %archive.id,
            num_files = file_paths.len(),
            "registered archive in global catalog"
        );
        Ok(())
    }

    async fn archive_ids_for_file_path(&self, path: &str) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            "SELECT a.id AS id
             FROM archives a
             JOIN archive_files f ON f.archive_id = a.id
             WHERE f.path = ?
             ORDER BY a.creator_id, a.creation_num",
        )
        .bind(path)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok(Uuid::parse_str(row.try_get("id")?)?))
            .collect()
    }

    async fn list_archive_ids(&self) -> Result<Vec<Uuid>> {
        let rows = sqlx::query("SELECT id FROM archives ORDER BY creator_id, creation_num")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| Ok(Uuid::parse_str(row.try_get("id")?)?))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_archive(creation_num: u64) -> ArchiveMetadata {
        ArchiveMetadata {
            id: Uuid::new_v4(),
            begin_ts: 1_000,
            end_ts: 2_000,
            uncompressed_size: 1 << 20,
            size: 1 << 16,
            creator_id: Uuid::nil(),
            creation_num,
            storage_id: "local".to_string(),
        }
    }

    #[tokio::test]
    async fn test_register_and_lookup_by_path() {
        let catalog = SqliteGlobalCatalog::open_in_memory().await.unwrap();

        let first = sample_archive(0);
        let second = sample_archive(1);
        catalog
            .add_archive(&first, &["app.log".to_string(), "sys.log".to_string()])
            .await
            .unwrap();
        catalog
            .add_archive(&second, &["app.log".to_string()])
            .await
            .unwrap();

        // A split file appears in both archives, in producer order
        let ids = catalog.archive_ids_for_file_path("app.log").await.unwrap();
        assert_eq!(ids, vec![first.id, second.id]);

        let ids = catalog.archive_ids_for_file_path("sys.log").await.unwrap();
        assert_eq!(ids, vec![first.id]);

        assert!(catalog
            .archive_ids_for_file_path("missing.log")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_archive_id_rejected() {
        let catalog = SqliteGlobalCatalog::open_in_memory().await.unwrap();

        let archive = sample_archive(0);
        catalog.add_archive(&archive, &[]).await.unwrap();

        let result = catalog.add_archive(&archive, &[]).await;
        assert!(matches!(result, Err(MetadataError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_list_archives_in_producer_order() {
        let catalog = SqliteGlobalCatalog::open_in_memory().await.unwrap();

        let a2 = sample_archive(2);
        let a0 = sample_archive(0);
        let a1 = sample_archive(1);
        for archive in [&a2, &a0, &a1] {
            catalog.add_archive(archive, &[]).await.unwrap();
        }

        let ids = catalog.list_archive_ids().await.unwrap();
        assert_eq!(ids, vec![a0.id, a1.id, a2.id]);
    }
}
