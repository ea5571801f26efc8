//! LogVault Metadata Catalogs
//!
//! Two SQLite-backed catalogs track where everything lives:
//!
//! - **Archive-local** ([`ArchiveMetadataDb`]): inside each archive
//!   directory, one `metadata.db` describing the archive's file splits,
//!   sealed segments, and recorded empty directories. This is what a reader
//!   opens to decompress the archive.
//! - **Global** ([`GlobalCatalog`] / [`SqliteGlobalCatalog`]): one
//!   `metadata.db` at the archives root mapping original file paths to the
//!   archives holding their splits, ordered by producer
//!   (`creator_id`, `creation_num`) so splits reassemble correctly.
//!
//! The writer touches the global catalog exactly once per archive, at close;
//! the archive-local catalog is written in bulk transactions whenever a
//! segment seals. The seal-time transaction is the archive's commit record:
//! a crash before it leaves the segment invisible.

pub mod error;
pub mod global;
pub mod store;
pub mod types;

pub use error::{MetadataError, Result};
pub use global::{GlobalCatalog, SqliteGlobalCatalog};
pub use store::ArchiveMetadataDb;
pub use types::{ArchiveMetadata, FileMetadata, SegmentMetadata};
