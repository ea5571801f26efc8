//! Metadata Error Types
//!
//! ## Error Categories
//!
//! - `Database`: SQLite operation failed (connection, query, transaction)
//! - `Serialization`: a JSON-typed column failed to encode or decode
//! - `InvalidUuid`: a stored id column does not hold a valid UUID
//! - `Duplicate`: an archive with the same id is already registered
//! - `NotFound`: a requested row does not exist
//!
//! All catalog operations return `Result<T>` aliased to
//! `Result<T, MetadataError>` so `?` propagation works throughout.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MetadataError>;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid UUID in catalog: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("Archive already registered: {0}")]
    Duplicate(String),

    #[error("Not found: {0}")]
    NotFound(String),
}
