//! Error Types for LogVault Core
//!
//! This module defines the error type shared by the core encoding components.
//!
//! ## Error Categories
//!
//! ### Lifecycle Errors
//! - `NotInit`: An operation was attempted on a component that has not been
//!   opened or initialized
//!
//! ### Encoding Errors
//! - `Unsupported`: Unknown timestamp format specifier or codec id
//! - `Failure`: An operation could not be carried out with the given inputs
//!   (e.g. reformatting a timestamp into a message with too few spaces)
//!
//! ### Data Integrity Errors
//! - `Corrupt`: Decoded data is inconsistent (bad magic, truncated stream,
//!   dangling dictionary reference)
//! - `VarintOverflow`: A varint ran past 64 bits while decoding
//!
//! ## Usage
//! All fallible functions in this crate return `Result<T>` which is aliased
//! to `Result<T, Error>`, so `?` propagation works throughout.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Component not initialized")]
    NotInit,

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Operation failed: {0}")]
    Failure(String),

    #[error("Corrupt data: {0}")]
    Corrupt(String),

    #[error("Varint overflows a 64-bit value")]
    VarintOverflow,
}

pub type Result<T> = std::result::Result<T, Error>;
