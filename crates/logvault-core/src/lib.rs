//! LogVault Core
//!
//! Shared building blocks for the LogVault log-archival engine:
//!
//! - [`timestamp`]: the known-timestamp-pattern catalog, parsing a line's
//!   leading timestamp into epoch milliseconds and re-rendering it exactly
//! - [`variables`]: classifying message tokens into inline integers, packed
//!   floats, dictionary variables, and static text; building the log-type
//!   template for a message
//! - [`varint`]: the varint/ZigZag codec every encoded column uses
//! - [`error`]: the error type shared by these components
//!
//! The storage crate composes these into the archive writer; this crate has
//! no filesystem or database dependencies of its own.

pub mod error;
pub mod timestamp;
pub mod variables;
pub mod varint;

pub use error::{Error, Result};
pub use timestamp::{TimestampPattern, NO_TIMESTAMP};
