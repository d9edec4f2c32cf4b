//! ugor: a small file storage service.
//!
//! Clients store, fetch, delete and search named blobs with attached
//! metadata. Reads honour cache validators, writes and deletes honour
//! optimistic-concurrency guards, and search runs structured filters over
//! the stored metadata.

pub mod config;
pub mod error;
pub mod files;
pub mod gateway;

pub use error::{FileError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
