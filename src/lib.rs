//! `tbarchive` — indexing and lookup for Thunderbird mail archives.
//!
//! This crate maintains a secondary SQLite index over a profile's mbox
//! folder tree and resolves message identifiers to fully parsed messages,
//! falling back to the client's own gloda database and to linear scans
//! when the index cannot answer.

pub mod archive;
pub mod config;
pub mod error;
pub mod gloda;
pub mod index;
pub mod mbox;
pub mod message;
pub mod resolve;
pub mod service;

pub use error::{ArchiveError, Result};
