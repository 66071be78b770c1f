//! Centralized error types for tbarchive.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the tbarchive library.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// I/O error with the associated file path.
    #[error("I/O error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A requested mailbox file, ordinal, or message id does not exist
    /// in any consulted source.
    #[error("not found: {0}")]
    NotFound(String),

    /// The path is not a regular mailbox file.
    #[error("mailbox file not found: {0}")]
    MailboxNotFound(PathBuf),

    /// Bytes at a given offset, or a whole mailbox file, do not parse
    /// as mail content.
    #[error("format error in '{path}': {reason}")]
    Format { path: PathBuf, reason: String },

    /// Header or body content could not be decoded under any attempted
    /// character set (raised in strict mode only).
    #[error("decode error: {0}")]
    Decode(String),

    /// The secondary index or gloda catalog could not be opened or queried.
    #[error("store error for '{path}': {source}")]
    Store {
        path: PathBuf,
        source: rusqlite::Error,
    },

    /// The profile registry has no entry for the requested user.
    #[error("unknown user '{user}': no entry in profile registry at '{registry}'")]
    UnknownUser { user: String, registry: PathBuf },

    /// The profile registry itself is missing or unparseable.
    #[error("profile registry error: {0}")]
    Config(String),
}

/// Convenience alias for `Result<T, ArchiveError>`.
pub type Result<T> = std::result::Result<T, ArchiveError>;

impl ArchiveError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a `Store` variant from a path and a rusqlite error.
    pub fn store(path: impl Into<PathBuf>, source: rusqlite::Error) -> Self {
        Self::Store {
            path: path.into(),
            source,
        }
    }

    /// Create a `Format` variant from a path and a reason.
    pub fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Allow `?` on `std::io::Error` inside functions returning `ArchiveError`
/// when no path context is available (rare — prefer `ArchiveError::io`).
impl From<std::io::Error> for ArchiveError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}
