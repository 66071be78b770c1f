//! Per-user mail archives and the registry that owns them.
//!
//! An archive is a Thunderbird profile seen from the outside: the gloda
//! database the client maintains, the `Mail/Local Folders` mbox tree, and
//! the secondary index this crate owns, colocated with the gloda file.

pub mod tree;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ProfileRegistry;
use crate::error::{ArchiveError, Result};
use crate::gloda::PrimaryCatalog;
use crate::index::store::SecondaryIndex;

/// Fixed file name of the secondary index, always colocated with the gloda
/// database.
pub const INDEX_DB_NAME: &str = "index_db.sqlite";

/// Relative location of the local-folders mbox tree inside a profile.
pub const LOCAL_FOLDERS: &str = "Mail/Local Folders";

/// One user's mail archive: resolved paths and timestamp probes.
#[derive(Debug, Clone)]
pub struct MailArchive {
    user: String,
    gloda_db_path: PathBuf,
    index_db_path: PathBuf,
    profile: PathBuf,
    local_folders: PathBuf,
}

/// Snapshot of an archive for overview listings.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveSummary {
    pub user: String,
    pub gloda_db_path: PathBuf,
    pub index_db_path: PathBuf,
    pub profile: PathBuf,
    pub gloda_update_time: Option<DateTime<Utc>>,
    pub index_update_time: Option<DateTime<Utc>>,
}

impl MailArchive {
    pub fn new(
        user: impl Into<String>,
        gloda_db_path: impl Into<PathBuf>,
        profile: impl Into<PathBuf>,
    ) -> Self {
        let gloda_db_path = gloda_db_path.into();
        let profile = profile.into();
        // The index database lives next to the gloda database
        let index_db_path = gloda_db_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(INDEX_DB_NAME);
        let local_folders = profile.join(LOCAL_FOLDERS);
        Self {
            user: user.into(),
            gloda_db_path,
            index_db_path,
            profile,
            local_folders,
        }
    }

    /// Build an archive for a registered user.
    pub fn from_registry(user: &str, registry: &ProfileRegistry) -> Result<Self> {
        let entry = registry.entry(user)?;
        Ok(Self::new(user, &entry.gloda_db, &entry.profile))
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn gloda_db_path(&self) -> &Path {
        &self.gloda_db_path
    }

    pub fn index_db_path(&self) -> &Path {
        &self.index_db_path
    }

    pub fn profile(&self) -> &Path {
        &self.profile
    }

    /// Root of the mbox folder tree.
    pub fn local_folders(&self) -> &Path {
        &self.local_folders
    }

    /// True iff the secondary index file exists with nonzero size — the
    /// sole existence test; a zero-byte file means "no index yet".
    pub fn index_db_exists(&self) -> bool {
        std::fs::metadata(&self.index_db_path)
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    pub fn gloda_update_time(&self) -> Option<DateTime<Utc>> {
        file_update_time(&self.gloda_db_path)
    }

    pub fn index_update_time(&self) -> Option<DateTime<Utc>> {
        if self.index_db_exists() {
            file_update_time(&self.index_db_path)
        } else {
            None
        }
    }

    /// Open the read-only gloda catalog.
    pub fn open_catalog(&self) -> Result<PrimaryCatalog> {
        PrimaryCatalog::open(&self.gloda_db_path)
    }

    /// Open (creating if absent) the secondary index store.
    pub fn open_index(&self) -> Result<SecondaryIndex> {
        SecondaryIndex::open(&self.index_db_path)
    }

    /// Absolute path of a mailbox from its relative folder path.
    pub fn mailbox_path(&self, relative_path: &str) -> PathBuf {
        self.local_folders
            .join(relative_path.trim_start_matches('/'))
    }

    /// Strip the local-folders root from an absolute mailbox path, yielding
    /// the relative folder path used as the index key (leading `/` kept).
    pub fn as_relative_path(folder_path: &Path) -> String {
        let text = folder_path.to_string_lossy();
        match text.find(LOCAL_FOLDERS) {
            Some(pos) => text[pos + LOCAL_FOLDERS.len()..].to_string(),
            None => text.into_owned(),
        }
    }

    pub fn summary(&self) -> ArchiveSummary {
        ArchiveSummary {
            user: self.user.clone(),
            gloda_db_path: self.gloda_db_path.clone(),
            index_db_path: self.index_db_path.clone(),
            profile: self.profile.clone(),
            gloda_update_time: self.gloda_update_time(),
            index_update_time: self.index_update_time(),
        }
    }
}

/// Explicit registry of per-user archives, populated from the profile
/// registry at startup and passed to the service layer — there is no
/// process-wide singleton.
#[derive(Debug, Default)]
pub struct ArchiveRegistry {
    archives: BTreeMap<String, MailArchive>,
}

impl ArchiveRegistry {
    /// Archives for every registered user.
    pub fn from_profiles(profiles: &ProfileRegistry) -> Self {
        let archives = profiles
            .users
            .iter()
            .map(|(user, entry)| {
                (
                    user.clone(),
                    MailArchive::new(user, &entry.gloda_db, &entry.profile),
                )
            })
            .collect();
        Self { archives }
    }

    pub fn get(&self, user: &str) -> Result<&MailArchive> {
        self.archives
            .get(user)
            .ok_or_else(|| ArchiveError::NotFound(format!("user '{user}'")))
    }

    /// Per-user overview records, in user order.
    pub fn summaries(&self) -> Vec<ArchiveSummary> {
        self.archives.values().map(MailArchive::summary).collect()
    }
}

/// Last-modified timestamp of a file, if it exists.
pub fn file_update_time(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::from)
        .ok()
}
