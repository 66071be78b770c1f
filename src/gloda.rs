//! Read-only adapter over Thunderbird's gloda metadata database.
//!
//! Gloda is the client's own global message index. We never write to it;
//! it serves as the bootstrap and fallback source of identifier → folder
//! and ordinal mappings when the secondary index has no answer.

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use percent_encoding::percent_decode_str;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use tracing::debug;

use crate::error::{ArchiveError, Result};

/// One row of the messages ⋈ folderLocations join.
#[derive(Debug, Clone)]
pub struct CatalogRecord {
    /// Raw identifier as gloda stores it, without angle brackets.
    pub header_message_id: String,
    /// 1-based ordinal of the message within its mailbox.
    pub message_key: u64,
    /// Message date, when gloda recorded one.
    pub date: Option<DateTime<Utc>>,
    /// Percent-decoded `mailbox://nobody@...` folder URI.
    pub folder_uri: String,
}

/// A wildcard-search hit, shaped for one-line-per-match listings.
#[derive(Debug, Clone)]
pub struct CatalogMatch {
    pub date: Option<DateTime<Utc>>,
    pub header_message_id: String,
    pub folder_name: String,
    pub folder_uri: String,
}

/// Read-only handle on a gloda database.
pub struct PrimaryCatalog {
    conn: Connection,
    path: PathBuf,
}

const FIND_BY_ID_SQL: &str = "SELECT m.headerMessageID, m.messageKey, m.date, f.folderURI \
     FROM messages m JOIN folderLocations f ON m.folderId = f.id \
     WHERE m.headerMessageID = ?1";

const WILDCARD_SQL: &str = "SELECT m.headerMessageID, m.messageKey, m.date, f.folderURI \
     FROM messages m JOIN folderLocations f ON m.folderId = f.id \
     WHERE m.headerMessageID LIKE ?1 \
     ORDER BY m.date DESC";

impl PrimaryCatalog {
    /// Open the catalog read-only; the file must already exist.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(ArchiveError::NotFound(format!(
                "gloda database {}",
                path.display()
            )));
        }
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| ArchiveError::store(path, e))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| ArchiveError::store(path, e))?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Exact lookup by header message id (no angle brackets).
    pub fn find_by_id(&self, message_id: &str) -> Result<Option<CatalogRecord>> {
        let record = self
            .conn
            .query_row(FIND_BY_ID_SQL, [message_id], |row| {
                Ok(RawRow {
                    header_message_id: row.get(0)?,
                    message_key: row.get(1)?,
                    date: row.get(2)?,
                    folder_uri: row.get(3)?,
                })
            })
            .optional()
            .map_err(|e| ArchiveError::store(&self.path, e))?;
        Ok(record.map(RawRow::into_record))
    }

    /// Substring/wildcard search on the identifier, newest first.
    ///
    /// A pattern without SQL wildcards is wrapped as `%pattern%`; a pattern
    /// already containing `%` or `_` is passed through verbatim.
    pub fn wildcard_search(&self, pattern: &str) -> Result<Vec<CatalogMatch>> {
        let like = if pattern.contains('%') || pattern.contains('_') {
            pattern.to_string()
        } else {
            format!("%{pattern}%")
        };
        debug!(pattern = %like, "gloda wildcard search");
        let mut stmt = self
            .conn
            .prepare(WILDCARD_SQL)
            .map_err(|e| ArchiveError::store(&self.path, e))?;
        let rows = stmt
            .query_map([like], |row| {
                Ok(RawRow {
                    header_message_id: row.get(0)?,
                    message_key: row.get(1)?,
                    date: row.get(2)?,
                    folder_uri: row.get(3)?,
                })
            })
            .map_err(|e| ArchiveError::store(&self.path, e))?;
        let mut matches = Vec::new();
        for row in rows {
            let record = row.map_err(|e| ArchiveError::store(&self.path, e))?.into_record();
            let (_, folder_name) = to_sbd_folder(&record.folder_uri);
            matches.push(CatalogMatch {
                date: record.date,
                header_message_id: record.header_message_id,
                folder_name,
                folder_uri: record.folder_uri,
            });
        }
        Ok(matches)
    }
}

struct RawRow {
    header_message_id: String,
    message_key: i64,
    date: Option<i64>,
    folder_uri: String,
}

impl RawRow {
    fn into_record(self) -> CatalogRecord {
        CatalogRecord {
            header_message_id: self.header_message_id,
            message_key: self.message_key.max(0) as u64,
            date: self.date.and_then(prtime_to_utc),
            folder_uri: percent_decode_str(&self.folder_uri)
                .decode_utf8_lossy()
                .into_owned(),
        }
    }
}

/// Gloda dates are PRTime: microseconds since the Unix epoch.
fn prtime_to_utc(micros: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_micros(micros).single()
}

/// Translate a folder URI into its on-disk subtree and logical folder name.
///
/// `mailbox://nobody@Local Folders/WF/Friends/Diverse` becomes
/// (`/Mail/Local Folders/WF.sbd/Friends.sbd/Diverse`, `WF/Friends/Diverse`):
/// the account segment passes through unchanged, every intermediate segment
/// gains an `.sbd` suffix, the leaf stays bare.
pub fn to_sbd_folder(folder_uri: &str) -> (String, String) {
    let trimmed = folder_uri
        .strip_prefix("mailbox://nobody@")
        .unwrap_or(folder_uri);
    let parts: Vec<&str> = trimmed.split('/').collect();
    let mut sbd_folder = String::from("/Mail/");
    let mut folder = String::new();
    let last = parts.len().saturating_sub(1);
    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            sbd_folder.push_str(part);
            sbd_folder.push('/');
        } else if i < last {
            sbd_folder.push_str(part);
            sbd_folder.push_str(".sbd/");
            folder.push_str(part);
            folder.push('/');
        } else {
            sbd_folder.push_str(part);
            folder.push_str(part);
        }
    }
    (sbd_folder, folder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_sbd_folder_nested() {
        let (sbd, folder) = to_sbd_folder("mailbox://nobody@Local Folders/WF/Friends/Diverse");
        assert_eq!(sbd, "/Mail/Local Folders/WF.sbd/Friends.sbd/Diverse");
        assert_eq!(folder, "WF/Friends/Diverse");
    }

    #[test]
    fn test_to_sbd_folder_single_level() {
        let (sbd, folder) = to_sbd_folder("mailbox://nobody@Local Folders/Inbox");
        assert_eq!(sbd, "/Mail/Local Folders/Inbox");
        assert_eq!(folder, "Inbox");
    }

    #[test]
    fn test_to_sbd_folder_account_only() {
        let (sbd, folder) = to_sbd_folder("mailbox://nobody@Local Folders");
        assert_eq!(sbd, "/Mail/Local Folders/");
        assert_eq!(folder, "");
    }

    #[test]
    fn test_prtime_conversion() {
        let date = prtime_to_utc(1_601_640_003_000_000).unwrap();
        assert_eq!(date.to_rfc3339(), "2020-10-02T12:00:03+00:00");
    }

    #[test]
    fn test_find_by_id_against_fixture() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("gloda.sqlite");
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE messages (id INTEGER PRIMARY KEY, folderId INTEGER, \
                 messageKey INTEGER, date INTEGER, headerMessageID TEXT);
             CREATE TABLE folderLocations (id INTEGER PRIMARY KEY, folderURI TEXT);
             INSERT INTO messages VALUES
                 (1003, 1003, 1, 1601640003000000,
                  'mailman.45.1601640003.19840.wikidata@lists.wikimedia.org');
             INSERT INTO folderLocations VALUES
                 (1003, 'mailbox://nobody@Local%20Folders/WF/2020-10');",
        )
        .unwrap();
        drop(conn);

        let catalog = PrimaryCatalog::open(&db_path).unwrap();
        let record = catalog
            .find_by_id("mailman.45.1601640003.19840.wikidata@lists.wikimedia.org")
            .unwrap()
            .unwrap();
        assert_eq!(record.message_key, 1);
        // URI comes back percent-decoded
        assert_eq!(record.folder_uri, "mailbox://nobody@Local Folders/WF/2020-10");
        assert!(catalog.find_by_id("no-such-id").unwrap().is_none());

        let matches = catalog.wildcard_search("wikidata").unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].folder_name, "WF/2020-10");
    }
}
