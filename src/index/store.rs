//! The secondary SQLite index over a user's mail archive.
//!
//! Two tables: `mail_index` carries one row per message with its byte range
//! inside the mailbox file, `mailboxes` carries one row per mailbox with the
//! last-modified timestamp the index was built against. Folder replacement
//! is always delete-then-insert inside one transaction so offsets never mix
//! stale and fresh rows.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::error::{ArchiveError, Result};

const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS mail_index (
  folder_path TEXT,
  message_id TEXT,
  sender TEXT,
  recipient TEXT,
  subject TEXT,
  date TEXT,
  iso_date TEXT,
  email_index INTEGER,
  start_pos INTEGER,
  stop_pos INTEGER,
  error TEXT
);
CREATE INDEX IF NOT EXISTS idx_mail_index_message_id ON mail_index (message_id);
CREATE INDEX IF NOT EXISTS idx_mail_index_folder_path ON mail_index (folder_path);
CREATE TABLE IF NOT EXISTS mailboxes (
  folder_path TEXT PRIMARY KEY,
  relative_folder_path TEXT,
  folder_update_time TEXT,
  message_count INTEGER,
  error TEXT
);
";

/// One `mail_index` row.
#[derive(Debug, Clone, Default)]
pub struct MailIndexRow {
    /// Relative folder path of the owning mailbox, e.g. `/WF.sbd/2020-10`.
    pub folder_path: String,
    /// Identifier as it appears on the wire, angle brackets included.
    pub message_id: String,
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    /// Raw `Date:` header value.
    pub date: String,
    /// Normalized ISO-8601 rendering of the date, empty when unparseable.
    pub iso_date: String,
    /// 0-based ordinal within the mailbox.
    pub email_index: u64,
    pub start_pos: u64,
    pub stop_pos: u64,
    pub error: Option<String>,
}

/// One `mailboxes` row.
#[derive(Debug, Clone)]
pub struct MailboxRow {
    pub folder_path: String,
    pub relative_folder_path: String,
    pub folder_update_time: Option<DateTime<Utc>>,
    pub message_count: u64,
    pub error: Option<String>,
}

/// Substring search criteria over the indexed header fields.
///
/// Field names follow the mail headers they index: `Subject`, `From`,
/// `To`, `Message-ID`. Matching is case-sensitive containment.
#[derive(Debug, Clone, Default)]
pub struct SearchCriteria {
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub message_id: Option<String>,
}

impl SearchCriteria {
    /// Build criteria from (header name, substring) pairs; unknown header
    /// names are rejected.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<Self> {
        let mut criteria = Self::default();
        for (field, value) in pairs {
            if value.is_empty() {
                continue;
            }
            let slot = match field {
                "Subject" => &mut criteria.subject,
                "From" => &mut criteria.sender,
                "To" => &mut criteria.recipient,
                "Message-ID" => &mut criteria.message_id,
                other => {
                    return Err(ArchiveError::Config(format!(
                        "unknown search field '{other}'"
                    )))
                }
            };
            *slot = Some(value.to_string());
        }
        Ok(criteria)
    }

    fn conditions(&self) -> (Vec<&'static str>, Vec<String>) {
        let mut columns = Vec::new();
        let mut values = Vec::new();
        for (column, value) in [
            ("subject", &self.subject),
            ("sender", &self.sender),
            ("recipient", &self.recipient),
            ("message_id", &self.message_id),
        ] {
            if let Some(value) = value {
                columns.push(column);
                values.push(format!("%{value}%"));
            }
        }
        (columns, values)
    }
}

/// Handle on the secondary index database.
pub struct SecondaryIndex {
    conn: Connection,
    path: PathBuf,
}

impl SecondaryIndex {
    /// Open the index, creating the schema when the file is new.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| ArchiveError::store(path, e))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| ArchiveError::store(path, e))?;
        // substring search is case-sensitive containment
        conn.execute_batch("PRAGMA case_sensitive_like = ON;")
            .map_err(|e| ArchiveError::store(path, e))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| ArchiveError::store(path, e))?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically replace all message rows of one folder.
    pub fn replace_folder_entries(
        &mut self,
        folder_path: &str,
        rows: &[MailIndexRow],
    ) -> Result<()> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| ArchiveError::store(&self.path, e))?;
        tx.execute(
            "DELETE FROM mail_index WHERE folder_path = ?1",
            [folder_path],
        )
        .map_err(|e| ArchiveError::store(&self.path, e))?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO mail_index (folder_path, message_id, sender, recipient, \
                     subject, date, iso_date, email_index, start_pos, stop_pos, error) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                )
                .map_err(|e| ArchiveError::store(&self.path, e))?;
            for row in rows {
                stmt.execute(params![
                    row.folder_path,
                    row.message_id,
                    row.sender,
                    row.recipient,
                    row.subject,
                    row.date,
                    row.iso_date,
                    row.email_index as i64,
                    row.start_pos as i64,
                    row.stop_pos as i64,
                    row.error,
                ])
                .map_err(|e| ArchiveError::store(&self.path, e))?;
            }
        }
        tx.commit().map_err(|e| ArchiveError::store(&self.path, e))?;
        debug!(folder = folder_path, rows = rows.len(), "folder entries replaced");
        Ok(())
    }

    /// Insert or replace one mailbox row.
    pub fn upsert_mailbox(&self, row: &MailboxRow) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO mailboxes \
                 (folder_path, relative_folder_path, folder_update_time, message_count, error) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    row.folder_path,
                    row.relative_folder_path,
                    row.folder_update_time.map(|t| t.to_rfc3339()),
                    row.message_count as i64,
                    row.error,
                ],
            )
            .map_err(|e| ArchiveError::store(&self.path, e))?;
        Ok(())
    }

    /// Drop the rows of folders the tree no longer contains, from both
    /// tables in one transaction. `keep` holds the relative folder paths
    /// still on disk; an empty `keep` empties the index entirely.
    ///
    /// Returns the number of mailbox rows dropped.
    pub fn prune_missing_folders(&mut self, keep: &[String]) -> Result<u64> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| ArchiveError::store(&self.path, e))?;
        let dropped = if keep.is_empty() {
            let n = tx
                .execute("DELETE FROM mailboxes", [])
                .map_err(|e| ArchiveError::store(&self.path, e))?;
            tx.execute("DELETE FROM mail_index", [])
                .map_err(|e| ArchiveError::store(&self.path, e))?;
            n
        } else {
            let marks = vec!["?"; keep.len()].join(", ");
            let n = tx
                .execute(
                    &format!("DELETE FROM mailboxes WHERE relative_folder_path NOT IN ({marks})"),
                    rusqlite::params_from_iter(keep.iter()),
                )
                .map_err(|e| ArchiveError::store(&self.path, e))?;
            tx.execute(
                &format!("DELETE FROM mail_index WHERE folder_path NOT IN ({marks})"),
                rusqlite::params_from_iter(keep.iter()),
            )
            .map_err(|e| ArchiveError::store(&self.path, e))?;
            n
        };
        tx.commit().map_err(|e| ArchiveError::store(&self.path, e))?;
        if dropped > 0 {
            debug!(dropped, "pruned mailboxes no longer on disk");
        }
        Ok(dropped as u64)
    }

    /// All mailbox rows, keyed order by relative folder path.
    pub fn mailboxes(&self) -> Result<Vec<MailboxRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT folder_path, relative_folder_path, folder_update_time, \
                 message_count, error FROM mailboxes ORDER BY relative_folder_path",
            )
            .map_err(|e| ArchiveError::store(&self.path, e))?;
        let rows = stmt
            .query_map([], mailbox_from_row)
            .map_err(|e| ArchiveError::store(&self.path, e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| ArchiveError::store(&self.path, e))
    }

    /// The timestamp the index last saw for a mailbox, if any.
    pub fn folder_update_time(&self, relative_folder_path: &str) -> Result<Option<DateTime<Utc>>> {
        let text: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT folder_update_time FROM mailboxes WHERE relative_folder_path = ?1",
                [relative_folder_path],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| ArchiveError::store(&self.path, e))?;
        Ok(text.flatten().and_then(|t| parse_timestamp(&t)))
    }

    /// First index row carrying the given bracketed identifier.
    pub fn find_by_message_id(&self, bracketed_id: &str) -> Result<Option<MailIndexRow>> {
        self.conn
            .query_row(
                "SELECT folder_path, message_id, sender, recipient, subject, date, \
                 iso_date, email_index, start_pos, stop_pos, error \
                 FROM mail_index WHERE message_id = ?1",
                [bracketed_id],
                index_from_row,
            )
            .optional()
            .map_err(|e| ArchiveError::store(&self.path, e))
    }

    /// TOC triples (ordinal, start, stop) of one folder, ordinal-ordered.
    pub fn toc_for_folder(&self, relative_folder_path: &str) -> Result<Vec<(u64, u64, u64)>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT email_index, start_pos, stop_pos FROM mail_index \
                 WHERE folder_path = ?1 ORDER BY email_index",
            )
            .map_err(|e| ArchiveError::store(&self.path, e))?;
        let rows = stmt
            .query_map([relative_folder_path], |row| {
                let idx: i64 = row.get(0)?;
                let start: i64 = row.get(1)?;
                let stop: i64 = row.get(2)?;
                Ok((idx.max(0) as u64, start.max(0) as u64, stop.max(0) as u64))
            })
            .map_err(|e| ArchiveError::store(&self.path, e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| ArchiveError::store(&self.path, e))
    }

    /// Substring search across the indexed header columns.
    pub fn search(&self, criteria: &SearchCriteria) -> Result<Vec<MailIndexRow>> {
        let (columns, values) = criteria.conditions();
        let sql = if columns.is_empty() {
            "SELECT folder_path, message_id, sender, recipient, subject, date, \
             iso_date, email_index, start_pos, stop_pos, error FROM mail_index"
                .to_string()
        } else {
            let clauses: Vec<String> = columns
                .iter()
                .enumerate()
                .map(|(i, col)| format!("{col} LIKE ?{}", i + 1))
                .collect();
            format!(
                "SELECT folder_path, message_id, sender, recipient, subject, date, \
                 iso_date, email_index, start_pos, stop_pos, error \
                 FROM mail_index WHERE {}",
                clauses.join(" AND ")
            )
        };
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| ArchiveError::store(&self.path, e))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(values.iter()), index_from_row)
            .map_err(|e| ArchiveError::store(&self.path, e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| ArchiveError::store(&self.path, e))
    }

    /// Number of message rows in the whole index.
    pub fn message_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM mail_index", [], |row| row.get(0))
            .map_err(|e| ArchiveError::store(&self.path, e))?;
        Ok(count.max(0) as u64)
    }
}

fn index_from_row(row: &Row<'_>) -> rusqlite::Result<MailIndexRow> {
    let email_index: i64 = row.get(7)?;
    let start_pos: i64 = row.get(8)?;
    let stop_pos: i64 = row.get(9)?;
    Ok(MailIndexRow {
        folder_path: row.get(0)?,
        message_id: row.get(1)?,
        sender: row.get(2)?,
        recipient: row.get(3)?,
        subject: row.get(4)?,
        date: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        iso_date: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        email_index: email_index.max(0) as u64,
        start_pos: start_pos.max(0) as u64,
        stop_pos: stop_pos.max(0) as u64,
        error: row.get(10)?,
    })
}

fn mailbox_from_row(row: &Row<'_>) -> rusqlite::Result<MailboxRow> {
    let update_time: Option<String> = row.get(2)?;
    let count: Option<i64> = row.get(3)?;
    Ok(MailboxRow {
        folder_path: row.get(0)?,
        relative_folder_path: row.get(1)?,
        folder_update_time: update_time.and_then(|t| parse_timestamp(&t)),
        message_count: count.unwrap_or(0).max(0) as u64,
        error: row.get(4)?,
    })
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row(folder: &str, idx: u64, id: &str, subject: &str) -> MailIndexRow {
        MailIndexRow {
            folder_path: folder.to_string(),
            message_id: format!("<{id}>"),
            sender: "alice@example.org".to_string(),
            recipient: "bob@example.org".to_string(),
            subject: subject.to_string(),
            date: "Sat, 03 Oct 2020 12:00:03 +0000".to_string(),
            iso_date: "2020-10-03T12:00:03+00:00".to_string(),
            email_index: idx,
            start_pos: idx * 100,
            stop_pos: idx * 100 + 90,
            error: None,
        }
    }

    fn open_temp() -> (tempfile::TempDir, SecondaryIndex) {
        let tmp = tempfile::tempdir().unwrap();
        let index = SecondaryIndex::open(&tmp.path().join("index_db.sqlite")).unwrap();
        (tmp, index)
    }

    #[test]
    fn test_replace_folder_entries_is_total() {
        let (_tmp, mut index) = open_temp();
        index
            .replace_folder_entries(
                "/Inbox",
                &[sample_row("/Inbox", 0, "a@x", "old"), sample_row("/Inbox", 1, "b@x", "old")],
            )
            .unwrap();
        index
            .replace_folder_entries("/Inbox", &[sample_row("/Inbox", 0, "c@x", "new")])
            .unwrap();
        assert_eq!(index.message_count().unwrap(), 1);
        assert!(index.find_by_message_id("<a@x>").unwrap().is_none());
        assert!(index.find_by_message_id("<c@x>").unwrap().is_some());
    }

    #[test]
    fn test_replacement_is_per_folder() {
        let (_tmp, mut index) = open_temp();
        index
            .replace_folder_entries("/Inbox", &[sample_row("/Inbox", 0, "a@x", "s")])
            .unwrap();
        index
            .replace_folder_entries("/Sent", &[sample_row("/Sent", 0, "b@x", "s")])
            .unwrap();
        index.replace_folder_entries("/Inbox", &[]).unwrap();
        assert!(index.find_by_message_id("<b@x>").unwrap().is_some());
        assert_eq!(index.message_count().unwrap(), 1);
    }

    #[test]
    fn test_toc_roundtrip_ordered() {
        let (_tmp, mut index) = open_temp();
        let rows = vec![
            sample_row("/Inbox", 1, "b@x", "s"),
            sample_row("/Inbox", 0, "a@x", "s"),
        ];
        index.replace_folder_entries("/Inbox", &rows).unwrap();
        let toc = index.toc_for_folder("/Inbox").unwrap();
        assert_eq!(toc, vec![(0, 0, 90), (1, 100, 190)]);
    }

    #[test]
    fn test_mailbox_timestamps() {
        let (_tmp, index) = open_temp();
        let stamp = "2024-05-01T10:00:00+00:00";
        index
            .upsert_mailbox(&MailboxRow {
                folder_path: "/p/Mail/Local Folders/Inbox".to_string(),
                relative_folder_path: "/Inbox".to_string(),
                folder_update_time: Some(parse_timestamp(stamp).unwrap()),
                message_count: 3,
                error: None,
            })
            .unwrap();
        let seen = index.folder_update_time("/Inbox").unwrap().unwrap();
        assert_eq!(seen.to_rfc3339(), stamp);
        assert!(index.folder_update_time("/Nope").unwrap().is_none());
        assert_eq!(index.mailboxes().unwrap().len(), 1);
    }

    #[test]
    fn test_prune_missing_folders() {
        let (_tmp, mut index) = open_temp();
        for rel in ["/Inbox", "/Gone"] {
            let id = format!("msg{rel}@x");
            index
                .replace_folder_entries(rel, &[sample_row(rel, 0, &id, "s")])
                .unwrap();
            index
                .upsert_mailbox(&MailboxRow {
                    folder_path: format!("/p/Mail/Local Folders{rel}"),
                    relative_folder_path: rel.to_string(),
                    folder_update_time: None,
                    message_count: 1,
                    error: None,
                })
                .unwrap();
        }

        let dropped = index.prune_missing_folders(&["/Inbox".to_string()]).unwrap();
        assert_eq!(dropped, 1);
        assert!(index.find_by_message_id("<msg/Gone@x>").unwrap().is_none());
        assert!(index.find_by_message_id("<msg/Inbox@x>").unwrap().is_some());
        let listed = index.mailboxes().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].relative_folder_path, "/Inbox");

        // an empty keep list empties both tables
        assert_eq!(index.prune_missing_folders(&[]).unwrap(), 1);
        assert_eq!(index.message_count().unwrap(), 0);
        assert!(index.mailboxes().unwrap().is_empty());
    }

    #[test]
    fn test_search_substring_and_conjunction() {
        let (_tmp, mut index) = open_temp();
        index
            .replace_folder_entries(
                "/Inbox",
                &[
                    sample_row("/Inbox", 0, "a@x", "Wikidata Digest"),
                    sample_row("/Inbox", 1, "b@x", "Weekly Summary"),
                ],
            )
            .unwrap();
        let criteria = SearchCriteria::from_pairs([("Subject", "Digest")]).unwrap();
        let hits = index.search(&criteria).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].subject, "Wikidata Digest");

        // conjunction across fields
        let criteria =
            SearchCriteria::from_pairs([("Subject", "Digest"), ("From", "nobody")]).unwrap();
        assert!(index.search(&criteria).unwrap().is_empty());

        // case-sensitive containment: no hit for lowercase
        let criteria = SearchCriteria::from_pairs([("Subject", "digest")]).unwrap();
        assert!(index.search(&criteria).unwrap().is_empty());

        // unknown field rejected
        assert!(SearchCriteria::from_pairs([("Body", "x")]).is_err());
    }
}
