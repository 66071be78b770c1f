//! Message resolution: identifier → parsed message.
//!
//! The fast path goes through the secondary index and reads the recorded
//! byte range directly. Every positional read is verified against the
//! requested identifier before it is trusted; a mismatch degrades to the
//! next rung of the ladder, ending in a linear scan of the mailbox.

use tracing::{debug, warn};

use crate::archive::MailArchive;
use crate::error::{ArchiveError, Result};
use crate::gloda::{self, CatalogRecord};
use crate::index::store::MailIndexRow;
use crate::mbox::MailboxFile;
use crate::message::header::{bracketed_message_id, normalize_message_id};
use crate::message::render::MailDocument;
use crate::message::MessageView;

/// Where a lookup record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupSource {
    SecondaryIndex,
    PrimaryCatalog,
}

/// Uniform resolution record, whichever store produced it.
#[derive(Debug, Clone)]
pub struct MailLookup {
    /// 1-based ordinal within the mailbox.
    pub message_index: u64,
    /// Relative folder path of the mailbox.
    pub folder_path: String,
    /// Identifier without angle brackets.
    pub message_id: String,
    /// Byte range, known only for secondary-index records.
    pub range: Option<(u64, u64)>,
    pub source: LookupSource,
}

impl MailLookup {
    /// From a secondary-index row; the stored ordinal is 0-based.
    pub fn from_index_row(row: &MailIndexRow) -> Self {
        Self {
            message_index: row.email_index + 1,
            folder_path: row.folder_path.clone(),
            message_id: normalize_message_id(&row.message_id),
            range: Some((row.start_pos, row.stop_pos)),
            source: LookupSource::SecondaryIndex,
        }
    }

    /// From a gloda record; messageKey is already 1-based.
    pub fn from_catalog_record(record: &CatalogRecord) -> Self {
        let (sbd_folder, _folder) = gloda::to_sbd_folder(&record.folder_uri);
        Self {
            message_index: record.message_key,
            folder_path: MailArchive::as_relative_path(std::path::Path::new(&sbd_folder)),
            message_id: normalize_message_id(&record.header_message_id),
            range: None,
            source: LookupSource::PrimaryCatalog,
        }
    }
}

/// Resolves identifiers against one archive.
pub struct MessageResolver<'a> {
    archive: &'a MailArchive,
    /// Allow the linear-scan fallback when positional reads fail.
    key_search: bool,
}

impl<'a> MessageResolver<'a> {
    pub fn new(archive: &'a MailArchive) -> Self {
        Self {
            archive,
            key_search: true,
        }
    }

    pub fn without_key_search(mut self) -> Self {
        self.key_search = false;
        self
    }

    /// Find the lookup record for an identifier: secondary index first,
    /// primary catalog as fallback.
    pub fn lookup(&self, mailid: &str) -> Result<Option<MailLookup>> {
        let mailid = normalize_message_id(mailid);
        if self.archive.index_db_exists() {
            let index = self.archive.open_index()?;
            if let Some(row) = index.find_by_message_id(&bracketed_message_id(&mailid))? {
                debug!(mailid, "resolved via secondary index");
                return Ok(Some(MailLookup::from_index_row(&row)));
            }
        }
        let catalog = self.archive.open_catalog()?;
        if let Some(record) = catalog.find_by_id(&mailid)? {
            debug!(mailid, "resolved via primary catalog");
            return Ok(Some(MailLookup::from_catalog_record(&record)));
        }
        Ok(None)
    }

    /// Resolve an identifier to a fully parsed message.
    pub fn resolve(&self, mailid: &str) -> Result<MailDocument> {
        let normalized = normalize_message_id(mailid);
        let lookup = self
            .lookup(&normalized)?
            .ok_or_else(|| ArchiveError::NotFound(format!("mail {normalized}")))?;
        let path = self.archive.mailbox_path(&lookup.folder_path);
        let mut mailbox = MailboxFile::open(&path, &lookup.folder_path)?;
        if self.archive.index_db_exists() {
            let index = self.archive.open_index()?;
            mailbox.restore_toc(index.toc_for_folder(&lookup.folder_path)?);
        }
        let message = self.read_verified(&mut mailbox, &lookup, &normalized)?;
        mailbox.close();
        let message =
            message.ok_or_else(|| ArchiveError::NotFound(format!("mail {normalized}")))?;
        Ok(MailDocument::new(
            self.archive.user(),
            &normalized,
            &lookup.folder_path,
            message,
        ))
    }

    /// Positional reads with identifier verification, then the scan rung.
    fn read_verified(
        &self,
        mailbox: &mut MailboxFile,
        lookup: &MailLookup,
        mailid: &str,
    ) -> Result<Option<MessageView>> {
        if let Some((start, stop)) = lookup.range {
            match mailbox.message_by_range(start, stop) {
                Ok(message) if id_matches(&message, mailid) => return Ok(Some(message)),
                Ok(_) => {
                    warn!(mailid, start, stop, "byte-range read mismatch, falling back");
                }
                Err(err) => {
                    warn!(mailid, error = %err, "byte-range read failed, falling back");
                }
            }
        }
        match mailbox.message_by_key(lookup.message_index) {
            Ok(Some(message)) if id_matches(&message, mailid) => return Ok(Some(message)),
            Ok(Some(_)) => warn!(mailid, key = lookup.message_index, "ordinal read mismatch"),
            Ok(None) => debug!(mailid, key = lookup.message_index, "ordinal out of range"),
            Err(err) => warn!(mailid, error = %err, "ordinal read failed"),
        }
        if self.key_search {
            return mailbox.scan_by_message_id(mailid);
        }
        Ok(None)
    }
}

fn id_matches(message: &MessageView, mailid: &str) -> bool {
    normalize_message_id(&message.message_id()) == mailid
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_from_index_row_is_one_based() {
        let row = MailIndexRow {
            folder_path: "/WF.sbd/2020-10".to_string(),
            message_id: "<x@y>".to_string(),
            email_index: 0,
            start_pos: 0,
            stop_pos: 120,
            ..Default::default()
        };
        let lookup = MailLookup::from_index_row(&row);
        assert_eq!(lookup.message_index, 1);
        assert_eq!(lookup.message_id, "x@y");
        assert_eq!(lookup.range, Some((0, 120)));
        assert_eq!(lookup.source, LookupSource::SecondaryIndex);
    }

    #[test]
    fn test_lookup_from_catalog_record_translates_uri() {
        let record = CatalogRecord {
            header_message_id: "x@y".to_string(),
            message_key: 1,
            date: None,
            folder_uri: "mailbox://nobody@Local Folders/WF/2020-10".to_string(),
        };
        let lookup = MailLookup::from_catalog_record(&record);
        assert_eq!(lookup.folder_path, "/WF.sbd/2020-10");
        assert_eq!(lookup.message_index, 1);
        assert!(lookup.range.is_none());
        assert_eq!(lookup.source, LookupSource::PrimaryCatalog);
    }
}
