//! High-level entry points tying the archive, index, and resolver together.
//!
//! External collaborators (the CLI here, a web front end elsewhere) talk to
//! `MailService` only; everything below it stays composable and testable on
//! its own.

use crate::archive::{ArchiveRegistry, ArchiveSummary};
use crate::error::Result;
use crate::gloda::CatalogMatch;
use crate::index::coordinator::{IndexCoordinator, IndexingReport, ProgressFn};
use crate::index::store::{MailIndexRow, MailboxRow, SearchCriteria};
use crate::message::render::MailDocument;
use crate::resolve::MessageResolver;

pub struct MailService {
    registry: ArchiveRegistry,
}

impl MailService {
    pub fn new(registry: ArchiveRegistry) -> Self {
        Self { registry }
    }

    /// Resolve one message by user and identifier.
    pub fn resolve(&self, user: &str, mailid: &str) -> Result<MailDocument> {
        let archive = self.registry.get(user)?;
        MessageResolver::new(archive).resolve(mailid)
    }

    /// Mailbox summaries for a user, as the index recorded them.
    pub fn list_mailboxes(&self, user: &str) -> Result<Vec<MailboxRow>> {
        let archive = self.registry.get(user)?;
        let index = archive.open_index()?;
        index.mailboxes()
    }

    /// Substring search over the secondary index.
    pub fn search(&self, user: &str, criteria: &SearchCriteria) -> Result<Vec<MailIndexRow>> {
        let archive = self.registry.get(user)?;
        let index = archive.open_index()?;
        index.search(criteria)
    }

    /// Build or refresh a user's secondary index.
    pub fn reindex(
        &self,
        user: &str,
        force: bool,
        scope: Option<&[String]>,
        progress: ProgressFn<'_>,
    ) -> Result<IndexingReport> {
        let archive = self.registry.get(user)?;
        IndexCoordinator::new(archive).run(force, scope, progress)
    }

    /// Wildcard identifier search against the primary catalog, newest first.
    pub fn wildcard_id_search(&self, user: &str, pattern: &str) -> Result<Vec<CatalogMatch>> {
        let archive = self.registry.get(user)?;
        let catalog = archive.open_catalog()?;
        catalog.wildcard_search(pattern)
    }

    /// Per-user archive overview.
    pub fn archive_summaries(&self) -> Vec<ArchiveSummary> {
        self.registry.summaries()
    }
}
