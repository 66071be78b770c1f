//! Incremental index maintenance.
//!
//! The coordinator walks a planning → updating → reporting cycle per
//! invocation: decide which mailboxes are stale against the recorded
//! timestamps, rebuild only those (or everything on a forced or first
//! build), and aggregate the outcome into a report. A failing mailbox
//! never aborts the pass; its error lands in the report instead.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::archive::{self, tree, MailArchive};
use crate::error::Result;
use crate::index::store::{MailIndexRow, MailboxRow, SecondaryIndex};
use crate::mbox::MailboxFile;
use crate::message::header::{
    decode_encoded_words, decode_header_bytes, get_header, parse_date, unfold_headers,
};

/// Progress callback: (mailboxes done, mailboxes total).
pub type ProgressFn<'a> = Option<&'a dyn Fn(u64, u64)>;

/// Why a mailbox was (or was not) scheduled for update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanReason {
    /// No usable index file yet; everything gets built.
    FirstBuild,
    /// Caller requested a rebuild regardless of timestamps.
    Forced,
    /// On-disk mailbox is newer than what the index recorded.
    Stale,
    /// The index has never seen this mailbox.
    Unindexed,
}

/// One scheduled mailbox update.
#[derive(Debug)]
pub struct PlannedUpdate {
    pub relative_path: String,
    pub reason: PlanReason,
}

/// Outcome of one indexing pass.
#[derive(Debug, Default)]
pub struct IndexingReport {
    /// Mailboxes considered in this pass (scheduled ones, not the whole tree).
    pub total_mailboxes: u64,
    /// Sum of messages indexed across successful mailboxes.
    pub total_successes: u64,
    pub total_errors: u64,
    /// errors / total mailboxes considered, as a percentage.
    pub error_rate: f64,
    /// Per-mailbox message counts for successful updates.
    pub success: BTreeMap<String, u64>,
    /// Per-mailbox error text for failed updates.
    pub errors: BTreeMap<String, String>,
    pub gloda_update_time: Option<DateTime<Utc>>,
    pub index_update_time: Option<DateTime<Utc>>,
    pub msg: String,
}

impl IndexingReport {
    fn finalize(&mut self) {
        self.total_errors = self.errors.len() as u64;
        self.total_successes = self.success.values().sum();
        self.error_rate = if self.total_mailboxes > 0 {
            (self.total_errors as f64 / self.total_mailboxes as f64) * 100.0
        } else {
            0.0
        };
    }

    /// One-line summary distinguishing full success from partial failure.
    pub fn summary(&self) -> String {
        let average = if self.success.is_empty() {
            0.0
        } else {
            self.total_successes as f64 / self.success.len() as f64
        };
        let marker = if self.total_errors > 0 { "❌ " } else { "✅" };
        format!(
            "Indexing completed: {marker}Total indexed messages: {}, \
             Average messages per successful mailbox: {average:.2}, \
             {} mailboxes with errors ({:.2}%).",
            self.total_successes, self.total_errors, self.error_rate
        )
    }

    /// Multi-line detail listing per-mailbox outcomes.
    pub fn details(&self) -> String {
        let mut out = String::new();
        if !self.errors.is_empty() {
            out.push_str("Errors occurred during index creation:\n");
            for (path, error) in &self.errors {
                out.push_str(&format!("Error in {path}: {error}\n"));
            }
        }
        if !self.success.is_empty() {
            out.push_str("Index created successfully for:\n");
            for (path, count) in &self.success {
                out.push_str(&format!("{path}: {count} entries\n"));
            }
        }
        out
    }
}

impl fmt::Display for IndexingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

/// Drives index builds for one archive.
pub struct IndexCoordinator<'a> {
    archive: &'a MailArchive,
}

impl<'a> IndexCoordinator<'a> {
    pub fn new(archive: &'a MailArchive) -> Self {
        Self { archive }
    }

    /// Decide which mailboxes need updating.
    ///
    /// `scope` restricts planning to the named relative paths; `force`
    /// schedules every in-scope mailbox regardless of timestamps.
    /// `first_build` must be determined before the index file is opened,
    /// since opening creates it.
    pub fn plan(
        &self,
        index: &SecondaryIndex,
        first_build: bool,
        force: bool,
        scope: Option<&[String]>,
    ) -> Result<Vec<PlannedUpdate>> {
        let nodes = tree::walk(self.archive.local_folders())?;
        let mut planned = Vec::new();
        for node in nodes {
            if node.kind != tree::NodeKind::Mailbox {
                continue;
            }
            if let Some(scope) = scope {
                if !scope.iter().any(|s| s == &node.relative_path) {
                    continue;
                }
            }
            let reason = if first_build {
                Some(PlanReason::FirstBuild)
            } else if force {
                Some(PlanReason::Forced)
            } else {
                let recorded = index.folder_update_time(&node.relative_path)?;
                let on_disk = archive::file_update_time(&node.path);
                match (recorded, on_disk) {
                    (None, _) => Some(PlanReason::Unindexed),
                    (Some(recorded), Some(on_disk)) if on_disk > recorded => {
                        Some(PlanReason::Stale)
                    }
                    _ => None,
                }
            };
            if let Some(reason) = reason {
                planned.push(PlannedUpdate {
                    relative_path: node.relative_path,
                    reason,
                });
            }
        }
        Ok(planned)
    }

    /// Run one full pass: plan, update, report.
    pub fn run(
        &self,
        force: bool,
        scope: Option<&[String]>,
        progress: ProgressFn<'_>,
    ) -> Result<IndexingReport> {
        let first_build = !self.archive.index_db_exists();
        let mut index = self.archive.open_index()?;
        let planned = self.plan(&index, first_build, force, scope)?;
        // A forced, unscoped pass is a from-scratch rebuild: rows of
        // mailboxes the tree no longer contains must not survive it.
        if force && scope.is_none() {
            let keep: Vec<String> = planned.iter().map(|u| u.relative_path.clone()).collect();
            let dropped = index.prune_missing_folders(&keep)?;
            if dropped > 0 {
                info!(dropped, "dropped index rows of deleted mailboxes");
            }
        }
        drop(index);
        self.run_planned(&planned, progress)
    }

    /// Execute an already-computed plan.
    pub fn run_planned(
        &self,
        planned: &[PlannedUpdate],
        progress: ProgressFn<'_>,
    ) -> Result<IndexingReport> {
        let mut index = self.archive.open_index()?;
        let mut report = IndexingReport {
            total_mailboxes: planned.len() as u64,
            gloda_update_time: self.archive.gloda_update_time(),
            ..Default::default()
        };
        if planned.is_empty() {
            report.msg = format!(
                "Index is up-to-date for user {}. No action was performed.",
                self.archive.user()
            );
            report.index_update_time = self.archive.index_update_time();
            return Ok(report);
        }

        let total = planned.len() as u64;
        for (done, update) in planned.iter().enumerate() {
            match self.update_one(&mut index, &update.relative_path) {
                Ok(count) => {
                    report.success.insert(update.relative_path.clone(), count);
                }
                Err(err) => {
                    warn!(mailbox = %update.relative_path, error = %err, "indexing failed");
                    report
                        .errors
                        .insert(update.relative_path.clone(), err.to_string());
                    // record the failure so listings can surface it
                    let _ = index.upsert_mailbox(&MailboxRow {
                        folder_path: self
                            .archive
                            .mailbox_path(&update.relative_path)
                            .display()
                            .to_string(),
                        relative_folder_path: update.relative_path.clone(),
                        folder_update_time: None,
                        message_count: 0,
                        error: Some(err.to_string()),
                    });
                }
            }
            if let Some(progress) = progress {
                progress(done as u64 + 1, total);
            }
        }

        report.finalize();
        report.msg = "Indexing operation completed.".to_string();
        report.index_update_time = self.archive.index_update_time();
        info!(
            user = self.archive.user(),
            mailboxes = report.total_mailboxes,
            messages = report.total_successes,
            errors = report.total_errors,
            "indexing pass finished"
        );
        Ok(report)
    }

    /// Rebuild the index rows of a single mailbox.
    fn update_one(&self, index: &mut SecondaryIndex, relative_path: &str) -> Result<u64> {
        let path = self.archive.mailbox_path(relative_path);
        let update_time = archive::file_update_time(&path);
        let mut mailbox = MailboxFile::open(&path, relative_path)?;
        let mut rows = Vec::new();
        mailbox.for_each_message(&mut |ordinal, raw, entry| {
            rows.push(index_row(relative_path, ordinal, raw, entry.start, entry.stop));
            Ok(())
        })?;
        mailbox.close();
        let count = rows.len() as u64;
        index.replace_folder_entries(relative_path, &rows)?;
        index.upsert_mailbox(&MailboxRow {
            folder_path: path.display().to_string(),
            relative_folder_path: relative_path.to_string(),
            folder_update_time: update_time,
            message_count: count,
            error: None,
        })?;
        Ok(count)
    }
}

/// Extract the indexed header fields of one raw message.
fn index_row(folder_path: &str, ordinal: usize, raw: &[u8], start: u64, stop: u64) -> MailIndexRow {
    let text = decode_header_bytes(raw);
    let headers = unfold_headers(&text);
    let field = |name: &str| {
        get_header(&headers, name)
            .map(|value| decode_encoded_words(&value))
            .unwrap_or_else(|| "?".to_string())
    };
    let message_id = get_header(&headers, "Message-ID")
        .unwrap_or_else(|| format!("{folder_path}#{ordinal}"));
    let date = get_header(&headers, "Date").unwrap_or_default();
    let parsed = parse_date(&date);
    let iso_date = parsed.map(|d| d.to_rfc3339()).unwrap_or_default();
    // an unparseable date is worth recording, but never fails the folder
    let error = match (&parsed, date.is_empty()) {
        (None, false) => Some(format!("unparseable date: {date}")),
        _ => None,
    };
    MailIndexRow {
        folder_path: folder_path.to_string(),
        message_id,
        sender: field("From"),
        recipient: field("To"),
        subject: field("Subject"),
        date,
        iso_date,
        email_index: ordinal as u64,
        start_pos: start,
        stop_pos: stop,
        error,
    }
}
