//! Secondary index: persistent store and incremental maintenance.

pub mod coordinator;
pub mod store;

pub use coordinator::{IndexCoordinator, IndexingReport, PlanReason, ProgressFn};
pub use store::{MailIndexRow, MailboxRow, SearchCriteria, SecondaryIndex};
