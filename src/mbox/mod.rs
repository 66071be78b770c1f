//! mbox container access: streaming scan, table of contents, random reads.

pub mod file;
pub mod scan;
pub mod toc;

pub use file::MailboxFile;
pub use scan::MboxScanner;
pub use toc::{Toc, TocEntry};
