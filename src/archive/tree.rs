//! Traversal of the `Mail/Local Folders` tree.
//!
//! Thunderbird stores every mail folder as a flat mbox file; a folder that
//! has subfolders gets a sibling directory named after it with an `.sbd`
//! suffix. Mailboxes are the extensionless files; `.msf` summary files and
//! anything else carrying an extension are client bookkeeping and skipped.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{ArchiveError, Result};

use super::MailArchive;

/// What a tree node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// An `.sbd` container directory.
    Folder,
    /// A flat mbox file.
    Mailbox,
}

/// One discovered node under the local-folders root.
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub path: PathBuf,
    pub relative_path: String,
    pub kind: NodeKind,
}

/// Walk the local-folders tree with an explicit worklist, depth-first.
///
/// The root itself is not reported. Unreadable directories are recorded as
/// warnings and skipped rather than aborting the walk. Results come back in
/// a stable lexicographic order.
pub fn walk(root: &Path) -> Result<Vec<TreeNode>> {
    if !root.is_dir() {
        return Err(ArchiveError::MailboxNotFound(root.to_path_buf()));
    }
    let mut nodes = Vec::new();
    let mut worklist = vec![root.to_path_buf()];
    while let Some(dir) = worklist.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "skipping unreadable folder");
                continue;
            }
        };
        let mut children: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        children.sort();
        for child in children {
            let name = match child.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            if child.is_dir() {
                if name.ends_with(".sbd") {
                    nodes.push(TreeNode {
                        relative_path: MailArchive::as_relative_path(&child),
                        path: child.clone(),
                        kind: NodeKind::Folder,
                    });
                    worklist.push(child);
                }
            } else if child.is_file() && !name.contains('.') {
                nodes.push(TreeNode {
                    relative_path: MailArchive::as_relative_path(&child),
                    path: child,
                    kind: NodeKind::Mailbox,
                });
            }
        }
    }
    nodes.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn seed_tree(root: &Path) {
        let local = root.join("Mail/Local Folders");
        fs::create_dir_all(local.join("WF.sbd/Friends.sbd")).unwrap();
        fs::write(local.join("Inbox"), b"From a@b Thu Jan  1 00:00:00 2004\nX: y\n\nbody\n").unwrap();
        fs::write(local.join("Inbox.msf"), b"mork").unwrap();
        fs::write(local.join("WF.sbd/2020-10"), b"").unwrap();
        fs::write(local.join("WF.sbd/Friends.sbd/Diverse"), b"").unwrap();
    }

    #[test]
    fn test_walk_classifies_nodes() {
        let tmp = tempfile::tempdir().unwrap();
        seed_tree(tmp.path());
        let nodes = walk(&tmp.path().join("Mail/Local Folders")).unwrap();
        let relative: Vec<(&str, NodeKind)> = nodes
            .iter()
            .map(|n| (n.relative_path.as_str(), n.kind))
            .collect();
        assert_eq!(
            relative,
            vec![
                ("/Inbox", NodeKind::Mailbox),
                ("/WF.sbd", NodeKind::Folder),
                ("/WF.sbd/2020-10", NodeKind::Mailbox),
                ("/WF.sbd/Friends.sbd", NodeKind::Folder),
                ("/WF.sbd/Friends.sbd/Diverse", NodeKind::Mailbox),
            ]
        );
    }

    #[test]
    fn test_msf_files_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        seed_tree(tmp.path());
        let nodes = walk(&tmp.path().join("Mail/Local Folders")).unwrap();
        assert!(nodes.iter().all(|n| !n.relative_path.ends_with(".msf")));
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(walk(&tmp.path().join("nope")).is_err());
    }
}
