//! Table of contents for an mbox container.
//!
//! Maps 0-based message ordinals to `(start, stop)` byte ranges. Ordinals
//! are dense from 0 and strictly increasing in offset. Offsets are only
//! valid while the underlying file is unmodified.

/// One TOC entry: half-open byte range `[start, stop)` of a message,
/// starting at its `From ` separator line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TocEntry {
    pub start: u64,
    pub stop: u64,
}

impl TocEntry {
    /// Byte length of the message.
    pub fn len(&self) -> u64 {
        self.stop.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.stop <= self.start
    }
}

/// Ordered list of message byte ranges, owned by one `MailboxFile`.
///
/// Constructed either by a full scan of the file or restored from persisted
/// index rows; never shared across mailbox instances.
#[derive(Debug, Clone, Default)]
pub struct Toc {
    entries: Vec<TocEntry>,
}

impl Toc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a TOC from `(ordinal, start, stop)` triples as persisted in the
    /// secondary index. Triples are sorted by ordinal; gaps or duplicate
    /// ordinals make the restored TOC unusable and yield an empty TOC.
    pub fn restore(mut triples: Vec<(u64, u64, u64)>) -> Self {
        triples.sort_by_key(|&(ordinal, _, _)| ordinal);
        let dense = triples
            .iter()
            .enumerate()
            .all(|(i, &(ordinal, _, _))| ordinal == i as u64);
        if !dense {
            tracing::warn!("non-dense TOC triples, discarding restored TOC");
            return Self::new();
        }
        Self {
            entries: triples
                .into_iter()
                .map(|(_, start, stop)| TocEntry { start, stop })
                .collect(),
        }
    }

    /// Append the next entry (used during a scan).
    pub fn push(&mut self, start: u64, stop: u64) {
        debug_assert!(
            self.entries.last().map_or(true, |last| start >= last.stop),
            "TOC offsets must be strictly increasing"
        );
        self.entries.push(TocEntry { start, stop });
    }

    /// Entry for a 0-based ordinal.
    pub fn get(&self, ordinal: usize) -> Option<TocEntry> {
        self.entries.get(ordinal).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(ordinal, entry)` pairs in file order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, TocEntry)> + '_ {
        self.entries.iter().copied().enumerate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_get() {
        let mut toc = Toc::new();
        toc.push(0, 100);
        toc.push(100, 250);
        assert_eq!(toc.len(), 2);
        assert_eq!(toc.get(1), Some(TocEntry { start: 100, stop: 250 }));
        assert_eq!(toc.get(2), None);
        assert_eq!(toc.get(1).unwrap().len(), 150);
    }

    #[test]
    fn test_restore_sorts_by_ordinal() {
        let toc = Toc::restore(vec![(1, 100, 250), (0, 0, 100)]);
        assert_eq!(toc.get(0), Some(TocEntry { start: 0, stop: 100 }));
        assert_eq!(toc.get(1), Some(TocEntry { start: 100, stop: 250 }));
    }

    #[test]
    fn test_restore_rejects_gaps() {
        let toc = Toc::restore(vec![(0, 0, 100), (2, 250, 300)]);
        assert!(toc.is_empty());
    }
}
