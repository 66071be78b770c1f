//! Streaming mbox scanner.
//!
//! Walks mbox files line-by-line through a large read buffer, never holding
//! the whole file in memory. Tolerant of malformed input: mixed line
//! endings, `From ` separators without a preceding blank line, truncated
//! messages at EOF, NUL bytes in bodies, and a UTF-8 BOM at the start.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{ArchiveError, Result};
use crate::mbox::toc::Toc;

/// 1 MB read buffer for fast sequential reads.
const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Messages larger than this have their body truncated (256 MB).
const MAX_MESSAGE_SIZE: usize = 256 * 1024 * 1024;

/// Streaming mbox scanner.
///
/// Visits every message boundary in file order, handing the caller the
/// message's half-open byte range and raw bytes.
#[derive(Debug)]
pub struct MboxScanner {
    path: PathBuf,
    file_size: u64,
    max_message_size: usize,
}

impl MboxScanner {
    /// Create a scanner for the given mbox file.
    ///
    /// The path must name a regular file; no mbox validation happens here.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = std::fs::metadata(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ArchiveError::MailboxNotFound(path.clone())
            } else {
                ArchiveError::io(&path, e)
            }
        })?;
        if !metadata.is_file() {
            return Err(ArchiveError::MailboxNotFound(path));
        }
        Ok(Self {
            path,
            file_size: metadata.len(),
            max_message_size: MAX_MESSAGE_SIZE,
        })
    }

    /// Total size of the underlying file in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Scan the full mbox, calling `on_message` for each message found.
    ///
    /// The callback receives `(start, stop, raw_bytes)` — the half-open byte
    /// range of the message, `From ` line included — and returns `true` to
    /// continue or `false` to abort early.
    ///
    /// Returns the number of messages seen.
    pub fn scan(&self, on_message: &mut dyn FnMut(u64, u64, &[u8]) -> bool) -> Result<u64> {
        if self.file_size == 0 {
            return Ok(0);
        }

        let file = File::open(&self.path).map_err(|e| ArchiveError::io(&self.path, e))?;
        let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);

        let mut count: u64 = 0;
        let mut offset: u64 = 0;
        let mut pending: Vec<u8> = Vec::with_capacity(64 * 1024);
        let mut pending_start: u64 = 0;
        let mut after_blank = true;
        let mut line: Vec<u8> = Vec::with_capacity(4096);

        loop {
            let line_len = self.next_line(&mut reader, &mut line)?;
            if line_len == 0 {
                break; // EOF
            }

            if is_mbox_separator(&line) {
                if offset > 0 && !after_blank {
                    warn!(offset, "Found 'From ' separator without preceding blank line");
                }
                if !pending.is_empty() {
                    if !on_message(pending_start, offset, &pending) {
                        return Ok(count);
                    }
                    count += 1;
                }
                pending_start = offset;
                pending.clear();
                pending.extend_from_slice(&line);
            } else if pending.len() + line.len() <= self.max_message_size {
                pending.extend_from_slice(&line);
            } else if pending.len() <= self.max_message_size {
                warn!(
                    offset = pending_start,
                    max_size = self.max_message_size,
                    "Message exceeds maximum size, truncating body"
                );
            }

            after_blank = is_blank_line(&line);
            offset += line_len;
        }

        // Flush last message
        if !pending.is_empty() && on_message(pending_start, offset, &pending) {
            count += 1;
        }

        Ok(count)
    }

    /// Scan only for message boundaries, producing a fresh TOC.
    pub fn scan_toc(&self) -> Result<Toc> {
        let mut toc = Toc::new();
        self.scan(&mut |start, stop, _raw| {
            toc.push(start, stop);
            true
        })?;
        Ok(toc)
    }

    /// Pull the next line (newline included) into `line`, reusing its
    /// allocation. Returns the line's byte length, 0 at EOF.
    fn next_line(&self, reader: &mut BufReader<File>, line: &mut Vec<u8>) -> Result<u64> {
        line.clear();
        let chunk = reader
            .fill_buf()
            .map_err(|e| ArchiveError::io(&self.path, e))?;
        if chunk.is_empty() {
            return Ok(0);
        }
        let take = match chunk.iter().position(|&b| b == b'\n') {
            Some(pos) => pos + 1,
            None => chunk.len(),
        };
        line.extend_from_slice(&chunk[..take]);
        reader.consume(take);
        Ok(take as u64)
    }
}

/// An mbox separator is a line starting with `From ` (BOM tolerated at the
/// very start of the file).
pub(crate) fn is_mbox_separator(line: &[u8]) -> bool {
    const BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
    line.strip_prefix(BOM)
        .unwrap_or(line)
        .starts_with(b"From ")
}

fn is_blank_line(line: &[u8]) -> bool {
    line.iter().all(|b| matches!(b, b'\n' | b'\r' | b' ' | b'\t'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TWO_MESSAGES: &[u8] = b"From a@example.com Thu Jan 01 00:00:00 2024\n\
Subject: first\n\
Message-ID: <one@example.com>\n\
\n\
body one\n\
\n\
From b@example.com Thu Jan 01 00:00:01 2024\n\
Subject: second\n\
Message-ID: <two@example.com>\n\
\n\
body two\n";

    fn write_temp(content: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().expect("temp file");
        f.write_all(content).expect("write");
        f
    }

    #[test]
    fn test_separator_detection() {
        assert!(is_mbox_separator(b"From a@example.com Thu Jan 01 00:00:00 2024\n"));
        assert!(!is_mbox_separator(b"from a@example.com\n")); // lowercase
        assert!(!is_mbox_separator(b">From a@example.com\n")); // escaped
        assert!(!is_mbox_separator(b"Subject: From here\n"));
        let mut with_bom = vec![0xEF, 0xBB, 0xBF];
        with_bom.extend_from_slice(b"From a@b Thu Jan 01 00:00:00 2024\n");
        assert!(is_mbox_separator(&with_bom));
    }

    #[test]
    fn test_blank_line_detection() {
        assert!(is_blank_line(b"\n"));
        assert!(is_blank_line(b"\r\n"));
        assert!(is_blank_line(b"  \n"));
        assert!(!is_blank_line(b"x \n"));
    }

    #[test]
    fn test_scan_yields_contiguous_ranges() {
        let f = write_temp(TWO_MESSAGES);
        let scanner = MboxScanner::new(f.path()).expect("scanner");
        let mut ranges = Vec::new();
        let count = scanner
            .scan(&mut |start, stop, raw| {
                assert_eq!((stop - start) as usize, raw.len());
                ranges.push((start, stop));
                true
            })
            .expect("scan");
        assert_eq!(count, 2);
        assert_eq!(ranges[0].0, 0);
        assert_eq!(ranges[0].1, ranges[1].0);
        assert_eq!(ranges[1].1, TWO_MESSAGES.len() as u64);
    }

    #[test]
    fn test_scan_toc_matches_scan() {
        let f = write_temp(TWO_MESSAGES);
        let scanner = MboxScanner::new(f.path()).expect("scanner");
        let toc = scanner.scan_toc().expect("toc");
        assert_eq!(toc.len(), 2);
        assert_eq!(toc.get(0).unwrap().start, 0);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = MboxScanner::new("/nonexistent/mailbox").unwrap_err();
        assert!(matches!(err, ArchiveError::MailboxNotFound(_)));
    }

    #[test]
    fn test_empty_file_yields_no_messages() {
        let f = write_temp(b"");
        let scanner = MboxScanner::new(f.path()).expect("scanner");
        assert_eq!(scanner.scan(&mut |_, _, _| true).expect("scan"), 0);
    }
}
