//! Parsed message views: decoded headers, assembled bodies, MIME parts.
//!
//! Format-only — no storage concerns. `MessageView` is what the resolver
//! hands to presentation collaborators.

pub mod header;
pub mod render;

use mail_parser::{MessageParser, MimeHeaders};
use tracing::debug;

use crate::error::{ArchiveError, Result};

pub use header::{bracketed_message_id, normalize_message_id};
pub use render::MailDocument;

/// How to handle content that cannot be decoded under any attempted charset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeMode {
    /// Honor only the declared charset and raise a decode error.
    Strict,
    /// Fall back through common encodings; substitute an absence for an
    /// undecodable part.
    #[default]
    Lenient,
}

/// One MIME part of a message.
#[derive(Debug, Clone)]
pub struct MailPart {
    /// Content type, e.g. `text/plain`.
    pub content_type: String,
    /// Declared charset, if any.
    pub charset: Option<String>,
    /// Decoded filename, or a synthetic `part<N>.<ext>` name.
    pub filename: String,
    /// Decoded content length in bytes.
    pub length: usize,
    /// Whether the part is a non-inline attachment.
    pub is_attachment: bool,
    /// Transfer-decoded content bytes.
    pub content: Vec<u8>,
}

/// A raw message parsed into structured headers, bodies, and parts.
#[derive(Debug, Clone, Default)]
pub struct MessageView {
    /// Decoded `(name, value)` headers, sorted by name.
    headers: Vec<(String, String)>,
    /// All `text/plain` parts concatenated in document order.
    text: String,
    /// All `text/html` parts concatenated in document order.
    html: String,
    /// Every MIME part in document order.
    parts: Vec<MailPart>,
}

impl MessageView {
    /// Parse a raw message leniently: malformed content degrades to partial
    /// views, never an error.
    pub fn parse(raw: &[u8]) -> Self {
        // Lenient mode cannot fail
        Self::parse_mode(raw, DecodeMode::Lenient).unwrap_or_default()
    }

    /// Parse a raw message with an explicit decode mode.
    pub fn parse_mode(raw: &[u8], mode: DecodeMode) -> Result<Self> {
        // Strip the leading `From ` separator line if present
        let message_bytes = skip_from_line(raw);

        let headers = decode_headers(message_bytes);

        let parser = MessageParser::default();
        match parser.parse(message_bytes) {
            Some(msg) => {
                let mut text = String::new();
                let mut html = String::new();
                for i in 0.. {
                    match msg.body_text(i) {
                        Some(part) => text.push_str(&part),
                        None => break,
                    }
                }
                for i in 0.. {
                    match msg.body_html(i) {
                        Some(part) => html.push_str(&part),
                        None => break,
                    }
                }

                let parts = collect_parts(&msg);

                Ok(Self {
                    headers,
                    text,
                    html,
                    parts,
                })
            }
            None => {
                debug!("mail-parser could not parse message, using fallback extraction");
                let body = body_after_headers(message_bytes);
                let text = decode_text_bytes(body, None, mode)?.unwrap_or_default();
                Ok(Self {
                    headers,
                    text,
                    html: String::new(),
                    parts: Vec::new(),
                })
            }
        }
    }

    /// Header value by name (case-insensitive), `"?"` if absent.
    pub fn header(&self, name: &str) -> String {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| "?".to_string())
    }

    /// All decoded headers, sorted by name.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// The raw `Message-ID` header value, normally angle-bracketed.
    /// Empty string if the message has none.
    pub fn message_id(&self) -> String {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("Message-ID"))
            .map(|(_, v)| v.trim().to_string())
            .unwrap_or_default()
    }

    /// Decoded subject.
    pub fn subject(&self) -> String {
        self.header("Subject")
    }

    /// Concatenated plain-text body.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Concatenated HTML body.
    pub fn html(&self) -> &str {
        &self.html
    }

    /// All MIME parts in document order.
    pub fn parts(&self) -> &[MailPart] {
        &self.parts
    }

    /// Decoded bytes of one part by 0-based index.
    pub fn part_content(&self, index: usize) -> Result<&[u8]> {
        self.parts
            .get(index)
            .map(|p| p.content.as_slice())
            .ok_or_else(|| ArchiveError::NotFound(format!("message part {index}")))
    }
}

/// Extract and decode the header block, sorted by header name.
fn decode_headers(message_bytes: &[u8]) -> Vec<(String, String)> {
    let header_bytes = raw_header_block(message_bytes);
    let text = header::decode_header_bytes(header_bytes);
    let mut headers: Vec<(String, String)> = header::unfold_headers(&text)
        .into_iter()
        .map(|(name, value)| (name, header::decode_encoded_words(&value)))
        .collect();
    headers.sort_by(|a, b| a.0.cmp(&b.0));
    headers
}

/// Build the parts list from a parsed message.
fn collect_parts(msg: &mail_parser::Message<'_>) -> Vec<MailPart> {
    let mut parts = Vec::new();
    for (idx, part) in msg.parts.iter().enumerate() {
        let content_type = part
            .content_type()
            .map(|ct| match ct.subtype() {
                Some(sub) => format!("{}/{}", ct.ctype(), sub),
                None => ct.ctype().to_string(),
            })
            .unwrap_or_else(|| "text/plain".to_string());

        let charset = part
            .content_type()
            .and_then(|ct| ct.attribute("charset"))
            .map(String::from);

        let is_attachment = part
            .content_disposition()
            .map(|d| d.ctype().eq_ignore_ascii_case("attachment"))
            .unwrap_or(false);

        let filename = fixed_part_name(part.attachment_name(), &content_type, idx + 1);

        let content = part.contents().to_vec();
        parts.push(MailPart {
            content_type,
            charset,
            filename,
            length: content.len(),
            is_attachment,
            content,
        });
    }
    parts
}

/// Assign a filename to a part: the decoded name parameter when present,
/// otherwise a synthetic `part<N><ext>` from the content type.
fn fixed_part_name(name: Option<&str>, content_type: &str, part_index: usize) -> String {
    match name {
        Some(name) if !name.is_empty() => header::decode_encoded_words(name),
        _ => {
            let main_type = content_type
                .split(';')
                .next()
                .unwrap_or(content_type)
                .trim();
            let ext = guess_extension(main_type).unwrap_or(".txt");
            format!("part{part_index}{ext}")
        }
    }
}

/// Best-guess file extension for a content type.
fn guess_extension(content_type: &str) -> Option<&'static str> {
    match content_type.to_lowercase().as_str() {
        "text/plain" => Some(".txt"),
        "text/html" => Some(".html"),
        "text/calendar" => Some(".ics"),
        "message/rfc822" => Some(".eml"),
        "application/pdf" => Some(".pdf"),
        "application/zip" => Some(".zip"),
        "application/json" => Some(".json"),
        "application/xml" | "text/xml" => Some(".xml"),
        "application/octet-stream" => Some(".bin"),
        "image/jpeg" => Some(".jpg"),
        "image/png" => Some(".png"),
        "image/gif" => Some(".gif"),
        "image/svg+xml" => Some(".svg"),
        _ => None,
    }
}

/// Decode text bytes. Lenient mode tries the declared charset, then a
/// fixed fallback sequence of common encodings, and yields `None` when
/// nothing decodes cleanly. Strict mode honors only the declared charset
/// (UTF-8 when none is declared) and turns undecodable input into a
/// decode error.
pub fn decode_text_bytes(
    bytes: &[u8],
    charset: Option<&str>,
    mode: DecodeMode,
) -> Result<Option<String>> {
    let declared =
        charset.and_then(|label| encoding_rs::Encoding::for_label(label.as_bytes()));
    match mode {
        DecodeMode::Strict => {
            let enc = declared.unwrap_or(encoding_rs::UTF_8);
            let (decoded, _, had_errors) = enc.decode(bytes);
            if had_errors {
                return Err(ArchiveError::Decode(format!(
                    "content not decodable as {}",
                    enc.name()
                )));
            }
            Ok(Some(decoded.into_owned()))
        }
        DecodeMode::Lenient => {
            let mut candidates: Vec<&'static encoding_rs::Encoding> = Vec::new();
            if let Some(enc) = declared {
                candidates.push(enc);
            }
            candidates.push(encoding_rs::UTF_8);
            candidates.push(encoding_rs::WINDOWS_1252);
            for enc in candidates {
                let (decoded, _, had_errors) = enc.decode(bytes);
                if !had_errors {
                    return Ok(Some(decoded.into_owned()));
                }
            }
            Ok(None)
        }
    }
}

/// Skip the `From ` separator line at the start of mbox messages.
fn skip_from_line(data: &[u8]) -> &[u8] {
    // Handle BOM
    let data = if data.starts_with(&[0xEF, 0xBB, 0xBF]) {
        &data[3..]
    } else {
        data
    };

    if data.starts_with(b"From ") {
        if let Some(pos) = data.iter().position(|&b| b == b'\n') {
            return &data[pos + 1..];
        }
    }
    data
}

/// Everything before the first blank line.
fn raw_header_block(data: &[u8]) -> &[u8] {
    let mut prev_newline = false;
    for (i, &b) in data.iter().enumerate() {
        if b == b'\n' {
            if prev_newline {
                return &data[..i];
            }
            prev_newline = true;
        } else if b != b'\r' {
            prev_newline = false;
        }
    }
    data
}

/// Everything after the first blank line.
fn body_after_headers(data: &[u8]) -> &[u8] {
    let headers = raw_header_block(data);
    let rest = &data[headers.len()..];
    let skip = rest
        .iter()
        .position(|&b| b != b'\n' && b != b'\r')
        .unwrap_or(rest.len());
    &rest[skip..]
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &[u8] = b"From MAILER-DAEMON Sat Oct 24 14:37:31 2020\n\
From: wikidata-request@lists.wikimedia.org\n\
Subject: Wikidata Digest, Vol 107, Issue 2\n\
To: wikidata@lists.wikimedia.org\n\
Date: Sat, 03 Oct 2020 12:00:03 +0000\n\
Message-ID: <mailman.45.1601640003.19840.wikidata@lists.wikimedia.org>\n\
MIME-Version: 1.0\n\
Content-Type: text/plain; charset=\"us-ascii\"\n\
\n\
Send Wikidata mailing list submissions to\n\
    wikidata@lists.wikimedia.org\n";

    #[test]
    fn test_parse_headers_and_body() {
        let msg = MessageView::parse(RAW);
        assert_eq!(msg.subject(), "Wikidata Digest, Vol 107, Issue 2");
        assert_eq!(
            msg.message_id(),
            "<mailman.45.1601640003.19840.wikidata@lists.wikimedia.org>"
        );
        assert!(msg.text().contains("Send Wikidata mailing list submissions"));
        assert_eq!(msg.html(), "");
    }

    #[test]
    fn test_header_default_question_mark() {
        let msg = MessageView::parse(RAW);
        assert_eq!(msg.header("X-Missing"), "?");
        assert_eq!(msg.header("subject"), "Wikidata Digest, Vol 107, Issue 2");
    }

    #[test]
    fn test_headers_sorted_by_name() {
        let msg = MessageView::parse(RAW);
        let names: Vec<&str> = msg.headers().iter().map(|(k, _)| k.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_encoded_subject_is_decoded() {
        let raw = b"From x Sat Oct 24 14:37:31 2020\n\
Subject: =?UTF-8?B?SG9sYSBtdW5kbw==?=\n\
Message-ID: <enc@example.com>\n\
\n\
body\n";
        let msg = MessageView::parse(raw);
        assert_eq!(msg.subject(), "Hola mundo");
    }

    #[test]
    fn test_fixed_part_name_synthetic() {
        assert_eq!(fixed_part_name(None, "application/pdf", 3), "part3.pdf");
        assert_eq!(fixed_part_name(None, "x-weird/unknown", 2), "part2.txt");
        assert_eq!(
            fixed_part_name(Some("=?UTF-8?Q?caf=C3=A9.txt?="), "text/plain", 1),
            "café.txt"
        );
    }

    #[test]
    fn test_decode_text_bytes_fallback() {
        // 0xE9 is 'é' in Windows-1252 but invalid UTF-8
        let bytes = b"caf\xe9";
        let decoded = decode_text_bytes(bytes, None, DecodeMode::Lenient)
            .expect("lenient never errors")
            .expect("windows-1252 fallback decodes");
        assert_eq!(decoded, "café");
    }

    #[test]
    fn test_decode_text_bytes_strict_rejects_undecodable() {
        // invalid UTF-8 with no fallback in strict mode
        let bytes = b"caf\xe9";
        let err = decode_text_bytes(bytes, Some("utf-8"), DecodeMode::Strict).unwrap_err();
        assert!(matches!(err, ArchiveError::Decode(_)));
        let err = decode_text_bytes(bytes, None, DecodeMode::Strict).unwrap_err();
        assert!(matches!(err, ArchiveError::Decode(_)));
        // a declared charset that does decode the bytes still succeeds
        let decoded = decode_text_bytes(bytes, Some("windows-1252"), DecodeMode::Strict)
            .expect("declared charset decodes")
            .expect("some text");
        assert_eq!(decoded, "café");
    }

    #[test]
    fn test_part_content_out_of_range() {
        let msg = MessageView::parse(RAW);
        assert!(msg.part_content(99).is_err());
    }
}
