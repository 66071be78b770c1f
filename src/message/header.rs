//! RFC 5322 header handling: folding, encoded-words (RFC 2047), dates.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::warn;

/// Decode raw header bytes to a string, UTF-8 first.
///
/// Windows-1252 maps every byte, so the fallback never fails.
pub fn decode_header_bytes(bytes: &[u8]) -> String {
    const BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
    let bytes = bytes.strip_prefix(BOM).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_owned(),
        Err(_) => encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(),
    }
}

/// Unfold headers: continuation lines (leading space or tab) are joined onto
/// the previous header with a single space.
///
/// Returns `(name, raw_value)` pairs in document order, names with their
/// original casing. Lines without a colon are skipped.
pub fn unfold_headers(text: &str) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = Vec::new();
    for line in text.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some((_, value)) = headers.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }
    headers
}

/// First value for a header name, case-insensitive.
pub fn get_header(headers: &[(String, String)], name: &str) -> Option<String> {
    headers
        .iter()
        .find_map(|(key, value)| key.eq_ignore_ascii_case(name).then(|| value.clone()))
}

/// Decode RFC 2047 encoded-words in a header value.
///
/// `"=?UTF-8?B?R3V0ZW4=?= =?UTF-8?B?IFRhZw==?="` decodes to `"Guten Tag"`.
/// A token that fails to decode is left in the output as-is, so a value
/// that merely looks like an encoded word never raises.
pub fn decode_encoded_words(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    let mut prev_encoded = false;

    while let Some(pos) = rest.find("=?") {
        let gap = &rest[..pos];
        // Whitespace between adjacent encoded words is transparent (RFC 2047 §6.2)
        if !(prev_encoded && gap.trim().is_empty()) {
            out.push_str(gap);
        }
        match parse_encoded_word(&rest[pos..]) {
            Some((text, used)) => {
                out.push_str(&text);
                rest = &rest[pos + used..];
                prev_encoded = true;
            }
            None => {
                out.push_str("=?");
                rest = &rest[pos + 2..];
                prev_encoded = false;
            }
        }
    }

    out.push_str(rest);
    out
}

/// Parse one `=?charset?enc?payload?=` token at the start of `s`.
///
/// Returns the decoded text and the total byte length of the token.
fn parse_encoded_word(s: &str) -> Option<(String, usize)> {
    let body = s.strip_prefix("=?")?;
    let (charset, rest) = body.split_once('?')?;
    let (encoding, rest) = rest.split_once('?')?;
    let payload = &rest[..rest.find("?=")?];
    let used = 2 + charset.len() + 1 + encoding.len() + 1 + payload.len() + 2;

    let bytes = if encoding.eq_ignore_ascii_case("B") {
        decode_base64(payload.as_bytes())?
    } else if encoding.eq_ignore_ascii_case("Q") {
        decode_quoted(payload)
    } else {
        return None;
    };

    Some((decode_charset(charset, &bytes), used))
}

/// Minimal base64 decoder tolerant of embedded whitespace.
fn decode_base64(input: &[u8]) -> Option<Vec<u8>> {
    fn b64val(c: u8) -> Option<u8> {
        match c {
            b'A'..=b'Z' => Some(c - b'A'),
            b'a'..=b'z' => Some(c - b'a' + 26),
            b'0'..=b'9' => Some(c - b'0' + 52),
            b'+' => Some(62),
            b'/' => Some(63),
            _ => None,
        }
    }

    let mut out = Vec::with_capacity(input.len() / 4 * 3);
    let mut quad = [0u8; 4];
    let mut qi = 0;
    let mut pad = 0;

    for &b in input {
        if matches!(b, b' ' | b'\n' | b'\r' | b'\t') {
            continue;
        }
        if b == b'=' {
            quad[qi] = 0;
            qi += 1;
            pad += 1;
        } else {
            quad[qi] = b64val(b)?;
            qi += 1;
            if pad > 0 {
                return None; // data after padding
            }
        }
        if qi == 4 {
            out.push((quad[0] << 2) | (quad[1] >> 4));
            out.push((quad[1] << 4) | (quad[2] >> 2));
            out.push((quad[2] << 6) | quad[3]);
            qi = 0;
        }
    }
    if qi != 0 {
        return None; // truncated quantum
    }
    out.truncate(out.len() - pad.min(out.len()));
    Some(out)
}

/// Q-encoding (RFC 2047): underscore is a space, `=XX` a hex-escaped byte.
fn decode_quoted(input: &str) -> Vec<u8> {
    let src = input.as_bytes();
    let mut out = Vec::with_capacity(src.len());
    let mut i = 0;
    while i < src.len() {
        match src[i] {
            b'_' => {
                out.push(b' ');
                i += 1;
            }
            b'=' if i + 2 < src.len() => match hex_pair(src[i + 1], src[i + 2]) {
                Some(byte) => {
                    out.push(byte);
                    i += 3;
                }
                None => {
                    out.push(b'=');
                    i += 1;
                }
            },
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    out
}

fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}

/// Decode bytes using a named charset label.
pub fn decode_charset(charset: &str, bytes: &[u8]) -> String {
    if charset.eq_ignore_ascii_case("utf-8") || charset.eq_ignore_ascii_case("utf8") {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    match encoding_rs::Encoding::for_label(charset.as_bytes()) {
        Some(encoding) => encoding.decode(bytes).0.into_owned(),
        None => {
            warn!(charset, "unknown charset label, decoding as lossy UTF-8");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Strip surrounding angle brackets and whitespace from a message id.
///
/// `<foo@bar>` and `foo@bar` normalize to the same value.
pub fn normalize_message_id(id: &str) -> String {
    let trimmed = id.trim();
    let trimmed = trimmed.strip_prefix('<').unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix('>').unwrap_or(trimmed);
    trimmed.to_string()
}

/// Wrap a message id in angle brackets, the form stored in mail headers
/// and in the `mail_index` table.
pub fn bracketed_message_id(id: &str) -> String {
    format!("<{}>", normalize_message_id(id))
}

const DATE_FORMATS: &[&str] = &[
    "%d %b %Y %H:%M:%S %z",
    "%d %b %Y %H:%M:%S %Z",
    "%d %b %Y %H:%M:%S",
    "%b %d %H:%M:%S %Y",
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%d %H:%M:%S %z",
    "%Y-%m-%d %H:%M:%S",
];

/// Parse a mail date in the formats seen in real archives: RFC 2822,
/// RFC 3339, and a list of broken variants (missing weekday, named
/// timezone abbreviations).
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    let bare = strip_weekday(value);
    for candidate in [bare.clone(), swap_named_zone(&bare)] {
        if let Some(dt) = parse_with_formats(&candidate) {
            return Some(dt);
        }
    }

    // mail-parser's own date parser as the last resort
    if let Some(dt) = date_via_mail_parser(value) {
        return Some(dt);
    }

    warn!(date = value, "Could not parse date");
    None
}

fn parse_with_formats(candidate: &str) -> Option<DateTime<Utc>> {
    for fmt in DATE_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(candidate, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(candidate, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    None
}

fn date_via_mail_parser(value: &str) -> Option<DateTime<Utc>> {
    // Wrap the value in a minimal message so the parser accepts it
    let synthetic = format!("Date: {value}\n\n");
    let parsed = mail_parser::MessageParser::default().parse(synthetic.as_bytes())?;
    let rfc3339 = parsed.date()?.to_rfc3339();
    DateTime::parse_from_rfc3339(&rfc3339)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Drop a leading weekday name ("Sat, " or "Sat ").
fn strip_weekday(s: &str) -> String {
    const DAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
    for day in DAYS {
        for sep in [", ", ",", " "] {
            if let Some(rest) = s.strip_prefix(day).and_then(|r| r.strip_prefix(sep)) {
                return rest.trim_start().to_string();
            }
        }
    }
    s.to_string()
}

const NAMED_ZONES: &[(&str, &str)] = &[
    ("EST", "-0500"),
    ("EDT", "-0400"),
    ("CST", "-0600"),
    ("CDT", "-0500"),
    ("MST", "-0700"),
    ("MDT", "-0600"),
    ("PST", "-0800"),
    ("PDT", "-0700"),
    ("HST", "-1000"),
    ("AKST", "-0900"),
    ("AKDT", "-0800"),
    ("GMT", "+0000"),
    ("UT", "+0000"),
    ("UTC", "+0000"),
    ("CET", "+0100"),
    ("MET", "+0100"),
    ("CEST", "+0200"),
    ("EET", "+0200"),
    ("EEST", "+0300"),
    ("JST", "+0900"),
];

/// Replace a trailing timezone abbreviation with its numeric offset.
fn swap_named_zone(s: &str) -> String {
    for (zone, offset) in NAMED_ZONES {
        if let Some(head) = s.strip_suffix(zone) {
            return format!("{head}{offset}");
        }
    }
    s.to_string()
}
