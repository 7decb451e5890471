//! RFC 5322 header parsing: folding, encoded-words (RFC 2047), dates, and the
//! envelope fields every message record carries.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use chrono::{DateTime, FixedOffset, NaiveDateTime};
use tracing::warn;

use crate::model::address::{join_addresses, Mailbox};

/// Envelope fields decoded from a header block.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    pub from: String,
    pub to: String,
    pub cc: String,
    pub subject: String,
    pub date: Option<DateTime<FixedOffset>>,
    pub headers: Vec<(String, String)>,
}

/// Decode a raw header block into an [`Envelope`].
pub fn parse_envelope(raw_headers: &[u8]) -> Envelope {
    let headers = unfold_headers(&decode_header_bytes(raw_headers));

    let decoded = |name: &str| {
        get_header(&headers, name)
            .map(decode_encoded_words)
            .unwrap_or_default()
    };

    let from = Mailbox::parse(&decoded("from")).address;
    let to = join_addresses(&Mailbox::parse_list(&decoded("to")));
    let cc = join_addresses(&Mailbox::parse_list(&decoded("cc")));
    let subject = decoded("subject");
    let date = get_header(&headers, "date").and_then(parse_date);

    Envelope {
        from,
        to,
        cc,
        subject,
        date,
        headers,
    }
}

/// Only the `Date:` of a header block. Used by the MBOX scan, which must not
/// pay for address decoding on every message.
pub fn parse_date_header(raw_headers: &[u8]) -> Option<DateTime<FixedOffset>> {
    let headers = unfold_headers(&decode_header_bytes(raw_headers));
    get_header(&headers, "date").and_then(parse_date)
}

/// Decode raw header bytes, trying UTF-8 first and falling back to Windows-1252.
fn decode_header_bytes(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(),
    }
}

/// Join continuation lines and split into `(lowercase_name, value)` pairs.
///
/// Lines that are neither a continuation nor `name: value` (such as the MBOX
/// `From ` separator) are skipped.
pub fn unfold_headers(text: &str) -> Vec<(String, String)> {
    let mut result: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(last) = result.last_mut() {
                last.1.push(' ');
                last.1.push_str(line.trim());
            }
        } else if let Some((name, value)) = line.split_once(':') {
            if name.contains(' ') {
                continue;
            }
            result.push((name.trim().to_lowercase(), value.trim().to_string()));
        }
    }

    result
}

fn get_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

/// Decode RFC 2047 encoded-words in a header value.
///
/// `"=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="` → `"Hola mundo"`.
/// Tokens that fail to decode are kept as written.
pub fn decode_encoded_words(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    let mut after_word = false;

    while let Some(start) = rest.find("=?") {
        let gap = &rest[..start];
        // Whitespace between two adjacent encoded-words is dropped (§6.2).
        if !(after_word && gap.trim().is_empty()) {
            out.push_str(gap);
        }

        match decode_one_word(&rest[start + 2..]) {
            Some((text, consumed)) => {
                out.push_str(&text);
                rest = &rest[start + 2 + consumed..];
                after_word = true;
            }
            None => {
                out.push_str("=?");
                rest = &rest[start + 2..];
                after_word = false;
            }
        }
    }

    out.push_str(rest);
    out
}

/// Decode `charset?enc?text?=`; returns the text and the bytes consumed.
fn decode_one_word(s: &str) -> Option<(String, usize)> {
    let (charset, rest) = s.split_once('?')?;
    let (encoding, rest) = rest.split_once('?')?;
    let end = rest.find("?=")?;
    let payload = &rest[..end];
    let consumed = charset.len() + 1 + encoding.len() + 1 + end + 2;

    let bytes = match encoding {
        "B" | "b" => STANDARD
            .decode(payload)
            .or_else(|_| STANDARD_NO_PAD.decode(payload.trim_end_matches('=')))
            .ok()?,
        "Q" | "q" => decode_q(payload),
        _ => return None,
    };

    Some((decode_charset(charset, &bytes), consumed))
}

/// Q-encoding: `_` is a space, `=XX` a hex byte.
fn decode_q(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => out.push(b' '),
            b'=' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(b) => {
                        out.push(b);
                        i += 3;
                        continue;
                    }
                    None => out.push(b'='),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    out
}

fn decode_charset(charset: &str, bytes: &[u8]) -> String {
    // RFC 2231 language suffix: "utf-8*nl"
    let label = charset.split('*').next().unwrap_or(charset);
    match encoding_rs::Encoding::for_label(label.as_bytes()) {
        Some(encoding) => encoding.decode(bytes).0.into_owned(),
        None => {
            warn!(charset = label, "Unknown charset, falling back to UTF-8 lossy");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Parse an email date in RFC 2822, RFC 3339, IMAP or common broken formats.
///
/// The sender's UTC offset is kept; dates without a zone are taken as UTC.
pub fn parse_date(date_str: &str) -> Option<DateTime<FixedOffset>> {
    let trimmed = date_str.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt);
    }

    const FORMATS: [&str; 8] = [
        "%d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M:%S",
        "%d-%b-%Y %H:%M:%S %z",
        "%d-%b-%Y %H:%M:%S",
        "%b %d %H:%M:%S %Y",
        "%Y-%m-%d %H:%M:%S %z",
        "%Y-%m-%d %H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
    ];

    let no_dow = strip_day_of_week(trimmed);
    for candidate in [no_dow.to_string(), replace_named_tz(no_dow)] {
        // chrono's %b wants "Jul", IMAP servers send "JUL"
        let candidate = title_case_month(&candidate);
        for fmt in FORMATS {
            if let Ok(dt) = DateTime::parse_from_str(&candidate, fmt) {
                return Some(dt);
            }
            if let Ok(ndt) = NaiveDateTime::parse_from_str(&candidate, fmt) {
                return Some(ndt.and_utc().fixed_offset());
            }
        }
    }

    if let Some(dt) = mail_parser_date(trimmed) {
        return Some(dt);
    }

    warn!(date = trimmed, "Could not parse date");
    None
}

/// Last resort: let `mail-parser` read a synthetic one-header message.
fn mail_parser_date(input: &str) -> Option<DateTime<FixedOffset>> {
    let fake = format!("Date: {input}\n\n");
    let parsed = mail_parser::MessageParser::default().parse(fake.as_bytes())?;
    DateTime::parse_from_rfc3339(&parsed.date()?.to_rfc3339()).ok()
}

fn strip_day_of_week(s: &str) -> &str {
    const DAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
    for day in DAYS {
        if let Some(rest) = s.strip_prefix(day) {
            return rest.trim_start_matches(',').trim();
        }
    }
    s
}

fn title_case_month(s: &str) -> String {
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    let mut out = s.to_string();
    for month in MONTHS {
        let upper = month.to_uppercase();
        if out.contains(&upper) {
            out = out.replacen(&upper, month, 1);
            break;
        }
    }
    out
}

fn replace_named_tz(s: &str) -> String {
    const ZONES: [(&str, &str); 13] = [
        ("CEST", "+0200"),
        ("EST", "-0500"),
        ("EDT", "-0400"),
        ("CST", "-0600"),
        ("CDT", "-0500"),
        ("MST", "-0700"),
        ("MDT", "-0600"),
        ("PST", "-0800"),
        ("PDT", "-0700"),
        ("GMT", "+0000"),
        ("UTC", "+0000"),
        ("CET", "+0100"),
        ("JST", "+0900"),
    ];
    for (name, offset) in ZONES {
        if let Some(head) = s.strip_suffix(name) {
            return format!("{head}{offset}");
        }
    }
    s.to_string()
}
