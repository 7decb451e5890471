//! MIME message decoding: envelope plus text/HTML bodies, and HTML reduction
//! to visible text.

use mail_parser::{MessageParser, PartType};

use crate::error::{MailsortError, Result};
use crate::model::message::MailMessage;
use crate::parser::header;

/// Decode a complete raw message (optionally MBOX-framed) into a [`MailMessage`].
///
/// Envelope fields come from our own header decoding so they are identical to
/// what the MBOX scan saw; bodies come from `mail-parser`. A message that
/// `mail-parser` rejects still yields its headers and a best-effort text body.
pub fn decode_message(raw_message: &[u8]) -> MailMessage {
    let message_bytes = skip_from_line(raw_message);
    let (head, body) = split_head(message_bytes);
    let envelope = header::parse_envelope(head);

    let (text, html) = match MessageParser::default().parse(message_bytes) {
        Some(parsed) => {
            let text = parsed.text_bodies().find_map(|part| match &part.body {
                PartType::Text(t) => Some(t.to_string()),
                _ => None,
            });
            let html = parsed.html_bodies().find_map(|part| match &part.body {
                PartType::Html(h) => Some(h.to_string()),
                _ => None,
            });
            (text, html)
        }
        None => (Some(String::from_utf8_lossy(body).into_owned()), None),
    };

    MailMessage {
        from: envelope.from,
        to: envelope.to,
        cc: envelope.cc,
        date: envelope.date,
        subject: envelope.subject,
        text,
        html,
        headers: envelope.headers,
    }
}

/// Skip the `From ` separator line at the start of MBOX messages.
pub(crate) fn skip_from_line(data: &[u8]) -> &[u8] {
    let data = data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data);
    if data.starts_with(b"From ") {
        if let Some(pos) = data.iter().position(|&b| b == b'\n') {
            return &data[pos + 1..];
        }
    }
    data
}

/// Split a message at the first blank line into `(headers, body)`.
pub(crate) fn split_head(data: &[u8]) -> (&[u8], &[u8]) {
    for i in 0..data.len() {
        if data[i..].starts_with(b"\n\n") {
            return (&data[..i + 1], &data[i + 2..]);
        }
        if data[i..].starts_with(b"\r\n\r\n") {
            return (&data[..i + 2], &data[i + 4..]);
        }
    }
    (data, &[])
}

/// Column width for HTML rendering; callers collapse the wrapped lines again.
const HTML_RENDER_WIDTH: usize = 400;

/// Reduce an HTML document to its visible text.
///
/// Parsing is as lenient as a browser: a stray `<` in body text stays text and
/// a tag cut off at the end of the input is dropped. `<script>`, `<style>` and
/// `<head>` content is not rendered. Whitespace is left as found; callers
/// collapse it.
pub fn visible_text(html: &str) -> Result<String> {
    html2text::config::plain_no_decorate()
        .raw_mode(true)
        .string_from_read(html.as_bytes(), HTML_RENDER_WIDTH)
        .map_err(|e| MailsortError::MalformedHtml(e.to_string()))
}
