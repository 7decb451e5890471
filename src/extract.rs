//! Text and feature extraction: turns a [`MailMessage`] into the compact
//! [`MessageSummary`] the model sees.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::audit::AuditSink;
use crate::error::Result;
use crate::model::message::{MailMessage, MessageSummary, RelevantHeaders};
use crate::parser::mime;

/// Bare URLs in plain text.
static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)(https?://[^\s"'>)]+)"#).expect("valid URL regex"));

/// `href="…"` and `href='…'` attribute values.
static HREF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)href=["']([^"']+)["']"#).expect("valid href regex"));

static WHITESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Substrings that mark a body as HTML rather than text.
const HTML_MARKERS: [&str; 5] = ["<html", "<body", "<div", "<table", "<span"];

/// Build the summary record for the message at `index` in its batch.
pub fn summarize(
    index: usize,
    msg: &MailMessage,
    max_chars: usize,
    audit: &dyn AuditSink,
) -> MessageSummary {
    let body_snippet = extract_text(msg, max_chars, audit);
    let urls = extract_urls(&body_snippet, msg.html.as_deref());

    MessageSummary {
        index,
        subject: msg.subject.clone(),
        from: msg.from.clone(),
        to: msg.to.clone(),
        cc: msg.cc.clone(),
        date: msg.date.map(|d| d.to_rfc3339()).unwrap_or_default(),
        body_snippet,
        urls,
        headers: extract_headers(msg),
    }
}

/// Visible body text, whitespace-collapsed and cut to `max_chars` characters.
///
/// Prefers the plain-text body, then the HTML body. Bodies that look like HTML
/// are reduced to visible text; if that fails the raw body is used as is and an
/// `extract_text` event is recorded.
pub fn extract_text(msg: &MailMessage, max_chars: usize, audit: &dyn AuditSink) -> String {
    let body = [msg.text.as_deref(), msg.html.as_deref()]
        .into_iter()
        .flatten()
        .find(|b| !b.is_empty())
        .unwrap_or("");

    let lower = body.to_lowercase();
    let text = if HTML_MARKERS.iter().any(|m| lower.contains(m)) {
        visible_or_raw(body, mime::visible_text(body), audit)
    } else {
        body.to_string()
    };

    let collapsed = WHITESPACE_RE.replace_all(&text, " ");
    collapsed.trim().chars().take(max_chars).collect()
}

fn visible_or_raw(body: &str, reduced: Result<String>, audit: &dyn AuditSink) -> String {
    match reduced {
        Ok(visible) => visible,
        Err(e) => {
            audit.event("extract_text", &format!("HTML parse error: {e}"));
            warn!(error = %e, "HTML reduction failed, using raw body");
            body.to_string()
        }
    }
}

/// URLs found in the text plus `href` targets in the raw HTML.
pub fn extract_urls(text: &str, html: Option<&str>) -> BTreeSet<String> {
    let mut urls: BTreeSet<String> = URL_RE
        .captures_iter(text)
        .map(|c| c[1].trim().to_string())
        .collect();

    if let Some(html) = html {
        urls.extend(HREF_RE.captures_iter(html).map(|c| c[1].trim().to_string()));
    }

    urls
}

/// The fixed header set, trimmed and lower-cased.
pub fn extract_headers(msg: &MailMessage) -> RelevantHeaders {
    let norm = |name: &str| {
        msg.header(name)
            .map(|v| v.trim().to_lowercase())
            .unwrap_or_default()
    };

    RelevantHeaders {
        spf: norm("Authentication-Results"),
        dkim: norm("DKIM-Signature"),
        dmarc: norm("DMARC-Filter"),
        return_path: norm("Return-Path"),
        message_id: norm("Message-ID"),
        list_id: norm("List-ID"),
        list_unsubscribe: norm("List-Unsubscribe"),
        precedence: norm("Precedence"),
        x_mailer: norm("X-Mailer"),
        x_spam_flag: norm("X-Spam-Flag"),
        x_spam_status: norm("X-Spam-Status"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use crate::audit::EmailRecord;
    use crate::error::MailsortError;

    #[derive(Default)]
    struct Events(RefCell<Vec<(String, String)>>);

    impl AuditSink for Events {
        fn event(&self, context: &str, message: &str) {
            self.0.borrow_mut().push((context.to_string(), message.to_string()));
        }
        fn email(&self, _record: &EmailRecord<'_>) {}
        fn payload(&self, _json: &str, _prompt: &str) {}
    }

    fn text_of(msg: &MailMessage, max_chars: usize) -> String {
        extract_text(msg, max_chars, &Events::default())
    }

    fn message(text: Option<&str>, html: Option<&str>) -> MailMessage {
        MailMessage {
            text: text.map(String::from),
            html: html.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_prefers_plain_text() {
        let msg = message(Some("  Hallo\n\n  daar  "), Some("<div>html</div>"));
        assert_eq!(text_of(&msg, 250), "Hallo daar");
    }

    #[test]
    fn test_falls_back_to_html_when_text_empty() {
        let msg = message(
            Some(""),
            Some("<html><style>.x{}</style><body><p>Uw   factuur</p><script>x()</script></body></html>"),
        );
        assert_eq!(text_of(&msg, 250), "Uw factuur");
    }

    #[test]
    fn test_no_body_is_empty() {
        assert_eq!(text_of(&message(None, None), 250), "");
    }

    #[test]
    fn test_text_without_markers_kept_verbatim() {
        // A lone <b> is not one of the structural markers.
        let msg = message(Some("a <b>b</b> c"), None);
        assert_eq!(text_of(&msg, 250), "a <b>b</b> c");
    }

    #[test]
    fn test_stray_less_than_keeps_body_text() {
        let msg = message(None, Some("<div>Korting: 5 < 10 euro</div><p>Meer info</p>"));
        assert_eq!(text_of(&msg, 250), "Korting: 5 < 10 euro Meer info");
    }

    #[test]
    fn test_truncated_html_yields_text_not_tags() {
        let audit = Events::default();
        let msg = message(Some("<html><body><p>Uw factuur staat klaar</p><a href"), None);
        assert_eq!(extract_text(&msg, 250, &audit), "Uw factuur staat klaar");
        assert!(audit.0.borrow().is_empty());
    }

    #[test]
    fn test_failed_reduction_uses_raw_body_and_records_event() {
        let audit = Events::default();
        let reduced = Err(MailsortError::MalformedHtml("too narrow".into()));
        assert_eq!(visible_or_raw("<div>Kapot", reduced, &audit), "<div>Kapot");
        assert_eq!(
            *audit.0.borrow(),
            vec![("extract_text".to_string(), "HTML parse error: Malformed HTML: too narrow".to_string())]
        );
    }

    #[test]
    fn test_truncates_on_characters() {
        let msg = message(Some("ééééé"), None);
        assert_eq!(text_of(&msg, 3), "ééé");
    }

    #[test]
    fn test_extract_urls_dedups_text_and_href() {
        let urls = extract_urls(
            "zie https://shop.nl/a en http://x.nl/b) of https://shop.nl/a",
            Some(r#"<a href="https://shop.nl/a">a</a><a HREF='https://shop.nl/unsub'>u</a>"#),
        );
        let got: Vec<&str> = urls.iter().map(String::as_str).collect();
        assert_eq!(
            got,
            vec!["http://x.nl/b", "https://shop.nl/a", "https://shop.nl/unsub"]
        );
    }

    #[test]
    fn test_extract_urls_without_html() {
        assert!(extract_urls("geen links", None).is_empty());
    }

    #[test]
    fn test_extract_headers_normalizes() {
        let msg = MailMessage {
            headers: vec![
                ("list-unsubscribe".into(), "  <MAILTO:Unsub@Shop.NL> ".into()),
                ("x-spam-flag".into(), "NO".into()),
            ],
            ..Default::default()
        };
        let h = extract_headers(&msg);
        assert_eq!(h.list_unsubscribe, "<mailto:unsub@shop.nl>");
        assert_eq!(h.x_spam_flag, "no");
        assert_eq!(h.dkim, "");
    }

    #[test]
    fn test_summarize_carries_index_and_date() {
        use chrono::TimeZone;
        let msg = MailMessage {
            from: "a@b.nl".into(),
            subject: "Test".into(),
            date: chrono::FixedOffset::east_opt(3600)
                .and_then(|tz| tz.with_ymd_and_hms(2025, 1, 2, 10, 0, 0).single()),
            text: Some("Kijk op https://b.nl".into()),
            ..Default::default()
        };
        let s = summarize(4, &msg, 250, &Events::default());
        assert_eq!(s.index, 4);
        assert_eq!(s.date, "2025-01-02T10:00:00+01:00");
        assert!(s.urls.contains("https://b.nl"));
    }
}
