//! Message records handed over by a mail source, and the compact summary
//! sent to the model.

use std::collections::BTreeSet;

use chrono::{DateTime, FixedOffset};
use serde::Serialize;

/// A fully decoded message as delivered by a [`crate::mailbox::MailSource`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MailMessage {
    /// Bare sender address, empty when the message has no `From:`.
    pub from: String,

    /// Comma-joined `To:` addresses.
    pub to: String,

    /// Comma-joined `Cc:` addresses.
    pub cc: String,

    /// Parsed `Date:` header.
    pub date: Option<DateTime<FixedOffset>>,

    /// Decoded subject line.
    pub subject: String,

    /// `text/plain` body, if the message has one.
    pub text: Option<String>,

    /// `text/html` body, if the message has one.
    pub html: Option<String>,

    /// Unfolded headers as `(lowercase_name, value)` in message order.
    pub headers: Vec<(String, String)>,
}

impl MailMessage {
    /// First value of a header, looked up case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Per-message record serialized into the classification prompt.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MessageSummary {
    pub index: usize,
    pub subject: String,
    pub from: String,
    pub to: String,
    pub cc: String,
    pub date: String,
    pub body_snippet: String,
    pub urls: BTreeSet<String>,
    pub headers: RelevantHeaders,
}

/// The fixed set of headers that help tell newsletters, spam and personal
/// mail apart. Values are trimmed and lower-cased, empty when absent.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RelevantHeaders {
    pub spf: String,
    pub dkim: String,
    pub dmarc: String,
    pub return_path: String,
    pub message_id: String,
    pub list_id: String,
    pub list_unsubscribe: String,
    pub precedence: String,
    pub x_mailer: String,
    pub x_spam_flag: String,
    pub x_spam_status: String,
}
