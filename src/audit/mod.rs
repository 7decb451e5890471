//! Audit trail: the [`AuditSink`] seam and its CSV implementation.
//!
//! Three append-only streams: run events (`tijd;context;event`), one row per
//! classified message, and an optional transcript of model payloads.

pub mod csv;

use chrono::{DateTime, FixedOffset};

use crate::model::classification::Provenance;

pub use self::csv::CsvAuditLog;

/// Timestamp format shared by every audit column.
pub const DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// One row of the per-message log.
#[derive(Debug, Clone, Copy)]
pub struct EmailRecord<'a> {
    pub date: Option<DateTime<FixedOffset>>,
    pub categorie: &'a str,
    pub sender: &'a str,
    pub subject: &'a str,
    pub bron: &'a Provenance,
}

/// Append-only audit destination.
///
/// Sinks swallow their own write failures (logging them); an audit problem
/// never stops classification.
pub trait AuditSink {
    /// Record a run event under a short context tag such as `gpt_ok`.
    fn event(&self, context: &str, message: &str);

    /// Record the outcome for one message.
    fn email(&self, record: &EmailRecord<'_>);

    /// Record the serialized summaries and the rendered prompt of one model call.
    fn payload(&self, json: &str, prompt: &str);
}

impl<T: AuditSink + ?Sized> AuditSink for &T {
    fn event(&self, context: &str, message: &str) {
        (**self).event(context, message)
    }

    fn email(&self, record: &EmailRecord<'_>) {
        (**self).email(record)
    }

    fn payload(&self, json: &str, prompt: &str) {
        (**self).payload(json, prompt)
    }
}
