//! MBOX-backed mail source.

use std::path::Path;

use chrono::{DateTime, FixedOffset, NaiveDate};
use tracing::{debug, info};

use crate::error::Result;
use crate::model::message::MailMessage;
use crate::parser::mbox::MboxParser;
use crate::parser::{header, mime};

use super::{in_window, MailSource};

/// Location and date of one message inside the MBOX file.
#[derive(Debug, Clone, Copy)]
struct Slot {
    offset: u64,
    length: u64,
    date: Option<DateTime<FixedOffset>>,
}

/// An MBOX file scanned once on open; each fetch seeks straight to the
/// messages of the requested window.
pub struct MboxMailbox {
    parser: MboxParser,
    slots: Vec<Slot>,
}

impl MboxMailbox {
    /// Scan the MBOX and record where every message lives and when it was sent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let parser = MboxParser::new(path)?;
        let mut slots = Vec::new();

        parser.parse(&mut |offset, bytes| {
            let (head, _) = mime::split_head(bytes);
            slots.push(Slot {
                offset,
                length: bytes.len() as u64,
                date: header::parse_date_header(head),
            });
            true
        })?;

        info!(
            path = %parser.path().display(),
            messages = slots.len(),
            undated = slots.iter().filter(|s| s.date.is_none()).count(),
            "Scanned mailbox"
        );

        Ok(Self { parser, slots })
    }

    /// Number of messages in the file.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl MailSource for MboxMailbox {
    fn fetch(&mut self, from: NaiveDate, to: NaiveDate) -> Result<Vec<MailMessage>> {
        let mut selected: Vec<Slot> = self
            .slots
            .iter()
            .filter(|s| in_window(s.date, from, to))
            .copied()
            .collect();
        selected.sort_by(|a, b| b.date.cmp(&a.date));

        debug!(%from, %to, count = selected.len(), "Reading window from MBOX");

        selected
            .iter()
            .map(|slot| {
                let raw = self.parser.read_message_at(slot.offset, slot.length)?;
                Ok(mime::decode_message(&raw))
            })
            .collect()
    }
}
