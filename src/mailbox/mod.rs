//! Mail retrieval: the [`MailSource`] seam and the local mailbox sources.
//!
//! A source answers "which messages were sent in `[from, to)`", newest first,
//! as fully decoded [`MailMessage`] records. Failures are per call; the fetch
//! driver decides what a failed window means for the run.

pub mod eml_dir;
pub mod mbox;

use std::path::Path;

use chrono::{DateTime, FixedOffset, NaiveDate};

use crate::error::{MailsortError, Result};
use crate::model::message::MailMessage;

pub use eml_dir::EmlDirMailbox;
pub use mbox::MboxMailbox;

/// A mailbox that can be queried by half-open date interval.
pub trait MailSource {
    /// Messages dated in `[from, to)`, newest first.
    fn fetch(&mut self, from: NaiveDate, to: NaiveDate) -> Result<Vec<MailMessage>>;
}

impl<S: MailSource + ?Sized> MailSource for Box<S> {
    fn fetch(&mut self, from: NaiveDate, to: NaiveDate) -> Result<Vec<MailMessage>> {
        (**self).fetch(from, to)
    }
}

/// Open the mailbox at `path`: a directory of `.eml` files or an MBOX file.
pub fn open_source(path: &Path) -> Result<Box<dyn MailSource>> {
    if path.is_dir() {
        Ok(Box::new(EmlDirMailbox::open(path)?))
    } else if path.exists() {
        Ok(Box::new(MboxMailbox::open(path)?))
    } else {
        Err(MailsortError::FileNotFound(path.to_path_buf()))
    }
}

/// Whether a message date falls inside `[from, to)` by UTC calendar day.
pub(crate) fn in_window(
    date: Option<DateTime<FixedOffset>>,
    from: NaiveDate,
    to: NaiveDate,
) -> bool {
    date.map(|d| d.naive_utc().date())
        .is_some_and(|day| from <= day && day < to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_in_window_is_half_open() {
        let from = day("2025-01-01");
        let to = day("2025-01-04");
        let utc = FixedOffset::east_opt(0).unwrap();
        let at = |d: u32, h: u32| Some(utc.with_ymd_and_hms(2025, 1, d, h, 0, 0).unwrap());

        assert!(in_window(at(1, 0), from, to));
        assert!(in_window(at(3, 23), from, to));
        assert!(!in_window(at(4, 0), from, to));
        assert!(!in_window(None, from, to));
    }

    #[test]
    fn test_in_window_uses_utc_day() {
        let plus2 = FixedOffset::east_opt(2 * 3600).unwrap();
        // 01:00 on the 4th at +02:00 is still the 3rd in UTC.
        let date = plus2.with_ymd_and_hms(2025, 1, 4, 1, 0, 0).single();
        assert!(in_window(date, day("2025-01-01"), day("2025-01-04")));
    }

    #[test]
    fn test_open_source_missing_path() {
        assert!(matches!(
            open_source(Path::new("/nonexistent/mailbox")),
            Err(MailsortError::FileNotFound(_))
        ));
    }
}
