//! Chunked fetch driver: walks the date range window by window and feeds
//! fixed-size batches to the reconciler.

use chrono::{Duration, NaiveDate};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{error, info};

use crate::audit::AuditSink;
use crate::error::Result;
use crate::mailbox::MailSource;
use crate::model::classification::Provenance;
use crate::model::message::MailMessage;
use crate::reconcile::BatchReconciler;

/// Parameters of one run. The numeric settings are clamped to their
/// minimums on construction and cannot be changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    date_from: NaiveDate,
    date_to: NaiveDate,
    chunk_days: u32,
    batch_size: usize,
    max_body_chars: usize,
}

impl RunContext {
    pub const MIN_BODY_CHARS: usize = 50;

    pub fn new(
        date_from: NaiveDate,
        date_to: NaiveDate,
        chunk_days: u32,
        batch_size: usize,
        max_body_chars: usize,
    ) -> Self {
        Self {
            date_from,
            date_to,
            chunk_days: chunk_days.max(1),
            batch_size: batch_size.max(1),
            max_body_chars: max_body_chars.max(Self::MIN_BODY_CHARS),
        }
    }

    pub fn date_from(&self) -> NaiveDate {
        self.date_from
    }

    pub fn date_to(&self) -> NaiveDate {
        self.date_to
    }

    pub fn chunk_days(&self) -> u32 {
        self.chunk_days
    }

    /// Always at least 1.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn max_body_chars(&self) -> usize {
        self.max_body_chars
    }

    pub fn windows(&self) -> DateWindows {
        DateWindows::new(self.date_from, self.date_to, self.chunk_days)
    }
}

/// Half-open day windows `[start, end)` covering `[from, to)`.
#[derive(Debug, Clone)]
pub struct DateWindows {
    current: NaiveDate,
    to: NaiveDate,
    step: Duration,
}

impl DateWindows {
    pub fn new(from: NaiveDate, to: NaiveDate, chunk_days: u32) -> Self {
        Self {
            current: from,
            to,
            step: Duration::days(i64::from(chunk_days.max(1))),
        }
    }
}

impl Iterator for DateWindows {
    type Item = (NaiveDate, NaiveDate);

    fn next(&mut self) -> Option<Self::Item> {
        if self.current >= self.to {
            return None;
        }
        let start = self.current;
        let end = start
            .checked_add_signed(self.step)
            .map_or(self.to, |d| d.min(self.to));
        self.current = end;
        Some((start, end))
    }
}

/// Totals for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub windows: usize,
    pub failed_windows: usize,
    pub batches: usize,
    pub messages: usize,
    pub from_cache: usize,
    pub from_model: usize,
    pub unknown: usize,
}

/// Fetch one window, turning a source error into an audited empty window.
pub fn fetch_window(
    source: &mut dyn MailSource,
    start: NaiveDate,
    end: NaiveDate,
    audit: &dyn AuditSink,
) -> Option<Vec<MailMessage>> {
    info!(%start, %end, "Fetching window");
    match source.fetch(start, end) {
        Ok(messages) => {
            info!(%start, %end, count = messages.len(), "Fetched window");
            Some(messages)
        }
        Err(e) => {
            audit.event("imap_fetch", &format!("IMAP fetch error: {e}"));
            error!(%start, %end, error = %e, "Fetch failed, skipping window");
            None
        }
    }
}

/// Run the whole pipeline over `ctx`'s date range.
///
/// Fetch and classification problems are audited and skipped. Only a
/// failing cache write aborts the run.
pub fn run(
    ctx: &RunContext,
    source: &mut dyn MailSource,
    reconciler: &mut BatchReconciler<'_>,
    audit: &dyn AuditSink,
    progress: bool,
) -> Result<RunSummary> {
    let windows: Vec<(NaiveDate, NaiveDate)> = ctx.windows().collect();
    let mut summary = RunSummary::default();

    let pb = if progress {
        let pb = ProgressBar::new(windows.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} windows {msg}")
                .expect("valid template")
                .progress_chars("#>-"),
        );
        pb
    } else {
        ProgressBar::hidden()
    };

    for (start, end) in windows {
        summary.windows += 1;
        pb.set_message(format!("{start}..{end}"));

        let Some(messages) = fetch_window(source, start, end, audit) else {
            summary.failed_windows += 1;
            pb.inc(1);
            continue;
        };

        for batch in messages.chunks(ctx.batch_size()) {
            let results = reconciler.reconcile(batch)?;
            summary.batches += 1;
            summary.messages += results.len();
            for r in &results {
                match r.bron {
                    Provenance::Cache => summary.from_cache += 1,
                    Provenance::Model(_) => summary.from_model += 1,
                    Provenance::Unknown => summary.unknown += 1,
                }
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!(
        windows = summary.windows,
        batches = summary.batches,
        messages = summary.messages,
        cache = summary.from_cache,
        model = summary.from_model,
        unknown = summary.unknown,
        "Run complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use crate::audit::EmailRecord;
    use crate::cache::SenderCache;
    use crate::classifier::{Classifier, Prompts};
    use crate::error::MailsortError;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[derive(Default)]
    struct Recorder(RefCell<Vec<(String, String)>>);

    impl AuditSink for Recorder {
        fn event(&self, context: &str, message: &str) {
            self.0.borrow_mut().push((context.into(), message.into()));
        }
        fn email(&self, _record: &EmailRecord<'_>) {}
        fn payload(&self, _json: &str, _prompt: &str) {}
    }

    /// Returns `per_window` messages for every window except the ones listed in `fail`.
    struct FakeSource {
        per_window: usize,
        fail: Vec<NaiveDate>,
        calls: Vec<(NaiveDate, NaiveDate)>,
    }

    impl MailSource for FakeSource {
        fn fetch(&mut self, from: NaiveDate, to: NaiveDate) -> Result<Vec<MailMessage>> {
            self.calls.push((from, to));
            if self.fail.contains(&from) {
                return Err(MailsortError::io(
                    "imap://inbox",
                    std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset"),
                ));
            }
            Ok((0..self.per_window)
                .map(|i| MailMessage {
                    from: format!("{i}@{from}"),
                    ..Default::default()
                })
                .collect())
        }
    }

    #[test]
    fn test_three_day_windows() {
        let got: Vec<_> = DateWindows::new(d(2025, 1, 1), d(2025, 1, 8), 3).collect();
        assert_eq!(
            got,
            vec![
                (d(2025, 1, 1), d(2025, 1, 4)),
                (d(2025, 1, 4), d(2025, 1, 7)),
                (d(2025, 1, 7), d(2025, 1, 8)),
            ]
        );
    }

    #[test]
    fn test_empty_range_has_no_windows() {
        assert_eq!(DateWindows::new(d(2025, 1, 8), d(2025, 1, 8), 3).count(), 0);
        assert_eq!(DateWindows::new(d(2025, 1, 9), d(2025, 1, 8), 3).count(), 0);
    }

    #[test]
    fn test_run_context_clamps() {
        let ctx = RunContext::new(d(2025, 1, 1), d(2025, 1, 2), 0, 0, 10);
        assert_eq!(ctx.chunk_days(), 1);
        assert_eq!(ctx.batch_size(), 1);
        assert_eq!(ctx.max_body_chars(), 50);
    }

    #[test]
    fn test_run_batches_and_survives_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let audit = Recorder::default();
        let mut cache = SenderCache::load(dir.path().join("cache.json"), &audit).unwrap();
        let classifier = Classifier::new(None, Prompts::default(), 250);
        let mut reconciler = BatchReconciler::new(&mut cache, &classifier, &audit, "gpt-test");

        let ctx = RunContext::new(d(2025, 1, 1), d(2025, 1, 8), 3, 2, 250);
        let mut source = FakeSource {
            per_window: 5,
            fail: vec![d(2025, 1, 4)],
            calls: Vec::new(),
        };

        let summary = run(&ctx, &mut source, &mut reconciler, &audit, false).unwrap();

        assert_eq!(source.calls.len(), 3);
        assert_eq!(summary.windows, 3);
        assert_eq!(summary.failed_windows, 1);
        assert_eq!(summary.batches, 6);
        assert_eq!(summary.messages, 10);
        assert_eq!(summary.unknown, 10);

        let events = audit.0.borrow();
        let fetch_errors: Vec<_> = events.iter().filter(|(c, _)| c == "imap_fetch").collect();
        assert_eq!(fetch_errors.len(), 1);
        assert!(fetch_errors[0].1.starts_with("IMAP fetch error:"));
    }

    #[test]
    fn test_run_with_zero_batch_size_sends_single_messages() {
        let dir = tempfile::tempdir().unwrap();
        let audit = Recorder::default();
        let mut cache = SenderCache::load(dir.path().join("cache.json"), &audit).unwrap();
        let classifier = Classifier::new(None, Prompts::default(), 250);
        let mut reconciler = BatchReconciler::new(&mut cache, &classifier, &audit, "gpt-test");

        let ctx = RunContext::new(d(2025, 1, 1), d(2025, 1, 2), 0, 0, 0);
        let mut source = FakeSource {
            per_window: 3,
            fail: Vec::new(),
            calls: Vec::new(),
        };

        let summary = run(&ctx, &mut source, &mut reconciler, &audit, false).unwrap();

        assert_eq!(summary.windows, 1);
        assert_eq!(summary.batches, 3);
        assert_eq!(summary.messages, 3);
    }
}
