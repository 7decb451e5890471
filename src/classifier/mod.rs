//! Classifier gateway: one model call per batch of unknown messages.
//!
//! Failures never propagate. The caller only sees whether a result exists;
//! the reason is recorded in the audit log.

pub mod openai;
pub mod prompts;

use std::collections::BTreeMap;

use tracing::{debug, error, info};

use crate::audit::AuditSink;
use crate::extract;
use crate::model::message::{MailMessage, MessageSummary};

pub use self::openai::{ChatBackend, OpenAiChat};
pub use self::prompts::Prompts;

pub struct Classifier {
    backend: Option<Box<dyn ChatBackend>>,
    prompts: Prompts,
    max_body_chars: usize,
}

impl Classifier {
    /// `backend` is `None` when no API key is configured; every batch then
    /// reports unavailable.
    pub fn new(backend: Option<Box<dyn ChatBackend>>, prompts: Prompts, max_body_chars: usize) -> Self {
        Self {
            backend,
            prompts,
            max_body_chars,
        }
    }

    /// Classify a batch. Keys of the returned map are positions in `batch`.
    ///
    /// Returns `Some(empty)` for an empty batch without calling the model and
    /// `None` when the model is unavailable or the call fails.
    pub fn batch_classify(
        &self,
        batch: &[&MailMessage],
        audit: &dyn AuditSink,
    ) -> Option<BTreeMap<usize, String>> {
        if batch.is_empty() {
            return Some(BTreeMap::new());
        }

        let Some(backend) = &self.backend else {
            audit.event("gpt_exception", "OPENAI_API_KEY ontbreekt");
            error!("No API key configured, skipping model classification");
            return None;
        };

        let summaries = self.build_payload(batch, audit);
        let json = match serde_json::to_string(&summaries) {
            Ok(json) => json,
            Err(e) => {
                audit.event("gpt_exception", &format!("Batch size={}: {e}", batch.len()));
                error!(error = %e, "Could not serialize batch payload");
                return None;
            }
        };
        let user_prompt = self.prompts.render(&json);
        audit.payload(&json, &user_prompt);

        debug!(size = batch.len(), "Sending batch to model");
        match backend.complete(&self.prompts.system, &user_prompt) {
            Ok(raw) => {
                let results = parse_response(&raw);
                let msg = format!("Classified {}/{} mails", results.len(), batch.len());
                info!("{msg}");
                audit.event("gpt_ok", &msg);
                Some(results)
            }
            Err(e) => {
                audit.event("gpt_exception", &format!("Batch size={}: {e:#}", batch.len()));
                error!(size = batch.len(), error = %format!("{e:#}"), "Model classification failed");
                None
            }
        }
    }

    fn build_payload(&self, batch: &[&MailMessage], audit: &dyn AuditSink) -> Vec<MessageSummary> {
        batch
            .iter()
            .enumerate()
            .map(|(idx, msg)| extract::summarize(idx, msg, self.max_body_chars, audit))
            .collect()
    }
}

/// Parse `index=<n>;categorie=<name>` lines into position → category.
///
/// Other lines are ignored. A line that starts with `index=` but is otherwise
/// malformed is skipped on its own. Categories are lower-cased; a later line
/// for the same index wins.
pub fn parse_response(raw: &str) -> BTreeMap<usize, String> {
    let mut results = BTreeMap::new();
    for line in raw.lines() {
        if !line.to_lowercase().starts_with("index=") {
            continue;
        }
        match parse_line(line) {
            Some((idx, cat)) => {
                results.insert(idx, cat);
            }
            None => debug!(line, "Skipping malformed result line"),
        }
    }
    results
}

fn parse_line(line: &str) -> Option<(usize, String)> {
    let fields: Vec<&str> = line.split(';').collect();
    let [index_field, category_field] = fields.as_slice() else {
        return None;
    };
    let idx = index_field.split('=').nth(1)?.trim().parse::<usize>().ok()?;
    let cat = category_field.split('=').nth(1)?.trim().to_lowercase();
    (!cat.is_empty()).then_some((idx, cat))
}
