//! Batch reconciler: cache lookup, model fallback for the misses, and merge
//! back into original message order.

use tracing::{info, warn};

use crate::audit::{AuditSink, EmailRecord};
use crate::cache::SenderCache;
use crate::classifier::Classifier;
use crate::error::Result;
use crate::model::classification::{ClassificationResult, NO_SUBJECT};
use crate::model::message::MailMessage;

pub struct BatchReconciler<'a> {
    cache: &'a mut SenderCache,
    classifier: &'a Classifier,
    audit: &'a dyn AuditSink,
    model: String,
}

impl<'a> BatchReconciler<'a> {
    /// `model` is the identifier recorded as provenance for model results.
    pub fn new(
        cache: &'a mut SenderCache,
        classifier: &'a Classifier,
        audit: &'a dyn AuditSink,
        model: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            classifier,
            audit,
            model: model.into(),
        }
    }

    /// Classify one batch and return a result per message, in batch order.
    ///
    /// The cache is saved at most once, and only if the model produced at
    /// least one usable category. An unavailable model leaves the misses as
    /// unknown; only a failing cache write is an error.
    pub fn reconcile(&mut self, batch: &[MailMessage]) -> Result<Vec<ClassificationResult>> {
        let mut results = vec![ClassificationResult::unknown(); batch.len()];
        let mut unknown: Vec<(usize, &MailMessage)> = Vec::new();

        for (idx, msg) in batch.iter().enumerate() {
            match self.cache.get_category(&msg.from) {
                Some(cat) => results[idx] = ClassificationResult::cached(cat),
                None => unknown.push((idx, msg)),
            }
        }

        if !unknown.is_empty() {
            let misses: Vec<&MailMessage> = unknown.iter().map(|(_, m)| *m).collect();
            let classified = match self.classifier.batch_classify(&misses, self.audit) {
                Some(map) => map,
                None => {
                    self.audit
                        .event("batch_fail", "GPT batch kon niet worden geclassificeerd");
                    warn!(size = misses.len(), "Model batch could not be classified");
                    Default::default()
                }
            };

            let mut updated = false;
            for (rel, category) in classified {
                let Some(&(orig, msg)) = unknown.get(rel) else {
                    continue;
                };
                results[orig] = ClassificationResult::model(category.as_str(), self.model.as_str());
                let subject = if msg.subject.is_empty() {
                    NO_SUBJECT
                } else {
                    msg.subject.as_str()
                };
                self.cache.update(&msg.from, &category, subject);
                updated = true;
            }

            if updated {
                self.cache.save()?;
            }
        }

        for (msg, result) in batch.iter().zip(&results) {
            self.audit.email(&EmailRecord {
                date: msg.date,
                categorie: &result.categorie,
                sender: &msg.from,
                subject: &msg.subject,
                bron: &result.bron,
            });
            let short: String = msg.subject.chars().take(60).collect();
            info!("[{}] {} -> {} ({})", result.categorie, short, msg.from, result.bron);
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use crate::classifier::{ChatBackend, Prompts};
    use crate::model::classification::Provenance;

    #[derive(Default)]
    struct Recorder {
        events: RefCell<Vec<String>>,
        emails: RefCell<Vec<(String, String, String)>>,
    }

    impl AuditSink for Recorder {
        fn event(&self, context: &str, _message: &str) {
            self.events.borrow_mut().push(context.to_string());
        }
        fn email(&self, r: &EmailRecord<'_>) {
            self.emails
                .borrow_mut()
                .push((r.sender.to_string(), r.categorie.to_string(), r.bron.to_string()));
        }
        fn payload(&self, _json: &str, _prompt: &str) {}
    }

    /// Replies with a fixed text and remembers how many messages each call carried.
    struct Scripted {
        reply: String,
        seen: RefCell<Vec<usize>>,
    }

    impl ChatBackend for std::rc::Rc<Scripted> {
        fn complete(&self, _system: &str, user: &str) -> anyhow::Result<String> {
            self.seen.borrow_mut().push(user.matches("\"index\":").count());
            Ok(self.reply.clone())
        }
    }

    fn msg(from: &str, subject: &str) -> MailMessage {
        MailMessage {
            from: from.into(),
            subject: subject.into(),
            ..Default::default()
        }
    }

    fn empty_cache(dir: &tempfile::TempDir) -> SenderCache {
        SenderCache::load(dir.path().join("cache.json"), &Recorder::default()).unwrap()
    }

    #[test]
    fn test_merges_model_results_into_original_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = empty_cache(&dir);
        cache.update("a@x.nl", "werk", "s");
        cache.update("c@x.nl", "prive", "s");

        let backend = std::rc::Rc::new(Scripted {
            reply: "index=0;categorie=spam\nindex=2;categorie=nieuwsbrief\nindex=9;categorie=x".into(),
            seen: RefCell::new(Vec::new()),
        });
        let classifier = Classifier::new(Some(Box::new(backend.clone())), Prompts::default(), 250);
        let audit = Recorder::default();

        let batch = vec![
            msg("a@x.nl", "A"),
            msg("b@x.nl", "B"),
            msg("c@x.nl", "C"),
            msg("d@x.nl", "D"),
            msg("e@x.nl", ""),
        ];
        let mut reconciler = BatchReconciler::new(&mut cache, &classifier, &audit, "gpt-test");
        let results = reconciler.reconcile(&batch).unwrap();

        assert_eq!(*backend.seen.borrow(), vec![3]);
        assert_eq!(results[0], ClassificationResult::cached("werk"));
        assert_eq!(results[1], ClassificationResult::model("spam", "gpt-test"));
        assert_eq!(results[2], ClassificationResult::cached("prive"));
        assert_eq!(results[3], ClassificationResult::unknown());
        assert_eq!(results[4], ClassificationResult::model("nieuwsbrief", "gpt-test"));

        let emails = audit.emails.borrow();
        let senders: Vec<&str> = emails.iter().map(|e| e.0.as_str()).collect();
        assert_eq!(senders, vec!["a@x.nl", "b@x.nl", "c@x.nl", "d@x.nl", "e@x.nl"]);
        assert_eq!(emails[3].2, "onbekend");

        let reloaded = SenderCache::load(dir.path().join("cache.json"), &Recorder::default()).unwrap();
        assert_eq!(reloaded.get_category("b@x.nl"), Some("spam"));
        assert_eq!(reloaded.get_category("e@x.nl"), Some("nieuwsbrief"));
        assert_eq!(reloaded.get_category("d@x.nl"), None);
        assert_eq!(
            reloaded.iter().find(|(k, _)| *k == "e@x.nl").map(|(_, v)| v.subject.as_str()),
            Some(NO_SUBJECT)
        );
    }

    #[test]
    fn test_unavailable_model_marks_unknown_and_keeps_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = empty_cache(&dir);
        let classifier = Classifier::new(None, Prompts::default(), 250);
        let audit = Recorder::default();

        let batch = vec![msg("a@x.nl", "A"), msg("b@x.nl", "B")];
        let results = BatchReconciler::new(&mut cache, &classifier, &audit, "gpt-test")
            .reconcile(&batch)
            .unwrap();

        assert!(results.iter().all(|r| r.bron == Provenance::Unknown));
        assert_eq!(*audit.events.borrow(), vec!["gpt_exception", "batch_fail"]);
        assert_eq!(audit.emails.borrow().len(), 2);
        assert!(cache.is_empty());
        assert!(!dir.path().join("cache.json").exists());
    }

    #[test]
    fn test_all_cached_skips_model() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = empty_cache(&dir);
        cache.update("a@x.nl", "werk", "s");
        let classifier = Classifier::new(None, Prompts::default(), 250);
        let audit = Recorder::default();

        let results = BatchReconciler::new(&mut cache, &classifier, &audit, "gpt-test")
            .reconcile(&[msg("a@x.nl", "A")])
            .unwrap();

        assert_eq!(results, vec![ClassificationResult::cached("werk")]);
        assert!(audit.events.borrow().is_empty());
    }

    #[test]
    fn test_duplicate_sender_last_update_wins() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = empty_cache(&dir);
        let backend = std::rc::Rc::new(Scripted {
            reply: "index=0;categorie=werk\nindex=1;categorie=spam".into(),
            seen: RefCell::new(Vec::new()),
        });
        let classifier = Classifier::new(Some(Box::new(backend)), Prompts::default(), 250);
        let audit = Recorder::default();

        let batch = vec![msg("same@x.nl", "Eerste"), msg("same@x.nl", "Tweede")];
        let results = BatchReconciler::new(&mut cache, &classifier, &audit, "gpt-test")
            .reconcile(&batch)
            .unwrap();

        assert_eq!(results[0].categorie, "werk");
        assert_eq!(results[1].categorie, "spam");
        assert_eq!(cache.get_category("same@x.nl"), Some("spam"));
    }
}
