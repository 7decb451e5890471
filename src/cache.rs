//! Persistent sender → category cache.
//!
//! The file is a JSON object keyed by exact sender address. Older files
//! stored bare category strings or objects missing fields; those records are
//! normalized on load and the upgraded file is written back once.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::audit::AuditSink;
use crate::error::{MailsortError, Result};
use crate::model::classification::{NO_SUBJECT, UNKNOWN_CATEGORY, UNKNOWN_SUBJECT};

/// One cached record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub categorie: String,
    pub subject: String,
}

/// Shape of a value as found on disk.
#[derive(Debug, PartialEq)]
enum StoredValue {
    /// A bare category string.
    Legacy(String),
    /// An object with at least one usable field missing or invalid.
    Partial {
        categorie: Option<String>,
        subject: Option<String>,
    },
    /// A well-formed `{categorie, subject}` object.
    Full(CacheEntry),
    /// Anything else.
    Malformed,
}

impl StoredValue {
    fn classify(value: Value) -> Self {
        match value {
            Value::String(s) => Self::Legacy(s),
            Value::Object(map) => {
                let field = |key: &str| {
                    map.get(key)
                        .and_then(Value::as_str)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                };
                match (field("categorie"), field("subject")) {
                    (Some(categorie), Some(subject)) => Self::Full(CacheEntry { categorie, subject }),
                    (categorie, subject) => Self::Partial { categorie, subject },
                }
            }
            _ => Self::Malformed,
        }
    }

    /// The normalized entry, and whether normalization changed anything.
    fn resolve(self) -> (CacheEntry, bool) {
        match self {
            Self::Full(entry) => (entry, false),
            Self::Legacy(categorie) => (
                CacheEntry {
                    categorie: non_empty_or(categorie, UNKNOWN_CATEGORY),
                    subject: UNKNOWN_SUBJECT.to_string(),
                },
                true,
            ),
            Self::Partial { categorie, subject } => (
                CacheEntry {
                    categorie: categorie.unwrap_or_else(|| UNKNOWN_CATEGORY.to_string()),
                    subject: subject.unwrap_or_else(|| UNKNOWN_SUBJECT.to_string()),
                },
                true,
            ),
            Self::Malformed => (
                CacheEntry {
                    categorie: UNKNOWN_CATEGORY.to_string(),
                    subject: UNKNOWN_SUBJECT.to_string(),
                },
                true,
            ),
        }
    }
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

/// The sender cache and the file that backs it.
#[derive(Debug)]
pub struct SenderCache {
    path: PathBuf,
    entries: BTreeMap<String, CacheEntry>,
}

impl SenderCache {
    /// Load the cache, normalizing legacy records.
    ///
    /// A missing file yields an empty cache (its directory is created). If
    /// any record was upgraded the file is rewritten and one `cache_upgrade`
    /// event is emitted. A file that is not a JSON object is fatal.
    pub fn load(path: impl AsRef<Path>, audit: &dyn AuditSink) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| MailsortError::io(parent, e))?;
        }

        if !path.exists() {
            debug!(path = %path.display(), "No sender cache yet, starting empty");
            return Ok(Self {
                path,
                entries: BTreeMap::new(),
            });
        }

        let data = std::fs::read_to_string(&path).map_err(|e| MailsortError::io(&path, e))?;
        let raw: BTreeMap<String, Value> =
            serde_json::from_str(&data).map_err(|source| MailsortError::CorruptCache {
                path: path.clone(),
                source,
            })?;

        let mut upgraded = 0usize;
        let entries = raw
            .into_iter()
            .map(|(sender, value)| {
                let (entry, changed) = StoredValue::classify(value).resolve();
                if changed {
                    upgraded += 1;
                }
                (sender, entry)
            })
            .collect();

        let cache = Self { path, entries };
        if upgraded > 0 {
            cache.save()?;
            info!(path = %cache.path.display(), upgraded, "Upgraded sender cache records");
            audit.event(
                "cache_upgrade",
                &format!("Cache geüpgraded naar nieuw formaat ({upgraded} records)"),
            );
        }
        info!(path = %cache.path.display(), entries = cache.len(), "Loaded sender cache");
        Ok(cache)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Category for an exact sender match.
    pub fn get_category(&self, sender: &str) -> Option<&str> {
        self.entries.get(sender).map(|e| e.categorie.as_str())
    }

    /// Insert or overwrite a sender's record. Does not touch the file.
    pub fn update(&mut self, sender: &str, categorie: &str, subject: &str) {
        let entry = CacheEntry {
            categorie: non_empty_or(categorie.to_string(), UNKNOWN_CATEGORY),
            subject: non_empty_or(subject.to_string(), NO_SUBJECT),
        };
        self.entries.insert(sender.to_string(), entry);
    }

    /// Write the whole cache to a sibling temp file, then rename it over the
    /// target so readers never see a half-written file. An existing file's
    /// permissions are carried over.
    pub fn save(&self) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| MailsortError::io(dir, e))?;
        serde_json::to_writer_pretty(&mut tmp, &self.entries)?;
        tmp.write_all(b"\n")
            .and_then(|_| tmp.flush())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| MailsortError::io(tmp.path(), e))?;
        // Temp files are created owner-only; keep whatever the cache file had.
        if let Ok(meta) = std::fs::metadata(&self.path) {
            tmp.as_file()
                .set_permissions(meta.permissions())
                .map_err(|e| MailsortError::io(tmp.path(), e))?;
        }
        tmp.persist(&self.path)
            .map_err(|e| MailsortError::io(&self.path, e.error))?;
        debug!(path = %self.path.display(), entries = self.entries.len(), "Saved sender cache");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CacheEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of senders per category, most common first.
    pub fn category_counts(&self) -> Vec<(String, usize)> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for entry in self.entries.values() {
            *counts.entry(entry.categorie.as_str()).or_default() += 1;
        }
        let mut sorted: Vec<(String, usize)> =
            counts.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        sorted
    }
}
