//! Directory-of-`.eml`-files mail source.

use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, NaiveDate};
use tracing::{debug, warn};

use crate::error::{MailsortError, Result};
use crate::model::message::MailMessage;
use crate::parser::eml;

use super::{in_window, MailSource};

/// Every `*.eml` file directly inside a directory.
pub struct EmlDirMailbox {
    files: Vec<(PathBuf, Option<DateTime<FixedOffset>>)>,
}

impl EmlDirMailbox {
    /// List the directory and read each file's `Date:` header.
    ///
    /// Files whose headers cannot be read are skipped with a warning.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|e| MailsortError::open(dir, e))?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("eml"))
            })
            .collect();
        paths.sort();

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            match eml::read_eml_date(&path) {
                Ok(date) => files.push((path, date)),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable .eml"),
            }
        }

        Ok(Self { files })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl MailSource for EmlDirMailbox {
    fn fetch(&mut self, from: NaiveDate, to: NaiveDate) -> Result<Vec<MailMessage>> {
        let mut selected: Vec<&(PathBuf, Option<DateTime<FixedOffset>>)> = self
            .files
            .iter()
            .filter(|(_, date)| in_window(*date, from, to))
            .collect();
        selected.sort_by(|a, b| b.1.cmp(&a.1));

        debug!(%from, %to, count = selected.len(), "Reading window from .eml directory");

        selected.into_iter().map(|(path, _)| eml::read_eml(path)).collect()
    }
}
