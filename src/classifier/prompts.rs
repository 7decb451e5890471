//! System instruction and user prompt template.

use std::path::Path;

use crate::error::{MailsortError, Result};

/// Placeholder in the user template that receives the serialized summaries.
pub const EMAILS_PLACEHOLDER: &str = "{emails_json}";

const DEFAULT_SYSTEM: &str = include_str!("../../prompts/system_prompt.txt");
const DEFAULT_CLASSIFY: &str = include_str!("../../prompts/classify_prompt.txt");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompts {
    pub system: String,
    pub classify: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM.to_string(),
            classify: DEFAULT_CLASSIFY.to_string(),
        }
    }
}

impl Prompts {
    /// Read the configured prompt files, falling back to the built-in text
    /// for any that is not configured. A configured file that cannot be read
    /// is an error.
    pub fn load(system_file: Option<&Path>, classify_file: Option<&Path>) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            system: read_or(system_file, defaults.system)?,
            classify: read_or(classify_file, defaults.classify)?,
        })
    }

    /// The user prompt for one batch.
    pub fn render(&self, emails_json: &str) -> String {
        self.classify.replace(EMAILS_PLACEHOLDER, emails_json)
    }
}

fn read_or(path: Option<&Path>, fallback: String) -> Result<String> {
    match path {
        Some(p) => std::fs::read_to_string(p).map_err(|e| MailsortError::open(p, e)),
        None => Ok(fallback),
    }
}
