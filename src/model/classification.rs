//! Outcome of classifying one message.

use std::fmt;

/// Category used when nothing is known about a message or sender.
pub const UNKNOWN_CATEGORY: &str = "onbekend";

/// Subject stored for cache records that never carried one.
pub const UNKNOWN_SUBJECT: &str = "(onbekend)";

/// Subject stored when a classified message has an empty subject.
pub const NO_SUBJECT: &str = "(geen subject)";

/// Where a message's category came from (the `bron` column of the audit log).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Provenance {
    /// Exact sender match in the sender cache.
    Cache,
    /// Classified by the model with this identifier.
    Model(String),
    /// Neither the cache nor the model produced a category.
    Unknown,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cache => f.write_str("cache"),
            Self::Model(id) => f.write_str(id),
            Self::Unknown => f.write_str(UNKNOWN_CATEGORY),
        }
    }
}

/// Final category of one message in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationResult {
    pub categorie: String,
    pub bron: Provenance,
}

impl ClassificationResult {
    pub fn cached(categorie: impl Into<String>) -> Self {
        Self {
            categorie: categorie.into(),
            bron: Provenance::Cache,
        }
    }

    pub fn model(categorie: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            categorie: categorie.into(),
            bron: Provenance::Model(model.into()),
        }
    }

    pub fn unknown() -> Self {
        Self {
            categorie: UNKNOWN_CATEGORY.to_string(),
            bron: Provenance::Unknown,
        }
    }
}
