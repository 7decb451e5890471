//! Centralized error types for mailsorter.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mailsorter library.
#[derive(Error, Debug)]
pub enum MailsortError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The specified mailbox, prompt or config file does not exist.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// The sender cache exists but cannot be parsed. Fatal at startup.
    #[error("Sender cache '{path}' is not valid JSON: {source}")]
    CorruptCache {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// A required configuration value is absent.
    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    /// The configuration file exists but cannot be parsed.
    #[error("Invalid configuration in '{path}': {reason}")]
    InvalidConfig { path: PathBuf, reason: String },

    /// A date setting is not a valid `YYYY-MM-DD` date.
    #[error("Invalid date '{value}' for {field}")]
    InvalidDate { field: &'static str, value: String },

    /// HTML body could not be reduced to visible text.
    #[error("Malformed HTML: {0}")]
    MalformedHtml(String),

    /// Serializing a payload or the cache failed.
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Convenience alias for `Result<T, MailsortError>`.
pub type Result<T> = std::result::Result<T, MailsortError>;

impl MailsortError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Like [`MailsortError::io`], but maps `NotFound` to `FileNotFound`.
    pub fn open(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::FileNotFound(path)
        } else {
            Self::Io { path, source }
        }
    }
}

/// Allow `?` on `std::io::Error` when no path context is available
/// (rare; prefer `MailsortError::io`).
impl From<std::io::Error> for MailsortError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}
