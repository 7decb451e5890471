//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `--config <FILE>` on the command line
//! 2. `$MAILSORTER_CONFIG` (environment variable)
//! 3. `~/.config/mailsorter/config.toml` (Linux)
//!    `%APPDATA%\mailsorter\config.toml` (Windows)
//! 4. Built-in defaults
//!
//! Environment variables and command-line flags are applied on top through
//! [`Overrides`], then everything is resolved into [`Settings`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::classifier::openai::DEFAULT_ENDPOINT;
use crate::driver::RunContext;
use crate::error::{MailsortError, Result};

/// Format of `RUNSTAMP` and of the default run stamp.
pub const RUNSTAMP_FMT: &str = "%Y-%m-%d_%H-%M-%S";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub mailbox: MailboxConfig,
    pub run: RunConfig,
    pub classifier: ClassifierConfig,
    pub cache: CacheConfig,
}

/// Logging and audit output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Directory for the application log and the CSV audit files.
    pub log_dir: Option<PathBuf>,
    /// Also log to stderr.
    pub log_to_console: bool,
    /// CSV field separator character.
    pub csv_separator: char,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    /// MBOX file or directory of `.eml` files.
    pub source: Option<PathBuf>,
}

/// Date range and batching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// First day to fetch, `YYYY-MM-DD`.
    pub date_from: String,
    /// Day after the last day to fetch, `YYYY-MM-DD`.
    pub date_to: String,
    pub chunk_days: u32,
    pub batch_size: usize,
    /// Body characters sent to the model per message (minimum 50).
    pub max_body_chars: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub model: String,
    pub endpoint: String,
    /// Without a key every batch is left unclassified.
    pub api_key: Option<String>,
    pub system_prompt_file: Option<PathBuf>,
    pub classify_prompt_file: Option<PathBuf>,
    /// Write the JSON payload and prompt of every call to a transcript file.
    pub log_payload: bool,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Sender cache file.
    pub file: Option<PathBuf>,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
            log_to_console: true,
            csv_separator: ';',
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            date_from: "2025-01-01".to_string(),
            date_to: "2025-01-08".to_string(),
            chunk_days: 3,
            batch_size: 30,
            max_body_chars: 250,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4.1-mini".to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            system_prompt_file: None,
            classify_prompt_file: None,
            log_payload: true,
            timeout_secs: 120,
        }
    }
}

// ── Overrides ───────────────────────────────────────────────────

/// Values from the environment or the command line. `None` keeps the file value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub log_level: Option<String>,
    pub log_dir: Option<PathBuf>,
    pub log_to_console: Option<bool>,
    pub mailbox: Option<PathBuf>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub chunk_days: Option<u32>,
    pub batch_size: Option<usize>,
    pub max_body_chars: Option<usize>,
    pub model: Option<String>,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub system_prompt_file: Option<PathBuf>,
    pub classify_prompt_file: Option<PathBuf>,
    pub log_payload: Option<bool>,
    pub cache_file: Option<PathBuf>,
}

impl Config {
    /// Apply overrides in place.
    pub fn apply(&mut self, o: &Overrides) {
        fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *slot = v.clone();
            }
        }
        fn set_opt<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                slot.clone_from(value);
            }
        }

        set(&mut self.general.log_level, &o.log_level);
        set_opt(&mut self.general.log_dir, &o.log_dir);
        set(&mut self.general.log_to_console, &o.log_to_console);
        set_opt(&mut self.mailbox.source, &o.mailbox);
        set(&mut self.run.date_from, &o.date_from);
        set(&mut self.run.date_to, &o.date_to);
        set(&mut self.run.chunk_days, &o.chunk_days);
        set(&mut self.run.batch_size, &o.batch_size);
        set(&mut self.run.max_body_chars, &o.max_body_chars);
        set(&mut self.classifier.model, &o.model);
        set(&mut self.classifier.endpoint, &o.endpoint);
        set_opt(&mut self.classifier.api_key, &o.api_key);
        set_opt(&mut self.classifier.system_prompt_file, &o.system_prompt_file);
        set_opt(&mut self.classifier.classify_prompt_file, &o.classify_prompt_file);
        set(&mut self.classifier.log_payload, &o.log_payload);
        set_opt(&mut self.cache.file, &o.cache_file);
    }
}

// ── Resolved settings ───────────────────────────────────────────

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub log_level: String,
    pub log_dir: PathBuf,
    pub log_to_console: bool,
    pub csv_separator: char,
    pub mailbox: Option<PathBuf>,
    pub run: RunContext,
    pub model: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub system_prompt_file: Option<PathBuf>,
    pub classify_prompt_file: Option<PathBuf>,
    pub log_payload: bool,
    pub timeout: Duration,
    pub cache_file: PathBuf,
    pub runstamp: String,
}

impl Settings {
    /// Resolve defaults, parse dates and clamp numeric settings.
    pub fn resolve(config: Config, runstamp: Option<String>) -> Result<Self> {
        let date_from = parse_date("date_from", &config.run.date_from)?;
        let date_to = parse_date("date_to", &config.run.date_to)?;
        let run = RunContext::new(
            date_from,
            date_to,
            config.run.chunk_days,
            config.run.batch_size,
            config.run.max_body_chars,
        );

        Ok(Self {
            log_level: config.general.log_level,
            log_dir: config
                .general
                .log_dir
                .unwrap_or_else(|| data_dir().join("logs")),
            log_to_console: config.general.log_to_console,
            csv_separator: config.general.csv_separator,
            mailbox: config.mailbox.source,
            run,
            model: config.classifier.model,
            endpoint: config.classifier.endpoint,
            api_key: config.classifier.api_key.filter(|k| !k.trim().is_empty()),
            system_prompt_file: config.classifier.system_prompt_file,
            classify_prompt_file: config.classifier.classify_prompt_file,
            log_payload: config.classifier.log_payload,
            timeout: Duration::from_secs(config.classifier.timeout_secs.max(1)),
            cache_file: config
                .cache
                .file
                .unwrap_or_else(|| data_dir().join("sender_exact.json")),
            runstamp: runstamp
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| Local::now().format(RUNSTAMP_FMT).to_string()),
        })
    }

    /// The mailbox to read; required for a classification run.
    pub fn mailbox(&self) -> Result<&Path> {
        self.mailbox
            .as_deref()
            .ok_or_else(|| MailsortError::MissingConfig("mailbox.source (MAILBOX)".to_string()))
    }

    /// The application log file for this run.
    pub fn app_log_name(&self) -> String {
        format!("app_{}.log", self.runstamp)
    }
}

fn parse_date(field: &'static str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| MailsortError::InvalidDate {
        field,
        value: value.to_string(),
    })
}

/// Environment-style boolean: `1`, `true`, `yes`, `y` and `on` (any case)
/// are true, anything else is false.
pub fn truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration.
///
/// An explicitly given file must exist and parse. The default location is
/// optional; if it fails to parse, built-in defaults are used with a warning.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        return read_config(path);
    }

    if let Some(path) = config_file_path() {
        if path.exists() {
            match read_config(&path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to load config, using defaults"
                    );
                }
            }
        }
    }
    Ok(Config::default())
}

fn read_config(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path).map_err(|e| MailsortError::open(path, e))?;
    let cfg = toml::from_str::<Config>(&contents).map_err(|e| MailsortError::InvalidConfig {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    tracing::info!(path = %path.display(), "Loaded config");
    Ok(cfg)
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MAILSORTER_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("mailsorter").join("config.toml"))
}

/// Default home for logs and the sender cache.
pub fn data_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailsorter")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.general.csv_separator, ';');
        assert!(cfg.general.log_to_console);
        assert_eq!(cfg.run.chunk_days, 3);
        assert_eq!(cfg.run.batch_size, 30);
        assert_eq!(cfg.run.max_body_chars, 250);
        assert_eq!(cfg.classifier.model, "gpt-4.1-mini");
        assert!(cfg.classifier.log_payload);
        assert!(cfg.mailbox.source.is_none());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial = r#"
[mailbox]
source = "/var/mail/inbox.mbox"

[run]
date_from = "2025-02-01"
batch_size = 10
"#;
        let cfg: Config = toml::from_str(partial).expect("parse partial");
        assert_eq!(cfg.mailbox.source, Some(PathBuf::from("/var/mail/inbox.mbox")));
        assert_eq!(cfg.run.date_from, "2025-02-01");
        assert_eq!(cfg.run.batch_size, 10);
        assert_eq!(cfg.run.date_to, "2025-01-08");
        assert_eq!(cfg.classifier.timeout_secs, 120);
    }

    #[test]
    fn test_overrides_win_over_file() {
        let mut cfg = Config::default();
        cfg.classifier.model = "from-file".into();
        cfg.run.chunk_days = 7;
        cfg.apply(&Overrides {
            model: Some("from-env".into()),
            log_payload: Some(false),
            mailbox: Some(PathBuf::from("box.mbox")),
            ..Default::default()
        });
        assert_eq!(cfg.classifier.model, "from-env");
        assert!(!cfg.classifier.log_payload);
        assert_eq!(cfg.run.chunk_days, 7);
        assert_eq!(cfg.mailbox.source, Some(PathBuf::from("box.mbox")));
    }

    #[test]
    fn test_resolve_clamps_and_parses() {
        let mut cfg = Config::default();
        cfg.run.chunk_days = 0;
        cfg.run.batch_size = 0;
        cfg.run.max_body_chars = 5;
        cfg.classifier.api_key = Some("   ".into());
        let s = Settings::resolve(cfg, Some("2025-01-09_10-00-00".into())).unwrap();
        assert_eq!(s.run.chunk_days(), 1);
        assert_eq!(s.run.batch_size(), 1);
        assert_eq!(s.run.max_body_chars(), 50);
        assert_eq!(s.run.date_from(), NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert!(s.api_key.is_none());
        assert_eq!(s.app_log_name(), "app_2025-01-09_10-00-00.log");
    }

    #[test]
    fn test_resolve_rejects_bad_date() {
        let mut cfg = Config::default();
        cfg.run.date_to = "08-01-2025".into();
        let err = Settings::resolve(cfg, None).unwrap_err();
        assert!(matches!(err, MailsortError::InvalidDate { field: "date_to", .. }));
    }

    #[test]
    fn test_mailbox_is_required_for_run() {
        let s = Settings::resolve(Config::default(), None).unwrap();
        assert!(matches!(s.mailbox(), Err(MailsortError::MissingConfig(_))));
    }

    #[test]
    fn test_truthy_spellings() {
        for t in ["1", "true", "YES", "y", " On "] {
            assert!(truthy(t), "{t}");
        }
        for f in ["0", "false", "No", "off", "", "misschien"] {
            assert!(!truthy(f), "{f}");
        }
    }

    #[test]
    fn test_explicit_config_must_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[run\nbatch_size = ").unwrap();
        assert!(matches!(
            load_config(Some(&path)),
            Err(MailsortError::InvalidConfig { .. })
        ));
        assert!(matches!(
            load_config(Some(&dir.path().join("missing.toml"))),
            Err(MailsortError::FileNotFound(_))
        ));
    }
}
