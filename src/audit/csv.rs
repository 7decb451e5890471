//! CSV audit files, one set per run, named after the run stamp.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{debug, error};

use crate::error::{MailsortError, Result};

use super::{AuditSink, EmailRecord, DATETIME_FMT};

const EVENT_HEADER: [&str; 3] = ["tijd", "context", "event"];
const EMAIL_HEADER: [&str; 6] = [
    "log_datum",
    "email_datum",
    "categorie",
    "afzender",
    "onderwerp",
    "bron",
];

/// Writes `errors_<stamp>.csv`, `log_<stamp>.csv` and, when enabled,
/// `gpt_payload_<stamp>.txt` inside the log directory.
#[derive(Debug, Clone)]
pub struct CsvAuditLog {
    event_file: PathBuf,
    email_file: PathBuf,
    payload_file: Option<PathBuf>,
    separator: char,
}

impl CsvAuditLog {
    /// Prepare the log directory. Files are created on first write.
    pub fn new(log_dir: &Path, runstamp: &str, separator: char, log_payload: bool) -> Result<Self> {
        std::fs::create_dir_all(log_dir).map_err(|e| MailsortError::io(log_dir, e))?;
        Ok(Self {
            event_file: log_dir.join(format!("errors_{runstamp}.csv")),
            email_file: log_dir.join(format!("log_{runstamp}.csv")),
            payload_file: log_payload.then(|| log_dir.join(format!("gpt_payload_{runstamp}.txt"))),
            separator,
        })
    }

    pub fn event_file(&self) -> &Path {
        &self.event_file
    }

    pub fn email_file(&self) -> &Path {
        &self.email_file
    }

    pub fn payload_file(&self) -> Option<&Path> {
        self.payload_file.as_deref()
    }

    /// Append one row, writing the header first if the file is new.
    fn append_row(&self, path: &Path, header: &[&str], row: &[&str]) -> std::io::Result<()> {
        let is_new = !path.is_file();
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut out = String::new();
        if is_new {
            out.push_str(&self.join(header));
        }
        out.push_str(&self.join(row));
        file.write_all(out.as_bytes())
    }

    fn join(&self, fields: &[&str]) -> String {
        let mut line = fields
            .iter()
            .map(|f| csv_escape(f, self.separator))
            .collect::<Vec<_>>()
            .join(&self.separator.to_string());
        line.push_str("\r\n");
        line
    }
}

impl AuditSink for CsvAuditLog {
    fn event(&self, context: &str, message: &str) {
        debug!(context, message, "audit event");
        let now = Local::now().format(DATETIME_FMT).to_string();
        if let Err(e) = self.append_row(&self.event_file, &EVENT_HEADER, &[&now, context, message]) {
            error!(path = %self.event_file.display(), error = %e, "Could not write audit event");
        }
    }

    fn email(&self, record: &EmailRecord<'_>) {
        let now = Local::now().format(DATETIME_FMT).to_string();
        let date = record
            .date
            .map(|d| d.format(DATETIME_FMT).to_string())
            .unwrap_or_default();
        let bron = record.bron.to_string();
        let row = [
            now.as_str(),
            date.as_str(),
            record.categorie,
            record.sender,
            record.subject,
            bron.as_str(),
        ];
        if let Err(e) = self.append_row(&self.email_file, &EMAIL_HEADER, &row) {
            error!(path = %self.email_file.display(), error = %e, "Could not write email log row");
        }
    }

    fn payload(&self, json: &str, prompt: &str) {
        let Some(path) = &self.payload_file else {
            return;
        };
        let rule = "===============================================";
        let block = format!("\n{rule}\nGPT PAYLOAD\n{rule}\n\nJSON:\n{json}\n\nPROMPT:\n{prompt}\n\n");
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| f.write_all(block.as_bytes()));
        if let Err(e) = written {
            error!(path = %path.display(), error = %e, "Could not write payload transcript");
        }
    }
}

/// Escape a value for CSV (RFC 4180).
///
/// Wraps in double quotes if the value contains the separator, quotes, or newlines.
fn csv_escape(value: &str, separator: char) -> String {
    if value.contains(separator) || value.contains('"') || value.contains('\n') || value.contains('\r')
    {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::classification::Provenance;

    #[test]
    fn test_csv_escape_simple() {
        assert_eq!(csv_escape("hello", ';'), "hello");
        assert_eq!(csv_escape("a,b", ';'), "a,b");
    }

    #[test]
    fn test_csv_escape_separator_and_quotes() {
        assert_eq!(csv_escape("a;b", ';'), "\"a;b\"");
        assert_eq!(csv_escape("say \"hi\"", ';'), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_escape("line1\nline2", ';'), "\"line1\nline2\"");
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let log = CsvAuditLog::new(dir.path(), "t1", ';', false).unwrap();
        log.event("gpt_call", "Batch size=3");
        log.event("gpt_ok", "Classified 3/3 mails");

        let content = std::fs::read_to_string(log.event_file()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "tijd;context;event");
        assert!(lines[2].ends_with(";gpt_ok;Classified 3/3 mails"));
    }

    #[test]
    fn test_email_row_columns() {
        let dir = tempfile::tempdir().unwrap();
        let log = CsvAuditLog::new(dir.path(), "t2", ';', false).unwrap();
        let bron = Provenance::Model("gpt-4.1-mini".into());
        log.email(&EmailRecord {
            date: None,
            categorie: "nieuwsbrief",
            sender: "news@shop.nl",
            subject: "Week; deals",
            bron: &bron,
        });

        let content = std::fs::read_to_string(log.email_file()).unwrap();
        let row = content.lines().nth(1).unwrap();
        let fields: Vec<&str> = row.splitn(2, ';').collect();
        assert_eq!(fields.len(), 2);
        assert!(fields[1].ends_with(";nieuwsbrief;news@shop.nl;\"Week; deals\";gpt-4.1-mini"));
    }

    #[test]
    fn test_payload_disabled_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let log = CsvAuditLog::new(dir.path(), "t3", ';', false).unwrap();
        log.payload("[]", "prompt");
        assert!(log.payload_file().is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_payload_enabled_appends_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let log = CsvAuditLog::new(dir.path(), "t4", ';', true).unwrap();
        log.payload("[{\"index\":0}]", "Classify: [{\"index\":0}]");
        log.payload("[]", "second");
        let content = std::fs::read_to_string(log.payload_file().unwrap()).unwrap();
        assert_eq!(content.matches("GPT PAYLOAD").count(), 2);
        assert!(content.contains("JSON:\n[{\"index\":0}]"));
    }
}
