//! Streaming MBOX parser.
//!
//! Reads MBOX files line-by-line through a large buffer and never holds more
//! than one message in memory. Tolerant of malformed input.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{MailsortError, Result};

/// Size of the internal read buffer.
const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Messages larger than this are truncated (64 MB).
const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Streaming MBOX parser.
///
/// Splits on `From ` separator lines. Tolerates mixed line endings, separators
/// without a preceding blank line (logged), truncated last messages and a
/// UTF-8 BOM at the start of the file.
pub struct MboxParser {
    path: PathBuf,
    file_size: u64,
}

impl MboxParser {
    /// Create a parser for the given MBOX file.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = std::fs::metadata(&path).map_err(|e| MailsortError::open(&path, e))?;
        Ok(Self {
            path,
            file_size: metadata.len(),
        })
    }

    /// Path to the MBOX file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Walk the whole file, calling `on_message(offset, raw_bytes)` for each
    /// message. The callback returns `false` to stop early.
    ///
    /// Returns the number of messages delivered.
    pub fn parse(&self, on_message: &mut dyn FnMut(u64, &[u8]) -> bool) -> Result<u64> {
        if self.file_size == 0 {
            return Ok(0);
        }

        let file = File::open(&self.path).map_err(|e| MailsortError::io(&self.path, e))?;
        let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);

        let mut count: u64 = 0;
        let mut offset: u64 = 0;
        let mut message_start: u64 = 0;
        let mut message_buf: Vec<u8> = Vec::with_capacity(64 * 1024);
        let mut line_buf: Vec<u8> = Vec::with_capacity(4096);
        let mut prev_blank = true;
        let mut truncated = false;

        loop {
            line_buf.clear();
            let read = reader
                .read_until(b'\n', &mut line_buf)
                .map_err(|e| MailsortError::io(&self.path, e))?;
            if read == 0 {
                break;
            }

            if is_mbox_separator(&line_buf) {
                if !prev_blank && offset > 0 {
                    warn!(offset, "Found 'From ' separator without preceding blank line");
                }
                if !message_buf.is_empty() {
                    if !on_message(message_start, &message_buf) {
                        return Ok(count);
                    }
                    count += 1;
                }
                message_start = offset;
                message_buf.clear();
                truncated = false;
                message_buf.extend_from_slice(&line_buf);
            } else if message_buf.len() + line_buf.len() <= MAX_MESSAGE_SIZE {
                message_buf.extend_from_slice(&line_buf);
            } else if !truncated {
                warn!(
                    offset = message_start,
                    max_size = MAX_MESSAGE_SIZE,
                    "Message exceeds maximum size, truncating body"
                );
                truncated = true;
            }

            prev_blank = is_blank_line(&line_buf);
            offset += read as u64;
        }

        if !message_buf.is_empty() && on_message(message_start, &message_buf) {
            count += 1;
        }

        Ok(count)
    }

    /// Read `length` bytes at `offset` without scanning the file.
    pub fn read_message_at(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        let mut file = File::open(&self.path).map_err(|e| MailsortError::io(&self.path, e))?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| MailsortError::io(&self.path, e))?;
        let mut buffer = vec![0u8; length as usize];
        file.read_exact(&mut buffer)
            .map_err(|e| MailsortError::io(&self.path, e))?;
        Ok(buffer)
    }
}

/// Check whether a line is an MBOX separator (`From ` at the start).
fn is_mbox_separator(line: &[u8]) -> bool {
    line.strip_prefix(&[0xEF, 0xBB, 0xBF])
        .unwrap_or(line)
        .starts_with(b"From ")
}

/// Check whether a line is blank (only whitespace / CR / LF).
fn is_blank_line(line: &[u8]) -> bool {
    line.iter().all(|b| b.is_ascii_whitespace())
}
