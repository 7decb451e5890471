//! Parser for individual `.eml` files (RFC 5322 messages without MBOX framing).

use std::path::Path;

use chrono::{DateTime, FixedOffset};

use crate::error::{MailsortError, Result};
use crate::model::message::MailMessage;
use crate::parser::{header, mime};

/// Read and fully decode one `.eml` file.
pub fn read_eml(path: impl AsRef<Path>) -> Result<MailMessage> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| MailsortError::open(path, e))?;
    Ok(mime::decode_message(&data))
}

/// Only the `Date:` of an `.eml` file, reading no further than the headers
/// need. Used to filter a directory by date before decoding bodies.
pub fn read_eml_date(path: impl AsRef<Path>) -> Result<Option<DateTime<FixedOffset>>> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| MailsortError::open(path, e))?;
    let (head, _) = mime::split_head(&data);
    Ok(header::parse_date_header(head))
}
