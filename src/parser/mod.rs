//! Email parsing: MBOX streaming parser, EML reader, header decoding, and MIME handling.

pub mod eml;
pub mod header;
pub mod mbox;
pub mod mime;
