//! Core data model: messages, summaries, addresses and classification results.

pub mod address;
pub mod classification;
pub mod message;
