//! mailsorter: sort mail into categories with a sender cache and a
//! language model.
//!
//! Messages are read window by window from a local mailbox, looked up in a
//! persistent sender cache, and the remainder is classified in batches by a
//! chat model. Every outcome lands in a CSV audit trail.

pub mod audit;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod driver;
pub mod error;
pub mod extract;
pub mod mailbox;
pub mod model;
pub mod parser;
pub mod reconcile;
