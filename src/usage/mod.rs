//! Background recording of API key usage.
//!
//! The authenticator must never wait on (or fail because of) the
//! `last_used_at` write, so updates go through a bounded channel drained by a
//! single background task. See [`writer`].

pub mod writer;

use chrono::{DateTime, Utc};

pub use writer::UsageWriter;

/// One pending `last_used_at` update.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageUpdate {
    pub key_id: String,
    pub at: DateTime<Utc>,
}
