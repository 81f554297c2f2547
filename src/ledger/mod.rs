//! Reply ledger: durable record of which senders already got a reply.
//!
//! `ReplyLedger` is the seam the orchestration loop talks to. `CsvLedger`
//! is the on-disk implementation; `MemoryLedger` backs tests.

mod csv_ledger;
mod memory;

pub use csv_ledger::{CsvLedger, LEDGER_HEADER, encode_row, parse_rows};
pub use memory::MemoryLedger;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::LedgerError;

/// One reply that was actually sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyRecord {
    pub sender_email: String,
    pub timestamp: DateTime<Utc>,
    pub persona_name: String,
    pub used_fallback: bool,
}

impl ReplyRecord {
    /// Stamp a new record with the current UTC time.
    pub fn now(sender_email: &str, persona_name: &str, used_fallback: bool) -> Self {
        Self {
            sender_email: sender_email.to_string(),
            timestamp: Utc::now(),
            persona_name: persona_name.to_string(),
            used_fallback,
        }
    }

    /// `Yes` / `No`, as stored in the ledger file.
    pub fn fallback_label(&self) -> &'static str {
        if self.used_fallback { "Yes" } else { "No" }
    }
}

/// Append-only set of replied-to senders.
#[async_trait]
pub trait ReplyLedger: Send + Sync {
    /// True iff a reply to `sender` has been recorded.
    async fn contains(&self, sender: &str) -> bool;

    /// Persist a reply event and add `sender` to the membership set.
    ///
    /// Durable implementations flush before returning. The sender is added
    /// to the in-memory set even when persisting fails, so a run never
    /// replies to the same sender twice.
    async fn record(
        &self,
        sender: &str,
        persona_name: &str,
        used_fallback: bool,
    ) -> Result<ReplyRecord, LedgerError>;

    /// Number of distinct senders recorded.
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
