//! In-memory ledger with no durability.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ReplyLedger, ReplyRecord};
use crate::error::LedgerError;

#[derive(Debug, Default)]
struct Inner {
    senders: HashSet<String>,
    records: Vec<ReplyRecord>,
}

/// Ledger kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    inner: Mutex<Inner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with senders that were replied to in an earlier run.
    pub fn with_senders<I, S>(senders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: Mutex::new(Inner {
                senders: senders.into_iter().map(Into::into).collect(),
                records: Vec::new(),
            }),
        }
    }

    /// Records appended during this run, in order.
    pub async fn records(&self) -> Vec<ReplyRecord> {
        self.inner.lock().await.records.clone()
    }
}

#[async_trait]
impl ReplyLedger for MemoryLedger {
    async fn contains(&self, sender: &str) -> bool {
        self.inner.lock().await.senders.contains(sender)
    }

    async fn record(
        &self,
        sender: &str,
        persona_name: &str,
        used_fallback: bool,
    ) -> Result<ReplyRecord, LedgerError> {
        let record = ReplyRecord::now(sender, persona_name, used_fallback);
        let mut inner = self.inner.lock().await;
        inner.senders.insert(sender.to_string());
        inner.records.push(record.clone());
        Ok(record)
    }

    async fn len(&self) -> usize {
        self.inner.lock().await.senders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_then_contains() {
        let ledger = MemoryLedger::new();
        assert!(!ledger.contains("a@x.com").await);
        assert!(ledger.is_empty().await);

        let rec = ledger.record("a@x.com", "Ada", true).await.unwrap();
        assert_eq!(rec.persona_name, "Ada");
        assert_eq!(rec.fallback_label(), "Yes");
        assert!(ledger.contains("a@x.com").await);
        assert_eq!(ledger.len().await, 1);
        assert_eq!(ledger.records().await.len(), 1);
    }

    #[tokio::test]
    async fn seeded_senders_are_members() {
        let ledger = MemoryLedger::with_senders(["old@x.com"]);
        assert!(ledger.contains("old@x.com").await);
        assert!(ledger.records().await.is_empty());
    }
}
