// ── Optimistic mutation bookkeeping ──
//
// Each `mutate` call gets a ledger entry tracking its optimistic cache
// key and outcome. Settled entries are kept until cleared so the UI
// can render an inline error with a retry affordance.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

/// Lifecycle of one optimistic write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
    /// Submitted; the optimistic entry is in the cache.
    Pending,
    /// The server confirmed; the entry was replaced by the server's
    /// authoritative entity.
    Confirmed,
    /// The server declined (or was unreachable); the optimistic entry
    /// was rolled back.
    Rejected,
}

/// One tracked optimistic write.
#[derive(Debug, Clone)]
pub struct PendingMutation {
    /// Cache key of the optimistic entry (`local-<uuid>`).
    pub local_id: String,
    pub submitted_at: DateTime<Utc>,
    pub status: MutationStatus,
}

/// Ledger of in-flight and settled mutations for one resource.
#[derive(Default)]
pub(crate) struct MutationLedger {
    entries: DashMap<String, PendingMutation>,
}

impl MutationLedger {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a new pending mutation and return its record.
    pub(crate) fn begin(&self) -> PendingMutation {
        let record = PendingMutation {
            local_id: format!("local-{}", Uuid::new_v4()),
            submitted_at: Utc::now(),
            status: MutationStatus::Pending,
        };
        self.entries.insert(record.local_id.clone(), record.clone());
        record
    }

    pub(crate) fn confirm(&self, local_id: &str) {
        if let Some(mut entry) = self.entries.get_mut(local_id) {
            entry.status = MutationStatus::Confirmed;
        }
    }

    pub(crate) fn reject(&self, local_id: &str) {
        if let Some(mut entry) = self.entries.get_mut(local_id) {
            entry.status = MutationStatus::Rejected;
        }
    }

    /// All records, pending and settled.
    pub(crate) fn snapshot(&self) -> Vec<PendingMutation> {
        self.entries.iter().map(|r| r.value().clone()).collect()
    }

    /// Drop everything that is no longer pending.
    pub(crate) fn clear_settled(&self) {
        self.entries
            .retain(|_, record| record.status == MutationStatus::Pending);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_pending_to_confirmed() {
        let ledger = MutationLedger::new();
        let record = ledger.begin();
        assert!(record.local_id.starts_with("local-"));
        assert_eq!(record.status, MutationStatus::Pending);

        ledger.confirm(&record.local_id);
        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].status, MutationStatus::Confirmed);
    }

    #[test]
    fn clear_settled_keeps_pending() {
        let ledger = MutationLedger::new();
        let pending = ledger.begin();
        let rejected = ledger.begin();
        ledger.reject(&rejected.local_id);

        ledger.clear_settled();

        let remaining = ledger.snapshot();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].local_id, pending.local_id);
    }

    #[test]
    fn local_ids_are_unique() {
        let ledger = MutationLedger::new();
        let a = ledger.begin();
        let b = ledger.begin();
        assert_ne!(a.local_id, b.local_id);
    }
}
