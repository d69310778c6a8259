// ── Generic reactive resource cache ──
//
// Lock-free concurrent storage for one synchronized resource, with
// push-based change notification via `watch` channels. Envelope
// application is last-applied-wins: no timestamp reconciliation, no
// reordering.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;

use tickstream_api::envelope::{Envelope, EnvelopeKind};

use crate::model::Keyed;

/// The local cache for one live resource.
///
/// UPSERT envelopes shallow-merge the incoming payload's fields over
/// the existing entry -- fields absent from the payload are preserved,
/// present fields win. DELETE removes the key (a no-op if absent).
/// Applying the same UPSERT twice leaves the cache in the same state
/// as applying it once.
pub struct ResourceCache<T: Clone + Send + Sync + 'static> {
    by_key: DashMap<String, Arc<T>>,

    /// Version counter, bumped on every observable mutation.
    version: watch::Sender<u64>,

    /// Full snapshot, rebuilt on mutation for cheap subscription.
    snapshot: watch::Sender<Arc<Vec<Arc<T>>>>,

    /// When the resource last saw an applied envelope. Monotonic
    /// non-decreasing even if the wall clock steps backwards.
    last_updated: watch::Sender<Option<DateTime<Utc>>>,
}

impl<T: Clone + Send + Sync + 'static> ResourceCache<T> {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        let (last_updated, _) = watch::channel(None);

        Self {
            by_key: DashMap::new(),
            version,
            snapshot,
            last_updated,
        }
    }

    // ── Envelope application ─────────────────────────────────────────

    /// Apply one envelope. Returns `true` if the cache changed.
    ///
    /// A payload that is not a JSON object, or that fails to
    /// deserialize after the merge, is discarded with a debug log --
    /// malformed updates are never fatal to the stream.
    pub fn apply(&self, envelope: &Envelope) -> bool
    where
        T: Serialize + DeserializeOwned,
    {
        let changed = match envelope.kind {
            EnvelopeKind::Upsert => self.apply_upsert(envelope),
            EnvelopeKind::Delete => {
                let removed = self.by_key.remove(&envelope.key).is_some();
                if removed {
                    self.rebuild_snapshot();
                    self.bump_version();
                }
                removed
            }
        };

        // Every processed envelope counts as liveness, even a no-op
        // DELETE or a re-applied UPSERT.
        self.touch();
        changed
    }

    /// Apply a batch in receipt order.
    pub fn apply_all(&self, envelopes: &[Envelope])
    where
        T: Serialize + DeserializeOwned,
    {
        for envelope in envelopes {
            self.apply(envelope);
        }
    }

    fn apply_upsert(&self, envelope: &Envelope) -> bool
    where
        T: Serialize + DeserializeOwned,
    {
        let Some(patch) = envelope.payload.as_object() else {
            tracing::debug!(key = %envelope.key, "upsert payload is not an object, discarding");
            return false;
        };

        let existing = self.by_key.get(&envelope.key).map(|r| Arc::clone(r.value()));

        let merged: T = if let Some(current) = existing {
            // Shallow merge: serialize the current entry, overlay the
            // patch's fields, deserialize back.
            let mut base = match serde_json::to_value(current.as_ref()) {
                Ok(Value::Object(map)) => map,
                Ok(_) | Err(_) => {
                    tracing::debug!(key = %envelope.key, "existing entry is not an object, replacing");
                    serde_json::Map::new()
                }
            };
            for (field, value) in patch {
                base.insert(field.clone(), value.clone());
            }
            match serde_json::from_value(Value::Object(base)) {
                Ok(entity) => entity,
                Err(e) => {
                    tracing::debug!(key = %envelope.key, error = %e, "merged entry failed to deserialize, discarding");
                    return false;
                }
            }
        } else {
            match serde_json::from_value(envelope.payload.clone()) {
                Ok(entity) => entity,
                Err(e) => {
                    tracing::debug!(key = %envelope.key, error = %e, "new entry failed to deserialize, discarding");
                    return false;
                }
            }
        };

        self.by_key.insert(envelope.key.clone(), Arc::new(merged));
        self.rebuild_snapshot();
        self.bump_version();
        true
    }

    // ── Direct mutation (optimistic writes) ──────────────────────────

    /// Insert or replace an entity under its own key.
    pub fn upsert_entity(&self, entity: T)
    where
        T: Keyed,
    {
        self.by_key.insert(entity.key(), Arc::new(entity));
        self.rebuild_snapshot();
        self.bump_version();
        self.touch();
    }

    /// Remove an entity by key. Returns the removed entity if present.
    pub fn remove(&self, key: &str) -> Option<Arc<T>> {
        let removed = self.by_key.remove(key).map(|(_, v)| v);
        if removed.is_some() {
            self.rebuild_snapshot();
            self.bump_version();
        }
        removed
    }

    /// Remove all entities.
    pub fn clear(&self) {
        self.by_key.clear();
        self.rebuild_snapshot();
        self.bump_version();
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        self.by_key.get(key).map(|r| Arc::clone(r.value()))
    }

    /// Get the current snapshot (cheap `Arc` clone).
    pub fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes via a `watch::Receiver`.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<T>>>> {
        self.snapshot.subscribe()
    }

    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        *self.last_updated.borrow()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// All current keys, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.by_key.iter().map(|r| r.key().clone()).collect()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn rebuild_snapshot(&self) {
        let values: Vec<Arc<T>> = self.by_key.iter().map(|r| Arc::clone(r.value())).collect();
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }

    fn bump_version(&self) {
        self.version.send_modify(|v| *v += 1);
    }

    fn touch(&self) {
        let now = Utc::now();
        self.last_updated.send_modify(|current| {
            if current.is_none_or(|prev| now > prev) {
                *current = Some(now);
            }
        });
    }
}

impl<T: Clone + Send + Sync + 'static> Default for ResourceCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
