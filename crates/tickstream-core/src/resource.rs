// ── Live resources and consumer handles ──
//
// A LiveResource is one synchronized cache plus the engine task that
// feeds it. Consumers hold ResourceHandles: refcounted attachments
// whose last drop cancels the engine and invalidates in-flight
// fetches. The builder is the generic, fully-parametrized surface --
// TradeClient wires concrete endpoints onto it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use tickstream_api::envelope::{Decoder, Envelope};
use tickstream_api::frames::Transport;

use crate::config::SyncParams;
use crate::engine::{ConnectionState, Engine};
use crate::error::{SyncError, mutation_error};
use crate::model::Keyed;
use crate::mutation::{MutationLedger, PendingMutation};
use crate::store::ResourceCache;
use crate::stream::ResourceStream;

/// One-shot server read producing envelopes for the cache.
pub type SnapshotFn =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Vec<Envelope>, tickstream_api::Error>> + Send + Sync>;

/// Server submission of a serialized draft, resolving to the
/// authoritative entity.
pub type SubmitFn<T> =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<T, tickstream_api::Error>> + Send + Sync>;

/// Build the optimistic PENDING entity from a draft and a local id.
/// Returning `None` skips the optimistic insert for this draft.
pub type PendingFn<T> = Arc<dyn Fn(&Value, &str) -> Option<T> + Send + Sync>;

/// How a resource accepts local writes.
pub struct Mutator<T> {
    pub submit: SubmitFn<T>,
    pub pending: PendingFn<T>,
}

impl<T> Clone for Mutator<T> {
    fn clone(&self) -> Self {
        Self {
            submit: Arc::clone(&self.submit),
            pending: Arc::clone(&self.pending),
        }
    }
}

// ── Shared resource state ────────────────────────────────────────────

pub(crate) struct Shared<T: Clone + Send + Sync + 'static> {
    pub(crate) name: String,
    pub(crate) params: SyncParams,
    pub(crate) cache: Arc<ResourceCache<T>>,
    pub(crate) state: Arc<watch::Sender<ConnectionState>>,
    pub(crate) cancel: CancellationToken,
    consumers: AtomicUsize,
    /// Bumped on teardown; in-flight work from an older epoch is
    /// discarded instead of applied to a torn-down cache.
    epoch: AtomicU64,
    snapshot_fn: Option<SnapshotFn>,
    mutator: Option<Mutator<T>>,
    mutations: MutationLedger,
}

impl<T: Clone + Send + Sync + 'static> Shared<T> {
    /// Attach another consumer, unless the resource is already torn
    /// down.
    pub(crate) fn try_attach(self: &Arc<Self>) -> Option<ResourceHandle<T>> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.consumers.fetch_add(1, Ordering::AcqRel);
        if self.cancel.is_cancelled() {
            // Raced with the last detach; undo.
            self.consumers.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        Some(ResourceHandle {
            shared: Arc::clone(self),
            detached: false,
        })
    }

    fn detach(&self) {
        if self.consumers.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.epoch.fetch_add(1, Ordering::AcqRel);
            self.cancel.cancel();
            let _ = self.state.send(ConnectionState::Idle);
            tracing::debug!(resource = %self.name, "last consumer detached, tearing down");
        }
    }
}

// ── Builder ──────────────────────────────────────────────────────────

/// Parametrized constructor for a live resource: name, transports,
/// decode function, snapshot fetch, and mutation wiring are all
/// injected, so the same machinery serves every resource family (and
/// scripted fakes in tests).
pub struct ResourceBuilder<T: Clone + Send + Sync + 'static> {
    name: String,
    params: SyncParams,
    transports: Vec<Arc<dyn Transport>>,
    decoder: Decoder,
    snapshot: Option<SnapshotFn>,
    mutator: Option<Mutator<T>>,
    visibility: watch::Receiver<bool>,
}

impl<T> ResourceBuilder<T>
where
    T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    pub fn new(
        name: impl Into<String>,
        decoder: Decoder,
        visibility: watch::Receiver<bool>,
    ) -> Self {
        Self {
            name: name.into(),
            params: SyncParams::default(),
            transports: Vec::new(),
            decoder,
            snapshot: None,
            mutator: None,
            visibility,
        }
    }

    pub fn params(mut self, params: SyncParams) -> Self {
        self.params = params;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.push(transport);
        self
    }

    pub fn transports(mut self, transports: Vec<Arc<dyn Transport>>) -> Self {
        self.transports = transports;
        self
    }

    pub fn snapshot(mut self, snapshot: SnapshotFn) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn mutator(mut self, mutator: Mutator<T>) -> Self {
        self.mutator = Some(mutator);
        self
    }

    /// Start synchronizing: spawns the engine task and returns the
    /// first consumer handle. Must be called within a Tokio runtime.
    pub fn open(self) -> ResourceHandle<T> {
        let cache = Arc::new(ResourceCache::new());
        let state = Arc::new(watch::channel(ConnectionState::Idle).0);
        let cancel = CancellationToken::new();

        let engine = Engine {
            name: self.name.clone(),
            transports: self.transports,
            decoder: self.decoder,
            cache: Arc::clone(&cache),
            state: Arc::clone(&state),
            visibility: self.visibility,
            cancel: cancel.clone(),
            heartbeat: self.params.heartbeat,
            backoff: self.params.backoff,
        };
        tokio::spawn(engine.run());

        let shared = Arc::new(Shared {
            name: self.name,
            params: self.params,
            cache,
            state,
            cancel,
            consumers: AtomicUsize::new(1),
            epoch: AtomicU64::new(0),
            snapshot_fn: self.snapshot,
            mutator: self.mutator,
            mutations: MutationLedger::new(),
        });

        ResourceHandle {
            shared,
            detached: false,
        }
    }
}

// ── Consumer handle ──────────────────────────────────────────────────

/// A consumer's attachment to a live resource.
///
/// Cloning attaches another consumer. Dropping (or calling
/// [`close`](Self::close)) detaches; when the last consumer detaches,
/// the transport is closed and all timers are cancelled within one
/// scheduling tick.
pub struct ResourceHandle<T: Clone + Send + Sync + 'static> {
    shared: Arc<Shared<T>>,
    detached: bool,
}

impl<T> ResourceHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn params(&self) -> &SyncParams {
        &self.shared.params
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Current snapshot of the cached collection.
    pub fn data(&self) -> Arc<Vec<Arc<T>>> {
        self.shared.cache.snapshot()
    }

    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        self.shared.cache.get(key)
    }

    pub fn len(&self) -> usize {
        self.shared.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.cache.is_empty()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Subscribe to connection-state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.shared.cache.last_updated()
    }

    /// Subscribe to cache snapshots.
    pub fn subscribe(&self) -> ResourceStream<T> {
        ResourceStream::new(self.shared.cache.subscribe())
    }

    /// All tracked optimistic writes, pending and settled.
    pub fn mutations(&self) -> Vec<PendingMutation> {
        self.shared.mutations.snapshot()
    }

    pub fn clear_settled_mutations(&self) {
        self.shared.mutations.clear_settled();
    }

    /// `true` once the resource has been torn down.
    pub fn is_closed(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    pub(crate) fn cache(&self) -> &Arc<ResourceCache<T>> {
        &self.shared.cache
    }

    pub(crate) fn shared(&self) -> &Arc<Shared<T>> {
        &self.shared
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Detach this consumer. Never fails; tearing down an
    /// already-closed resource is a no-op.
    pub fn close(mut self) {
        self.detach_once();
    }

    fn detach_once(&mut self) {
        if !self.detached {
            self.detached = true;
            self.shared.detach();
        }
    }
}

impl<T> ResourceHandle<T>
where
    T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    /// Force a one-shot server read into the cache, independent of the
    /// live transport's state. A result that arrives after the
    /// resource closed is discarded -- no cache mutation, no listener
    /// notification.
    ///
    /// The returned future does not borrow the handle (and does not
    /// count as a consumer), so a `close` can race it; the epoch check
    /// makes the late completion a no-op.
    pub fn fetch_snapshot(
        &self,
    ) -> impl std::future::Future<Output = Result<(), SyncError>> + Send + 'static {
        let shared = Arc::clone(&self.shared);
        async move {
            let Some(fetch) = shared.snapshot_fn.clone() else {
                return Err(SyncError::invalid(format!(
                    "resource '{}' has no snapshot endpoint",
                    shared.name
                )));
            };

            let epoch = shared.epoch.load(Ordering::Acquire);
            let envelopes = fetch().await.map_err(SyncError::from)?;

            if shared.cancel.is_cancelled() || shared.epoch.load(Ordering::Acquire) != epoch {
                tracing::debug!(resource = %shared.name, "snapshot resolved after close, discarding");
                return Ok(());
            }

            shared.cache.apply_all(&envelopes);
            Ok(())
        }
    }
}

impl<T> ResourceHandle<T>
where
    T: Clone + Send + Sync + Keyed + Serialize + DeserializeOwned + 'static,
{
    /// Submit a local change to the server, optimistically reflected
    /// in the cache as a PENDING entry.
    ///
    /// On success the optimistic entry is replaced by the server's
    /// authoritative entity. On failure it is removed and the error is
    /// surfaced: [`SyncError::MutationRejected`] when the server
    /// declined, [`SyncError::Unreachable`] when the call could not be
    /// attempted at all. No result is ever fabricated locally.
    pub async fn mutate<D: Serialize + ?Sized>(&self, draft: &D) -> Result<T, SyncError> {
        let shared = &self.shared;
        let Some(mutator) = shared.mutator.clone() else {
            return Err(SyncError::invalid(format!(
                "resource '{}' does not accept mutations",
                shared.name
            )));
        };

        let draft_value =
            serde_json::to_value(draft).map_err(|e| SyncError::invalid(e.to_string()))?;

        let record = shared.mutations.begin();
        let local_key = record.local_id.clone();

        let inserted = match (mutator.pending)(&draft_value, &local_key) {
            Some(entity) => {
                shared.cache.upsert_entity(entity);
                true
            }
            None => false,
        };

        let epoch = shared.epoch.load(Ordering::Acquire);
        let result = (mutator.submit)(draft_value).await;
        let live =
            !shared.cancel.is_cancelled() && shared.epoch.load(Ordering::Acquire) == epoch;

        match result {
            Ok(entity) => {
                shared.mutations.confirm(&local_key);
                if live {
                    if inserted {
                        shared.cache.remove(&local_key);
                    }
                    shared.cache.upsert_entity(entity.clone());
                }
                Ok(entity)
            }
            Err(e) => {
                shared.mutations.reject(&local_key);
                if live && inserted {
                    shared.cache.remove(&local_key);
                }
                Err(mutation_error(e))
            }
        }
    }
}

impl<T: Clone + Send + Sync + 'static> std::fmt::Debug for ResourceHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("name", &self.shared.name)
            .field("detached", &self.detached)
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Clone for ResourceHandle<T> {
    fn clone(&self) -> Self {
        self.shared.consumers.fetch_add(1, Ordering::AcqRel);
        Self {
            shared: Arc::clone(&self.shared),
            detached: false,
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Drop for ResourceHandle<T> {
    fn drop(&mut self) {
        self.detach_once();
    }
}

// ── Registry ─────────────────────────────────────────────────────────

/// Per-family registry making `open` idempotent per `(name, params)`:
/// a second open with identical parameters attaches to the existing
/// resource instead of spawning a duplicate transport.
pub(crate) struct Registry<T: Clone + Send + Sync + 'static> {
    entries: DashMap<String, Arc<Shared<T>>>,
}

impl<T> Registry<T>
where
    T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub(crate) fn open_or_attach(
        &self,
        name: &str,
        params: &SyncParams,
        build: impl FnOnce() -> ResourceHandle<T>,
    ) -> ResourceHandle<T> {
        if let Some(entry) = self.entries.get(name) {
            if entry.params == *params {
                if let Some(handle) = entry.try_attach() {
                    tracing::debug!(resource = %name, "attached to existing resource");
                    return handle;
                }
            }
            // Parameter change or torn down: fall through and replace.
        }

        let handle = build();
        self.entries
            .insert(name.to_owned(), Arc::clone(handle.shared()));
        handle
    }

    /// Tear down every resource in this family, regardless of
    /// remaining consumers. Used by client shutdown.
    pub(crate) fn close_all(&self) {
        for entry in self.entries.iter() {
            entry.cancel.cancel();
        }
        self.entries.clear();
    }
}
