// tickstream-core: the live resource synchronizer.
//
// One generic component keeps a local cache of a named resource
// (quotes, orders, positions, watchlist) current over a transport
// chosen from an ordered preference list with automatic fallback,
// exposes cache + connection state to subscribers, and accepts
// optimistic mutations reconciled against the server.

pub mod backoff;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod mutation;
pub mod resource;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use backoff::BackoffPolicy;
pub use client::TradeClient;
pub use config::{ClientConfig, SyncParams};
pub use engine::ConnectionState;
pub use error::SyncError;
pub use mutation::{MutationStatus, PendingMutation};
pub use resource::{Mutator, PendingFn, ResourceBuilder, ResourceHandle, SnapshotFn, SubmitFn};
pub use store::ResourceCache;
pub use stream::{ResourceStream, ResourceWatchStream};

// Re-export model types at the crate root for ergonomics.
pub use model::{Keyed, Order, OrderDraft, OrderKind, OrderStatus, Position, Quote, Side, Watchlist};

// The transport seam, re-exported so consumers need only one crate.
pub use tickstream_api::frames::TransportKind;
