// ── Reactive resource storage ──

mod cache;

pub use cache::ResourceCache;
