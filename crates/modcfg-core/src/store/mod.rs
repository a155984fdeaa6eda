// ── Cache store ──
//
// Typed per-resource-type caches with single-flight fetch and
// stale-marking invalidation.

mod cache;
mod entry;

pub use cache::{CacheStore, Normalizer};
pub use entry::{CacheState, EntryChange};

pub(crate) use cache::StoreInner;
