// ── Cache entry bookkeeping ──

use std::sync::Arc;

use futures_util::future::{BoxFuture, Shared};
use serde::Serialize;
use strum::{Display, EnumString};

use crate::error::CoreError;
use crate::resource::{Payload, Resource};

/// Lifecycle state of one cache entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    /// Referenced but never loaded.
    #[default]
    Empty,
    /// A fetch is in flight.
    Fetching,
    /// Holds a current value.
    Ready,
    /// Holds a value the server has since changed.
    Stale,
}

/// Single-flight handle every concurrent reader of a key joins.
pub(crate) type SharedFetch<T> = Shared<BoxFuture<'static, Result<Arc<Resource<T>>, CoreError>>>;

pub(crate) struct CacheEntry<T: Payload> {
    pub(crate) state: CacheState,
    pub(crate) value: Option<Arc<Resource<T>>>,
    pub(crate) in_flight: Option<SharedFetch<T>>,
    /// Generation of the most recent fetch; a landing fetch from an
    /// older generation leaves the entry alone.
    pub(crate) epoch: u64,
    /// Store clock at the last invalidation that hit this entry.
    pub(crate) invalidated_at: u64,
    /// Store clock at the last `put`.
    pub(crate) written_at: u64,
}

impl<T: Payload> Default for CacheEntry<T> {
    fn default() -> Self {
        Self {
            state: CacheState::Empty,
            value: None,
            in_flight: None,
            epoch: 0,
            invalidated_at: 0,
            written_at: 0,
        }
    }
}

/// The latest transition observed on a cache store.
///
/// Published through a `watch` channel, so slow readers only see the most
/// recent change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntryChange {
    /// Monotonic per store; 0 before the first transition.
    pub seq: u64,
    pub key: String,
    pub state: CacheState,
}
