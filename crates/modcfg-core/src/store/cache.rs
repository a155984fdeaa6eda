// ── Typed cache store ──
//
// One store per resource type. Entries live in a DashMap; every transition
// happens inside a shard lock that is never held across an `.await`.
// Fetches run on spawned tasks so they land in the cache even after every
// caller has gone away.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::watch;

use crate::error::CoreError;
use crate::registry::{ResolvedRoute, ResourceDescriptor, verbs};
use crate::resource::{Payload, Resource};
use crate::stream::EntryStream;
use crate::subscription::Invalidation;
use crate::transport::Transport;

use super::entry::{CacheEntry, CacheState, EntryChange, SharedFetch};

/// Normalizer applied to every hydrated payload.
pub type Normalizer<T> = fn(T) -> T;

pub(crate) struct StoreInner<T: Payload> {
    descriptor: Arc<ResourceDescriptor>,
    transport: Arc<dyn Transport>,
    normalize: Normalizer<T>,
    entries: DashMap<String, CacheEntry<T>>,
    clock: AtomicU64,
    changes: watch::Sender<EntryChange>,
    last_invalidation: watch::Sender<Option<DateTime<Utc>>>,
}

impl<T: Payload> StoreInner<T> {
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn notify(&self, key: &str, state: CacheState) {
        self.changes.send_modify(|change| {
            change.seq += 1;
            key.clone_into(&mut change.key);
            change.state = state;
        });
    }
}

/// Typed, single-flight cache for one registered resource type.
///
/// Cheaply cloneable; all clones share the same entries.
pub struct CacheStore<T: Payload> {
    inner: Arc<StoreInner<T>>,
}

impl<T: Payload> Clone for CacheStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Payload> CacheStore<T> {
    pub fn new(descriptor: Arc<ResourceDescriptor>, transport: Arc<dyn Transport>) -> Self {
        Self::with_normalizer(descriptor, transport, std::convert::identity)
    }

    /// Like [`new`](Self::new), applying `normalize` to each hydrated payload.
    pub fn with_normalizer(
        descriptor: Arc<ResourceDescriptor>,
        transport: Arc<dyn Transport>,
        normalize: Normalizer<T>,
    ) -> Self {
        let (changes, _) = watch::channel(EntryChange::default());
        let (last_invalidation, _) = watch::channel(None);
        Self {
            inner: Arc::new(StoreInner {
                descriptor,
                transport,
                normalize,
                entries: DashMap::new(),
                clock: AtomicU64::new(0),
                changes,
                last_invalidation,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<StoreInner<T>>) -> Self {
        Self { inner }
    }

    pub fn descriptor(&self) -> &Arc<ResourceDescriptor> {
        &self.inner.descriptor
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Return the cached instance for `key`, fetching it when absent or stale.
    ///
    /// Concurrent callers for the same key share one transport call and
    /// receive the same `Arc` (or the same error).
    pub async fn get_or_fetch(&self, key: &str) -> Result<Arc<Resource<T>>, CoreError> {
        let fetch = {
            let mut entry = self.inner.entries.entry(key.to_owned()).or_default();
            if entry.state == CacheState::Ready {
                if let Some(ref value) = entry.value {
                    return Ok(Arc::clone(value));
                }
            }
            let joined = if entry.state == CacheState::Fetching {
                entry.in_flight.clone()
            } else {
                None
            };
            match joined {
                Some(in_flight) => {
                    tracing::trace!(resource_type = %self.resource_type(), key, "joining in-flight fetch");
                    in_flight
                }
                None => self.begin_fetch(key, entry.value_mut())?,
            }
        };
        fetch.await
    }

    /// Cached value without fetching. Stale values are returned as-is.
    pub fn peek(&self, key: &str) -> Option<Arc<Resource<T>>> {
        self.inner
            .entries
            .get(key)
            .and_then(|entry| entry.value.clone())
    }

    pub fn state(&self, key: &str) -> CacheState {
        self.inner
            .entries
            .get(key)
            .map_or(CacheState::Empty, |entry| entry.state)
    }

    /// Number of entries currently holding a value.
    pub fn len(&self) -> usize {
        self.inner
            .entries
            .iter()
            .filter(|entry| entry.value.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys of entries currently holding a value, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .inner
            .entries
            .iter()
            .filter(|entry| entry.value.is_some())
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Subscribe to entry transitions.
    pub fn subscribe(&self) -> EntryStream {
        EntryStream::new(self.inner.changes.subscribe())
    }

    /// When this store last accepted an invalidation.
    pub fn last_invalidation(&self) -> Option<DateTime<Utc>> {
        *self.inner.last_invalidation.borrow()
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Mark matching Ready entries Stale. Returns how many entries were hit.
    ///
    /// Empty and Stale entries are left alone; an in-flight fetch lands Stale.
    pub fn invalidate(&self, scope: &Invalidation) -> usize {
        let now = self.inner.tick();
        let dynamic = self.inner.descriptor.cache_policy().dynamic_cache;
        let mut hit = 0;

        let mut apply = |key: &str, entry: &mut CacheEntry<T>| match entry.state {
            CacheState::Empty | CacheState::Stale => {}
            CacheState::Fetching => {
                entry.invalidated_at = now;
                hit += 1;
            }
            CacheState::Ready => {
                entry.invalidated_at = now;
                entry.state = CacheState::Stale;
                entry.value = entry.value.take().map(|v| Arc::new(v.with_stale(true)));
                self.inner.notify(key, CacheState::Stale);
                hit += 1;
                if dynamic {
                    self.refetch_eagerly(key, entry);
                }
            }
        };

        match scope {
            Invalidation::All => {
                for mut entry in self.inner.entries.iter_mut() {
                    let key = entry.key().clone();
                    apply(key.as_str(), entry.value_mut());
                }
            }
            Invalidation::Key(key) => {
                if let Some(mut entry) = self.inner.entries.get_mut(key.as_str()) {
                    apply(key.as_str(), entry.value_mut());
                }
            }
        }

        if hit > 0 {
            self.inner.last_invalidation.send_replace(Some(Utc::now()));
        }
        tracing::debug!(resource_type = %self.resource_type(), ?scope, hit, "invalidated");
        hit
    }

    /// Store `resource` under `key` as the current value.
    ///
    /// A fetch already in flight for `key` will not overwrite it when it lands.
    pub fn put(&self, key: &str, resource: Resource<T>) -> Arc<Resource<T>> {
        let now = self.inner.tick();
        let mut resource = resource;
        key.clone_into(&mut resource.entry_key);
        resource.stale = false;
        resource.store = Arc::downgrade(&self.inner);
        let value = Arc::new(resource);

        let mut entry = self.inner.entries.entry(key.to_owned()).or_default();
        entry.written_at = now;
        entry.value = Some(Arc::clone(&value));
        if entry.state != CacheState::Fetching {
            entry.state = CacheState::Ready;
        }
        self.inner.notify(key, entry.state);
        value
    }

    /// Send `resource` through the `update` verb and store the result.
    pub async fn save(&self, resource: &Resource<T>) -> Result<Arc<Resource<T>>, CoreError> {
        let route = self
            .inner
            .descriptor
            .resolve(verbs::UPDATE, &[("key", resource.primary_key())])?;
        let body = resource.wire_body()?;

        tracing::debug!(
            resource_type = %self.resource_type(),
            key = resource.primary_key(),
            method = %route.method,
            url = %route.url,
            "saving resource"
        );

        let response = self
            .inner
            .transport
            .send(route.request().with_body(body))
            .await?;

        let updated = match response {
            Some(body) if route.store_response => self.hydrate(body)?,
            _ => resource.clone(),
        };
        Ok(self.put(resource.entry_key(), updated))
    }

    /// Decode a raw body into an instance bound to this store.
    pub fn hydrate(&self, body: Value) -> Result<Resource<T>, CoreError> {
        let descriptor = &self.inner.descriptor;
        let pointer = descriptor.primary_key_pointer();
        let primary_key = match body.pointer(pointer) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(CoreError::MissingPrimaryKey {
                    resource_type: descriptor.resource_type().to_owned(),
                    pointer: pointer.to_owned(),
                });
            }
        };

        let payload: T = serde_json::from_value(body).map_err(|e| CoreError::Decode {
            resource_type: descriptor.resource_type().to_owned(),
            message: e.to_string(),
        })?;

        Ok(Resource {
            entry_key: primary_key.clone(),
            primary_key,
            payload: (self.inner.normalize)(payload),
            stale: false,
            descriptor: Arc::clone(descriptor),
            store: Arc::downgrade(&self.inner),
        })
    }

    // ── Fetch machinery ──────────────────────────────────────────────

    fn resource_type(&self) -> &str {
        self.inner.descriptor.resource_type()
    }

    /// Move `entry` to Fetching and spawn the transport call.
    fn begin_fetch(&self, key: &str, entry: &mut CacheEntry<T>) -> Result<SharedFetch<T>, CoreError> {
        let route = self.inner.descriptor.resolve(verbs::GET, &[("key", key)])?;

        let started_at = self.inner.tick();
        entry.epoch += 1;
        let epoch = entry.epoch;
        let prior = entry.state;
        entry.state = CacheState::Fetching;

        tracing::debug!(
            resource_type = %self.resource_type(),
            key,
            url = %route.url,
            ?prior,
            "fetching resource"
        );

        let store = self.clone();
        let key_owned = key.to_owned();
        let task = tokio::spawn(async move {
            let result = store.fetch(&route, &key_owned).await;
            store.complete_fetch(&key_owned, epoch, started_at, prior, &route, result)
        });

        let fetch = async move {
            task.await
                .unwrap_or_else(|e| Err(CoreError::Internal(format!("fetch task failed: {e}"))))
        }
        .boxed()
        .shared();

        entry.in_flight = Some(fetch.clone());
        self.inner.notify(key, CacheState::Fetching);
        Ok(fetch)
    }

    async fn fetch(&self, route: &ResolvedRoute, key: &str) -> Result<Resource<T>, CoreError> {
        let body = self.inner.transport.send(route.request()).await?;
        let body = body.ok_or_else(|| CoreError::Decode {
            resource_type: self.resource_type().to_owned(),
            message: "empty response body".into(),
        })?;
        let mut resource = self.hydrate(body)?;
        if resource.primary_key != key {
            tracing::trace!(
                requested = key,
                primary_key = %resource.primary_key,
                "fetched instance cached under requested key"
            );
        }
        key.clone_into(&mut resource.entry_key);
        Ok(resource)
    }

    /// Apply a landed fetch to its entry and hand the caller its result.
    fn complete_fetch(
        &self,
        key: &str,
        epoch: u64,
        started_at: u64,
        prior: CacheState,
        route: &ResolvedRoute,
        result: Result<Resource<T>, CoreError>,
    ) -> Result<Arc<Resource<T>>, CoreError> {
        let Some(mut entry) = self.inner.entries.get_mut(key) else {
            return result.map(Arc::new);
        };
        if entry.epoch != epoch {
            return result.map(Arc::new);
        }
        entry.in_flight = None;

        let fetched = match result {
            Ok(resource) => resource,
            Err(e) => {
                // A put that landed mid-fetch still counts as current.
                if entry.written_at > started_at {
                    self.settle_written(key, entry.value_mut());
                } else {
                    entry.state = prior;
                    self.inner.notify(key, entry.state);
                }
                tracing::debug!(
                    resource_type = %self.resource_type(),
                    key,
                    error = %e,
                    "fetch failed"
                );
                return Err(e);
            }
        };

        if !route.store_response {
            if entry.written_at > started_at {
                self.settle_written(key, entry.value_mut());
            } else {
                entry.state = prior;
                self.inner.notify(key, entry.state);
            }
            return Ok(Arc::new(fetched));
        }

        let invalidated = entry.invalidated_at > started_at;

        if entry.written_at > started_at {
            // The put value wins over the fetched one.
            return self
                .settle_written(key, entry.value_mut())
                .ok_or_else(|| CoreError::Internal("written entry has no value".into()));
        }

        let mut fetched = fetched;
        fetched.stale = invalidated;
        let value = Arc::new(fetched);
        entry.value = Some(Arc::clone(&value));
        entry.state = if invalidated {
            CacheState::Stale
        } else {
            CacheState::Ready
        };
        self.inner.notify(key, entry.state);

        tracing::debug!(
            resource_type = %self.resource_type(),
            key,
            state = %entry.state,
            "fetch landed"
        );

        if invalidated && self.inner.descriptor.cache_policy().dynamic_cache {
            self.refetch_eagerly(key, entry.value_mut());
        }
        Ok(value)
    }

    /// Settle an entry whose `put` landed while a fetch was in flight.
    ///
    /// The put value stays, but an invalidation newer than the put still
    /// marks it Stale.
    fn settle_written(&self, key: &str, entry: &mut CacheEntry<T>) -> Option<Arc<Resource<T>>> {
        let stale = entry.invalidated_at > entry.written_at;
        if stale {
            entry.state = CacheState::Stale;
            entry.value = entry.value.take().map(|v| Arc::new(v.with_stale(true)));
        } else {
            entry.state = CacheState::Ready;
        }
        self.inner.notify(key, entry.state);

        let current = entry.value.clone();
        if stale && self.inner.descriptor.cache_policy().dynamic_cache {
            self.refetch_eagerly(key, entry);
        }
        current
    }

    /// Start a background refetch for a Stale entry (dynamic cache policy).
    fn refetch_eagerly(&self, key: &str, entry: &mut CacheEntry<T>) {
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::warn!(key, "no async runtime, eager refetch skipped");
            return;
        }
        if let Err(e) = self.begin_fetch(key, entry) {
            tracing::warn!(key, error = %e, "eager refetch not started");
        }
    }
}

impl<T: Payload> std::fmt::Debug for CacheStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("resource_type", &self.resource_type())
            .field("entries", &self.inner.entries.len())
            .finish_non_exhaustive()
    }
}
