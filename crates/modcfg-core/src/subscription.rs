// ── Channel subscriptions ──
//
// Bindings from cable channels to cache stores. Each event that matches a
// binding becomes an invalidation on that binding's store. Dispatch is
// synchronous and never waits on a fetch.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use modcfg_api::{ChannelEvent, ChannelIdentifier};

use crate::error::CoreError;
use crate::resource::Payload;
use crate::store::CacheStore;

/// Which entries of a store an invalidation targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    All,
    Key(String),
}

/// Type-erased invalidation target, so bindings can hold any cache store.
pub trait Invalidate: Send + Sync {
    fn resource_type(&self) -> &str;
    fn invalidate(&self, scope: &Invalidation) -> usize;
}

impl<T: Payload> Invalidate for CacheStore<T> {
    fn resource_type(&self) -> &str {
        self.descriptor().resource_type()
    }

    fn invalidate(&self, scope: &Invalidation) -> usize {
        CacheStore::invalidate(self, scope)
    }
}

/// How a matching event maps onto cache entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum InvalidationScope {
    /// Every entry of the bound resource type.
    #[default]
    ResourceType,
    /// The entry whose key sits at `pointer` inside the event message.
    /// Falls back to every entry when the message carries no key.
    ByKey { pointer: String },
}

/// One channel → cache store binding.
pub struct SubscriptionBinding {
    channel: String,
    filter: BTreeMap<String, String>,
    scope: InvalidationScope,
    target: Arc<dyn Invalidate>,
}

impl SubscriptionBinding {
    pub fn new(channel: impl Into<String>, target: Arc<dyn Invalidate>) -> Self {
        Self {
            channel: channel.into(),
            filter: BTreeMap::new(),
            scope: InvalidationScope::default(),
            target,
        }
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter.insert(key.into(), value.into());
        self
    }

    pub fn with_scope(mut self, scope: InvalidationScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn resource_type(&self) -> &str {
        self.target.resource_type()
    }

    /// The cable identifier to subscribe with.
    pub fn identifier(&self) -> ChannelIdentifier {
        self.filter
            .iter()
            .fold(ChannelIdentifier::new(&self.channel), |ident, (k, v)| {
                ident.with_param(k, v)
            })
    }

    /// Channel name equal and every filter pair present in the event params.
    pub fn matches(&self, event: &ChannelEvent) -> bool {
        event.channel == self.channel
            && self
                .filter
                .iter()
                .all(|(k, v)| event.params.get(k) == Some(v))
    }

    /// The invalidation a matching event produces.
    pub fn invalidation_for(&self, event: &ChannelEvent) -> Invalidation {
        match &self.scope {
            InvalidationScope::ResourceType => Invalidation::All,
            InvalidationScope::ByKey { pointer } => event
                .message
                .pointer(pointer)
                .and_then(serde_json::Value::as_str)
                .map_or(Invalidation::All, |key| Invalidation::Key(key.to_owned())),
        }
    }
}

impl std::fmt::Debug for SubscriptionBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionBinding")
            .field("channel", &self.channel)
            .field("filter", &self.filter)
            .field("scope", &self.scope)
            .field("resource_type", &self.resource_type())
            .finish()
    }
}

/// All active bindings, at most one per resource type.
#[derive(Debug, Default)]
pub struct Subscriptions {
    bindings: RwLock<Vec<Arc<SubscriptionBinding>>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a binding. Fails if its resource type already has one.
    pub fn subscribe(&self, binding: SubscriptionBinding) -> Result<Arc<SubscriptionBinding>, CoreError> {
        let mut bindings = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
        if bindings
            .iter()
            .any(|b| b.resource_type() == binding.resource_type())
        {
            return Err(CoreError::configuration(format!(
                "resource type '{}' already has a channel subscription",
                binding.resource_type()
            )));
        }

        tracing::debug!(
            channel = %binding.channel,
            filter = ?binding.filter,
            resource_type = %binding.resource_type(),
            "channel binding registered"
        );
        let binding = Arc::new(binding);
        bindings.push(Arc::clone(&binding));
        Ok(binding)
    }

    /// Distinct identifiers to subscribe with on the cable.
    pub fn identifiers(&self) -> Vec<ChannelIdentifier> {
        let bindings = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
        let mut idents: Vec<ChannelIdentifier> = Vec::with_capacity(bindings.len());
        for ident in bindings.iter().map(|b| b.identifier()) {
            if !idents.contains(&ident) {
                idents.push(ident);
            }
        }
        idents
    }

    pub fn len(&self) -> usize {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Route one event to every matching binding. Returns entries invalidated.
    pub fn dispatch(&self, event: &ChannelEvent) -> usize {
        let matching: Vec<Arc<SubscriptionBinding>> = self
            .bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|b| b.matches(event))
            .cloned()
            .collect();

        if matching.is_empty() {
            tracing::trace!(channel = %event.channel, params = ?event.params, "event matched no binding");
            return 0;
        }

        matching
            .iter()
            .map(|binding| {
                let scope = binding.invalidation_for(event);
                binding.target.invalidate(&scope)
            })
            .sum()
    }

    /// Invalidate every bound store.
    pub fn invalidate_all(&self) -> usize {
        let bindings: Vec<Arc<SubscriptionBinding>> = self
            .bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        bindings
            .iter()
            .map(|b| b.target.invalidate(&Invalidation::All))
            .sum()
    }

    /// Feed channel events into `dispatch` until cancelled or the channel closes.
    ///
    /// A lagged receiver may have missed events, so every bound store is
    /// invalidated.
    pub async fn run(
        self: Arc<Self>,
        mut events: broadcast::Receiver<Arc<ChannelEvent>>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) => {
                        let hit = self.dispatch(&event);
                        tracing::debug!(channel = %event.channel, hit, "channel event dispatched");
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "channel receiver lagged, invalidating all bindings");
                        self.invalidate_all();
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("channel event stream closed");
                        break;
                    }
                },
            }
        }
        tracing::debug!("subscription loop exiting");
    }
}
