// ── Resource client ──
//
// Bundles the registry, the channel subscriptions and the transport, and
// hands out typed cache stores. Owns the background subscription loop and
// the cable connection, both torn down by `shutdown()`.

use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use secrecy::SecretString;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use modcfg_api::{ApiClient, ChannelEvent, ChannelHandle};

use crate::config::ClientConfig;
use crate::error::CoreError;
use crate::model::{
    GROUP_RESOURCE_CHANNEL, GROUP_RESOURCE_PARAM, MODULE_CONFIG_TYPE,
    MODULE_CONFIGS_GROUP_RESOURCE, ModuleConfig, module_config_descriptor,
};
use crate::registry::{ResourceDescriptor, ResourceRegistry};
use crate::resource::Payload;
use crate::store::{CacheStore, Normalizer};
use crate::subscription::{Subscriptions, SubscriptionBinding};
use crate::transport::Transport;

/// Entry point for consumers.
///
/// Cheaply cloneable via `Arc<ClientInner>`.
#[derive(Clone)]
pub struct ResourceClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    registry: ResourceRegistry,
    subscriptions: Arc<Subscriptions>,
    transport: Arc<dyn Transport>,
    /// One `CacheStore<T>` per resource type, type-erased.
    stores: DashMap<String, Arc<dyn Any + Send + Sync>>,
    cancel: CancellationToken,
    channel: Mutex<Option<ChannelHandle>>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ResourceClient {
    /// Build a client talking REST through an [`ApiClient`].
    pub fn new(config: &ClientConfig) -> Result<Self, CoreError> {
        let api = ApiClient::new(
            config.api_url.as_str(),
            config.token.clone(),
            &config.transport(),
        )?;
        Ok(Self::with_transport(Arc::new(api)))
    }

    /// Build a client over any transport.
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                registry: ResourceRegistry::new(),
                subscriptions: Arc::new(Subscriptions::new()),
                transport,
                stores: DashMap::new(),
                cancel: CancellationToken::new(),
                channel: Mutex::new(None),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.inner.registry
    }

    pub fn subscriptions(&self) -> &Arc<Subscriptions> {
        &self.inner.subscriptions
    }

    pub fn register(&self, descriptor: ResourceDescriptor) -> Result<Arc<ResourceDescriptor>, CoreError> {
        self.inner.registry.register(descriptor)
    }

    // ── Typed stores ─────────────────────────────────────────────────

    /// The cache store for a registered resource type.
    ///
    /// Repeated calls return handles to the same store.
    pub fn cache<T: Payload>(&self, resource_type: &str) -> Result<CacheStore<T>, CoreError> {
        self.cache_with(resource_type, std::convert::identity)
    }

    /// Like [`cache`](Self::cache); `normalize` applies only if this call
    /// creates the store.
    pub fn cache_with<T: Payload>(
        &self,
        resource_type: &str,
        normalize: Normalizer<T>,
    ) -> Result<CacheStore<T>, CoreError> {
        let descriptor = self.inner.registry.get(resource_type)?;

        let erased = match self.inner.stores.entry(resource_type.to_owned()) {
            Entry::Occupied(slot) => Arc::clone(slot.get()),
            Entry::Vacant(slot) => {
                let store = CacheStore::with_normalizer(
                    descriptor,
                    Arc::clone(&self.inner.transport),
                    normalize,
                );
                debug!(resource_type, "cache store created");
                let erased: Arc<dyn Any + Send + Sync> = Arc::new(store);
                slot.insert(Arc::clone(&erased));
                erased
            }
        };

        erased
            .downcast_ref::<CacheStore<T>>()
            .cloned()
            .ok_or_else(|| {
                CoreError::configuration(format!(
                    "cache store for '{resource_type}' holds a different payload type"
                ))
            })
    }

    // ── Channel lifecycle ────────────────────────────────────────────

    /// Drive the subscriptions from an existing event receiver.
    pub async fn spawn_channel(&self, events: broadcast::Receiver<Arc<ChannelEvent>>) {
        let subscriptions = Arc::clone(&self.inner.subscriptions);
        let cancel = self.inner.cancel.child_token();
        let handle = tokio::spawn(subscriptions.run(events, cancel));
        self.inner.task_handles.lock().await.push(handle);
    }

    /// Open the cable connection for every bound channel and start dispatching.
    pub async fn connect_channel(&self, url: Url, token: Option<SecretString>) -> Result<(), CoreError> {
        let identifiers = self.inner.subscriptions.identifiers();
        if identifiers.is_empty() {
            return Err(CoreError::configuration(
                "no channel bindings registered, nothing to subscribe to",
            ));
        }

        info!(url = %url, channels = identifiers.len(), "connecting channel subscriptions");
        let handle =
            ChannelHandle::connect(url, identifiers, self.inner.cancel.child_token(), token).await?;
        let events = handle.subscribe();
        *self.inner.channel.lock().await = Some(handle);
        self.spawn_channel(events).await;
        Ok(())
    }

    /// Wait until the cable connection opened by
    /// [`connect_channel`](Self::connect_channel) stops.
    pub async fn channel_closed(&self) -> Result<(), CoreError> {
        let closed = match self.inner.channel.lock().await.as_ref() {
            Some(handle) => handle.closed(),
            None => return Err(CoreError::configuration("no channel connection is open")),
        };
        closed.await?;
        Ok(())
    }

    /// Stop the channel connection and every background task.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        if let Some(handle) = self.inner.channel.lock().await.take() {
            handle.shutdown();
        }

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        debug!("resource client shut down");
    }
}

/// Register the deckhouse module config type, its channel binding, and
/// return its cache store.
///
/// `normalize` is applied to every hydrated record; pass
/// [`ModuleConfig::default_release`] to always see a `release` block.
pub fn bootstrap_module_configs(
    client: &ResourceClient,
    module: &str,
    normalize: Option<Normalizer<ModuleConfig>>,
) -> Result<CacheStore<ModuleConfig>, CoreError> {
    client.register(module_config_descriptor(module)?)?;
    let store = client.cache_with::<ModuleConfig>(
        MODULE_CONFIG_TYPE,
        normalize.unwrap_or(std::convert::identity),
    )?;

    client.subscriptions().subscribe(
        SubscriptionBinding::new(GROUP_RESOURCE_CHANNEL, Arc::new(store.clone()))
            .with_filter(GROUP_RESOURCE_PARAM, MODULE_CONFIGS_GROUP_RESOURCE),
    )?;
    Ok(store)
}
