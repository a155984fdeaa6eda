#![allow(clippy::unwrap_used)]
// Cache store semantics against an in-memory transport.

mod common;

use std::sync::Arc;

use serde_json::{Value, json};

use modcfg_api::HttpMethod;
use modcfg_core::model::module_config_descriptor;
use modcfg_core::{
    CachePolicy, CacheState, CacheStore, CoreError, Invalidation, ModuleConfig,
    ResourceDescriptor, Transport, VerbSpec, verbs,
};

use tokio_test::{assert_pending, assert_ready, task};

use common::{FakeTransport, module_config, wait_until};

// ── Helpers ─────────────────────────────────────────────────────────

const KEY: &str = "uid-1";

fn store_over(transport: &Arc<FakeTransport>) -> CacheStore<ModuleConfig> {
    let descriptor = Arc::new(module_config_descriptor("deckhouse").unwrap());
    CacheStore::new(descriptor, Arc::clone(transport) as Arc<dyn Transport>)
}

fn store_with(
    transport: &Arc<FakeTransport>,
    descriptor: ResourceDescriptor,
) -> CacheStore<ModuleConfig> {
    CacheStore::new(Arc::new(descriptor), Arc::clone(transport) as Arc<dyn Transport>)
}

fn http_error(status: u16) -> modcfg_api::Error {
    modcfg_api::Error::Http {
        status,
        message: "backend unavailable".into(),
        reason: None,
    }
}

// ── Single flight ───────────────────────────────────────────────────

#[tokio::test]
async fn test_concurrent_reads_share_one_fetch() {
    let transport = FakeTransport::gated(module_config(KEY, "Stable"));
    let store = store_over(&transport);

    let (a, b, ()) = tokio::join!(store.get_or_fetch(KEY), store.get_or_fetch(KEY), async {
        wait_until(|| transport.count(HttpMethod::Get) == 1).await;
        assert_eq!(store.state(KEY), CacheState::Fetching);
        transport.release(1);
    });

    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(transport.count(HttpMethod::Get), 1);
    assert_eq!(store.state(KEY), CacheState::Ready);
    assert_eq!(a.primary_key(), KEY);
    assert_eq!(a.settings().release_channel, "Stable");
}

#[tokio::test]
async fn test_readers_park_until_the_fetch_lands() {
    let transport = FakeTransport::gated(module_config(KEY, "Stable"));
    let store = store_over(&transport);

    let mut first = task::spawn(store.get_or_fetch(KEY));
    let mut second = task::spawn(store.get_or_fetch(KEY));
    assert_pending!(first.poll());
    assert_pending!(second.poll());

    wait_until(|| transport.count(HttpMethod::Get) == 1).await;
    transport.release(1);
    wait_until(|| store.state(KEY) == CacheState::Ready).await;

    assert!(first.is_woken());
    let a = assert_ready!(first.poll()).unwrap();
    let b = assert_ready!(second.poll()).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(transport.count(HttpMethod::Get), 1);
}

#[tokio::test]
async fn test_ready_entry_is_served_from_cache() {
    let transport = FakeTransport::new(module_config(KEY, "Stable"));
    let store = store_over(&transport);

    let first = store.get_or_fetch(KEY).await.unwrap();
    let second = store.get_or_fetch(KEY).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(transport.count(HttpMethod::Get), 1);
    assert_eq!(store.len(), 1);
    assert_eq!(store.keys(), vec![KEY.to_owned()]);
}

#[tokio::test]
async fn test_joined_callers_share_the_error() {
    let transport = FakeTransport::gated(module_config(KEY, "Stable"));
    transport.push_reply(Err(http_error(503)));
    let store = store_over(&transport);

    let (a, b, ()) = tokio::join!(store.get_or_fetch(KEY), store.get_or_fetch(KEY), async {
        wait_until(|| transport.count(HttpMethod::Get) == 1).await;
        transport.release(1);
    });

    for result in [a, b] {
        let err = result.unwrap_err();
        assert_eq!(err.transport().and_then(modcfg_api::Error::status), Some(503));
    }
    assert_eq!(transport.count(HttpMethod::Get), 1);
}

// ── Invalidation ────────────────────────────────────────────────────

#[tokio::test]
async fn test_invalidation_during_fetch_lands_stale() {
    let transport = FakeTransport::gated(module_config(KEY, "Stable"));
    let store = store_over(&transport);

    let (fetched, ()) = tokio::join!(store.get_or_fetch(KEY), async {
        wait_until(|| transport.count(HttpMethod::Get) == 1).await;
        assert_eq!(store.invalidate(&Invalidation::All), 1);
        transport.release(1);
    });

    let fetched = fetched.unwrap();
    assert!(fetched.is_stale());
    assert_eq!(store.state(KEY), CacheState::Stale);

    transport.release(1);
    let refreshed = store.get_or_fetch(KEY).await.unwrap();
    assert!(!refreshed.is_stale());
    assert_eq!(store.state(KEY), CacheState::Ready);
    assert_eq!(transport.count(HttpMethod::Get), 2);
}

#[tokio::test]
async fn test_invalidation_is_idempotent() {
    let transport = FakeTransport::new(module_config(KEY, "Stable"));
    let store = store_over(&transport);

    assert_eq!(store.invalidate(&Invalidation::All), 0);
    assert_eq!(store.state(KEY), CacheState::Empty);
    assert!(store.last_invalidation().is_none());

    store.get_or_fetch(KEY).await.unwrap();
    assert_eq!(store.invalidate(&Invalidation::Key(KEY.into())), 1);
    assert_eq!(store.state(KEY), CacheState::Stale);
    assert!(store.peek(KEY).unwrap().is_stale());
    assert!(store.last_invalidation().is_some());

    assert_eq!(store.invalidate(&Invalidation::All), 0);
    assert_eq!(store.invalidate(&Invalidation::Key(KEY.into())), 0);
    assert_eq!(store.state(KEY), CacheState::Stale);
    assert_eq!(transport.count(HttpMethod::Get), 1);
}

#[tokio::test]
async fn test_key_invalidation_leaves_other_entries() {
    let transport = FakeTransport::new(module_config(KEY, "Stable"));
    let store = store_over(&transport);

    store.get_or_fetch("a").await.unwrap();
    store.get_or_fetch("b").await.unwrap();

    assert_eq!(store.invalidate(&Invalidation::Key("a".into())), 1);
    assert_eq!(store.state("a"), CacheState::Stale);
    assert_eq!(store.state("b"), CacheState::Ready);
    assert_eq!(store.invalidate(&Invalidation::Key("missing".into())), 0);
}

#[tokio::test]
async fn test_dynamic_cache_refetches_eagerly() {
    let transport = FakeTransport::new(module_config(KEY, "Stable"));
    let descriptor = ResourceDescriptor::builder("deckhouse", "k8s/deckhouse.io/moduleconfigs/deckhouse")
        .verb(verbs::GET, VerbSpec::new(HttpMethod::Get).store_response(true))
        .cache_policy(CachePolicy { dynamic_cache: true })
        .build()
        .unwrap();
    let store = store_with(&transport, descriptor);

    store.get_or_fetch(KEY).await.unwrap();
    store.invalidate(&Invalidation::All);
    assert_eq!(store.state(KEY), CacheState::Fetching);

    wait_until(|| store.state(KEY) == CacheState::Ready).await;
    assert_eq!(transport.count(HttpMethod::Get), 2);
}

// ── Put ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_put_supersedes_in_flight_fetch() {
    let transport = FakeTransport::gated(module_config(KEY, "Stable"));
    let store = store_over(&transport);

    let (fetched, ()) = tokio::join!(store.get_or_fetch(KEY), async {
        wait_until(|| transport.count(HttpMethod::Get) == 1).await;
        let local = store.hydrate(module_config(KEY, "Alpha")).unwrap();
        store.put(KEY, local);
        transport.release(1);
    });

    assert_eq!(fetched.unwrap().settings().release_channel, "Alpha");
    assert_eq!(store.state(KEY), CacheState::Ready);
    assert_eq!(store.peek(KEY).unwrap().settings().release_channel, "Alpha");
}

#[tokio::test]
async fn test_invalidation_after_put_survives_failed_fetch() {
    let transport = FakeTransport::gated(module_config(KEY, "Stable"));
    transport.push_reply(Err(http_error(502)));
    let store = store_over(&transport);

    let (fetched, ()) = tokio::join!(store.get_or_fetch(KEY), async {
        wait_until(|| transport.count(HttpMethod::Get) == 1).await;
        store.put(KEY, store.hydrate(module_config(KEY, "Alpha")).unwrap());
        assert_eq!(store.invalidate(&Invalidation::All), 1);
        transport.release(1);
    });

    assert!(matches!(fetched.unwrap_err(), CoreError::Transport(_)));
    assert_eq!(store.state(KEY), CacheState::Stale);
    let kept = store.peek(KEY).unwrap();
    assert!(kept.is_stale());
    assert_eq!(kept.settings().release_channel, "Alpha");

    // The next read goes back to the server.
    transport.release(1);
    store.get_or_fetch(KEY).await.unwrap();
    assert_eq!(transport.count(HttpMethod::Get), 2);
}

#[tokio::test]
async fn test_invalidation_after_put_survives_unstored_fetch() {
    let transport = FakeTransport::gated(module_config(KEY, "Stable"));
    let descriptor = ResourceDescriptor::builder("deckhouse", "k8s/deckhouse.io/moduleconfigs/deckhouse")
        .verb(verbs::GET, VerbSpec::new(HttpMethod::Get))
        .build()
        .unwrap();
    let store = store_with(&transport, descriptor);

    let (fetched, ()) = tokio::join!(store.get_or_fetch(KEY), async {
        wait_until(|| transport.count(HttpMethod::Get) == 1).await;
        store.put(KEY, store.hydrate(module_config(KEY, "Alpha")).unwrap());
        store.invalidate(&Invalidation::Key(KEY.into()));
        transport.release(1);
    });

    assert_eq!(fetched.unwrap().settings().release_channel, "Stable");
    assert_eq!(store.state(KEY), CacheState::Stale);
    assert!(store.peek(KEY).unwrap().is_stale());
}

#[tokio::test]
async fn test_put_without_later_invalidation_stays_ready_after_failed_fetch() {
    let transport = FakeTransport::gated(module_config(KEY, "Stable"));
    transport.push_reply(Err(http_error(502)));
    let store = store_over(&transport);

    let (fetched, ()) = tokio::join!(store.get_or_fetch(KEY), async {
        wait_until(|| transport.count(HttpMethod::Get) == 1).await;
        store.put(KEY, store.hydrate(module_config(KEY, "Alpha")).unwrap());
        transport.release(1);
    });

    fetched.unwrap_err();
    assert_eq!(store.state(KEY), CacheState::Ready);
    assert!(!store.peek(KEY).unwrap().is_stale());
}

#[tokio::test]
async fn test_put_clears_stale_marker() {
    let transport = FakeTransport::new(module_config(KEY, "Stable"));
    let store = store_over(&transport);

    let current = store.get_or_fetch(KEY).await.unwrap();
    store.invalidate(&Invalidation::All);

    let stored = store.put(KEY, (*current).clone());
    assert!(!stored.is_stale());
    assert_eq!(store.state(KEY), CacheState::Ready);
}

// ── Failures ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_failed_fetch_restores_prior_state() {
    let transport = FakeTransport::new(module_config(KEY, "Stable"));
    let store = store_over(&transport);

    transport.push_reply(Err(http_error(502)));
    let err = store.get_or_fetch(KEY).await.unwrap_err();
    assert!(matches!(err, CoreError::Transport(_)));
    assert_eq!(store.state(KEY), CacheState::Empty);

    store.get_or_fetch(KEY).await.unwrap();
    store.invalidate(&Invalidation::All);

    transport.push_reply(Err(http_error(502)));
    store.get_or_fetch(KEY).await.unwrap_err();
    assert_eq!(store.state(KEY), CacheState::Stale);
    assert_eq!(
        store.peek(KEY).unwrap().settings().release_channel,
        "Stable"
    );
    // No implicit retry.
    assert_eq!(transport.count(HttpMethod::Get), 3);
}

#[tokio::test]
async fn test_empty_body_is_a_decode_error() {
    let transport = FakeTransport::new(Value::Null);
    transport.push_reply(Ok(None));
    let store = store_over(&transport);

    let err = store.get_or_fetch(KEY).await.unwrap_err();
    assert!(matches!(err, CoreError::Decode { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_missing_primary_key() {
    let mut body = module_config(KEY, "Stable");
    body["metadata"].as_object_mut().unwrap().remove("uid");
    let transport = FakeTransport::new(body);
    let store = store_over(&transport);

    let err = store.get_or_fetch(KEY).await.unwrap_err();
    assert!(
        matches!(err, CoreError::MissingPrimaryKey { ref pointer, .. } if pointer == "/metadata/uid"),
        "got {err:?}"
    );
}

// ── Retention / lifecycle ───────────────────────────────────────────

#[tokio::test]
async fn test_unstored_get_is_not_retained() {
    let transport = FakeTransport::new(module_config(KEY, "Stable"));
    let descriptor = ResourceDescriptor::builder("deckhouse", "k8s/deckhouse.io/moduleconfigs/deckhouse")
        .verb(verbs::GET, VerbSpec::new(HttpMethod::Get))
        .build()
        .unwrap();
    let store = store_with(&transport, descriptor);

    let fetched = store.get_or_fetch(KEY).await.unwrap();
    assert_eq!(fetched.primary_key(), KEY);
    assert_eq!(store.state(KEY), CacheState::Empty);
    assert!(store.peek(KEY).is_none());

    store.get_or_fetch(KEY).await.unwrap();
    assert_eq!(transport.count(HttpMethod::Get), 2);
}

#[tokio::test]
async fn test_abandoned_fetch_still_lands() {
    let transport = FakeTransport::gated(module_config(KEY, "Stable"));
    let store = store_over(&transport);

    let reader = tokio::spawn({
        let store = store.clone();
        async move { store.get_or_fetch(KEY).await }
    });
    wait_until(|| transport.count(HttpMethod::Get) == 1).await;
    reader.abort();

    transport.release(1);
    wait_until(|| store.state(KEY) == CacheState::Ready).await;
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_transitions_are_observable() {
    let transport = FakeTransport::new(module_config(KEY, "Stable"));
    let store = store_over(&transport);
    let mut changes = store.subscribe();
    assert_eq!(changes.current().seq, 0);

    store.get_or_fetch(KEY).await.unwrap();
    let change = changes.changed().await.unwrap();
    assert_eq!(change.key, KEY);
    assert_eq!(change.state, CacheState::Ready);

    store.invalidate(&Invalidation::All);
    assert_eq!(changes.changed().await.unwrap().state, CacheState::Stale);
}

// ── Save ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_save_strips_transient_fields() {
    let mut body = module_config(KEY, "Stable");
    body["resourceType"] = json!("deckhouse");
    body["isStale"] = json!(true);
    let transport = FakeTransport::new(body);
    let store = store_over(&transport);

    let current = store.get_or_fetch(KEY).await.unwrap();
    let view = current.to_json().unwrap();
    assert_eq!(view["resourceType"], "deckhouse");
    assert_eq!(view["isStale"], false);

    let mut edited = (*current).clone();
    edited.settings_mut().release_channel = "Alpha".into();
    transport.push_reply(Ok(None));
    let saved = edited.save().await.unwrap();

    let put = transport
        .requests()
        .into_iter()
        .find(|r| r.method == HttpMethod::Put)
        .unwrap();
    assert_eq!(put.path, "k8s/deckhouse.io/moduleconfigs/deckhouse");
    assert!(!put.with_credentials);
    let sent = put.body.unwrap();
    assert!(sent.get("resourceType").is_none());
    assert!(sent.get("isStale").is_none());
    assert_eq!(sent["spec"]["settings"]["releaseChannel"], "Alpha");
    assert_eq!(sent["metadata"]["resourceVersion"], "100");

    assert_eq!(saved.settings().release_channel, "Alpha");
    assert_eq!(store.state(KEY), CacheState::Ready);
    assert!(Arc::ptr_eq(&saved, &store.peek(KEY).unwrap()));
}

#[tokio::test]
async fn test_save_hydrates_stored_update_response() {
    let transport = FakeTransport::new(module_config(KEY, "Stable"));
    let descriptor = ResourceDescriptor::builder("deckhouse", "k8s/deckhouse.io/moduleconfigs/deckhouse")
        .verb(verbs::GET, VerbSpec::new(HttpMethod::Get).store_response(true))
        .verb(verbs::UPDATE, VerbSpec::new(HttpMethod::Put).store_response(true))
        .build()
        .unwrap();
    let store = store_with(&transport, descriptor);

    let current = store.get_or_fetch(KEY).await.unwrap();
    transport.push_reply(Ok(Some(module_config(KEY, "RockSolid"))));
    current.save().await.unwrap();

    assert_eq!(
        store.peek(KEY).unwrap().settings().release_channel,
        "RockSolid"
    );
}

#[tokio::test]
async fn test_failed_save_leaves_cache_untouched() {
    let transport = FakeTransport::new(module_config(KEY, "Stable"));
    let store = store_over(&transport);

    let current = store.get_or_fetch(KEY).await.unwrap();
    let mut edited = (*current).clone();
    edited.settings_mut().release_channel = "Alpha".into();

    transport.push_reply(Err(modcfg_api::Error::Unauthorized { status: 403 }));
    let err = edited.save().await.unwrap_err();
    assert!(matches!(
        err.transport(),
        Some(modcfg_api::Error::Unauthorized { status: 403 })
    ));

    let cached = store.peek(KEY).unwrap();
    assert!(Arc::ptr_eq(&cached, &current));
    assert_eq!(cached.settings().release_channel, "Stable");
    assert_eq!(transport.count(HttpMethod::Put), 1);
}

#[tokio::test]
async fn test_save_after_store_dropped_is_detached() {
    let transport = FakeTransport::new(module_config(KEY, "Stable"));
    let store = store_over(&transport);
    let current = store.get_or_fetch(KEY).await.unwrap();
    let orphan = (*current).clone();
    drop(current);
    drop(store);

    assert!(matches!(orphan.save().await, Err(CoreError::Detached)));
}
