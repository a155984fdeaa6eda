// Shared fixtures for core integration tests.
#![allow(dead_code, clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Semaphore;

use modcfg_api::{ApiRequest, HttpMethod};
use modcfg_core::Transport;

pub type Reply = Result<Option<Value>, modcfg_api::Error>;

/// A deckhouse ModuleConfig as the UI backend returns it.
pub fn module_config(uid: &str, release_channel: &str) -> Value {
    json!({
        "apiVersion": "deckhouse.io/v1alpha1",
        "kind": "ModuleConfig",
        "metadata": { "name": "deckhouse", "uid": uid, "resourceVersion": "100" },
        "spec": {
            "version": 1,
            "settings": { "releaseChannel": release_channel, "logLevel": "Info" }
        },
        "status": { "message": "" }
    })
}

/// In-memory transport that records requests and replays canned replies.
///
/// Replies are consumed in order; once the queue is empty every request
/// answers with `fallback`. A gated transport parks each request until
/// [`release`](Self::release) hands out a permit.
pub struct FakeTransport {
    requests: Mutex<Vec<ApiRequest>>,
    replies: Mutex<VecDeque<Reply>>,
    fallback: Value,
    gate: Option<Arc<Semaphore>>,
}

impl FakeTransport {
    pub fn new(fallback: Value) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            replies: Mutex::new(VecDeque::new()),
            fallback,
            gate: None,
        })
    }

    pub fn gated(fallback: Value) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            replies: Mutex::new(VecDeque::new()),
            fallback,
            gate: Some(Arc::new(Semaphore::new(0))),
        })
    }

    pub fn push_reply(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    /// Let `n` parked requests proceed.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, method: HttpMethod) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method)
            .count()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: ApiRequest) -> Result<Option<Value>, modcfg_api::Error> {
        self.requests.lock().unwrap().push(request);

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        let queued = self.replies.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| Ok(Some(self.fallback.clone())))
    }
}

/// Yield until `condition` holds, bounded so a broken test fails instead of hanging.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}
