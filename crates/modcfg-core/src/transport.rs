// ── Transport seam ──
//
// The cache store only needs "send this request, give me the JSON body".
// `ApiClient` implements it for real traffic; tests plug in fakes.

use async_trait::async_trait;
use serde_json::Value;

use modcfg_api::{ApiClient, ApiRequest};

/// Something that can execute a resolved request.
///
/// `Ok(None)` means the server answered with an empty body.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<Option<Value>, modcfg_api::Error>;
}

#[async_trait]
impl Transport for ApiClient {
    async fn send(&self, request: ApiRequest) -> Result<Option<Value>, modcfg_api::Error> {
        self.execute(&request).await
    }
}
