// Async REST client for resource endpoints.
//
// Base path: the cluster UI API root (e.g. `https://dash.example.com/api/`).
// Auth: optional bearer token, attached only to requests that ask for it.

use reqwest::header::{AUTHORIZATION, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

// ── HTTP method ──────────────────────────────────────────────────────

/// HTTP verb a registered resource action maps onto.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => Self::GET,
            HttpMethod::Post => Self::POST,
            HttpMethod::Put => Self::PUT,
            HttpMethod::Patch => Self::PATCH,
            HttpMethod::Delete => Self::DELETE,
        }
    }
}

// ── Request ──────────────────────────────────────────────────────────

/// A single resolved request: verb, relative path, credential flag, body.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    /// Path relative to the API base URL, e.g. `k8s/deckhouse.io/moduleconfigs/deckhouse`.
    pub path: String,
    /// Forward the configured bearer token with this request.
    pub with_credentials: bool,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            with_credentials: false,
            body: None,
        }
    }

    pub fn with_credentials(mut self, with_credentials: bool) -> Self {
        self.with_credentials = with_credentials;
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

// ── Error response shape (Kubernetes `Status`) ───────────────────────

#[derive(Deserialize)]
struct StatusResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

// ── Client ───────────────────────────────────────────────────────────

/// Async REST client for resource routes.
///
/// Holds one `reqwest::Client` and the API base URL. Every call returns
/// the raw JSON body so typed hydration stays in `modcfg-core`.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<SecretString>,
}

impl ApiClient {
    // ── Constructors ─────────────────────────────────────────────────

    /// Build from a base URL, optional bearer token, and transport config.
    pub fn new(
        base_url: &str,
        token: Option<SecretString>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Self::from_reqwest(base_url, http, token)
    }

    /// Wrap an existing `reqwest::Client`.
    pub fn from_reqwest(
        base_url: &str,
        http: reqwest::Client,
        token: Option<SecretString>,
    ) -> Result<Self, Error> {
        let base_url = Self::normalize_base_url(base_url)?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    /// Ensure the base URL ends with `/` so relative joins keep its path.
    fn normalize_base_url(raw: &str) -> Result<Url, Error> {
        let mut url = Url::parse(raw)?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    /// The API base URL (always ends with `/`).
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builder ──────────────────────────────────────────────────

    fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    // ── Execution ────────────────────────────────────────────────────

    /// Send a request and return the decoded JSON body.
    ///
    /// Returns `Ok(None)` for success responses with an empty body.
    pub async fn execute(&self, request: &ApiRequest) -> Result<Option<serde_json::Value>, Error> {
        let url = self.url(&request.path)?;
        debug!(method = %request.method, %url, "sending request");

        let mut builder = self.http.request(request.method.into(), url);

        if request.with_credentials {
            if let Some(ref token) = self.token {
                let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                    .map_err(|e| Error::InvalidHeader(e.to_string()))?;
                value.set_sensitive(true);
                builder = builder.header(AUTHORIZATION, value);
            }
        }

        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let resp = builder.send().await?;
        Self::handle_response(resp).await
    }

    async fn handle_response(resp: reqwest::Response) -> Result<Option<serde_json::Value>, Error> {
        let status = resp.status();
        if !status.is_success() {
            return Err(Self::parse_error(status, resp).await);
        }

        let body = resp.text().await?;
        if body.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&body).map(Some).map_err(|e| {
            let preview: String = body.chars().take(200).collect();
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body,
            }
        })
    }

    async fn parse_error(status: reqwest::StatusCode, resp: reqwest::Response) -> Error {
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Error::Unauthorized {
                status: status.as_u16(),
            };
        }

        let raw = resp.text().await.unwrap_or_default();

        match serde_json::from_str::<StatusResponse>(&raw) {
            Ok(parsed) => Error::Http {
                status: status.as_u16(),
                message: parsed.message.unwrap_or_else(|| status.to_string()),
                reason: parsed.reason,
            },
            Err(_) => Error::Http {
                status: status.as_u16(),
                message: if raw.is_empty() { status.to_string() } else { raw },
                reason: None,
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gains_trailing_slash() {
        let client =
            ApiClient::from_reqwest("https://dash.example.com/api", reqwest::Client::new(), None)
                .unwrap();
        assert_eq!(client.base_url().as_str(), "https://dash.example.com/api/");
    }

    #[test]
    fn relative_paths_join_under_base() {
        let client =
            ApiClient::from_reqwest("https://dash.example.com/api/", reqwest::Client::new(), None)
                .unwrap();
        let url = client.url("/k8s/deckhouse.io/moduleconfigs/deckhouse").unwrap();
        assert_eq!(
            url.as_str(),
            "https://dash.example.com/api/k8s/deckhouse.io/moduleconfigs/deckhouse"
        );
    }

    #[test]
    fn method_parses_case_insensitively() {
        assert_eq!("put".parse::<HttpMethod>().unwrap(), HttpMethod::Put);
        assert_eq!(HttpMethod::Get.to_string(), "GET");
    }
}
