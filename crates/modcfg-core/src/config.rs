// ── Runtime connection configuration ──
//
// These types describe *how* to reach the cluster UI backend. They carry
// credential data and connection tuning, but never touch disk.
// The CLI constructs a `ClientConfig` and hands it in.

use secrecy::SecretString;
use url::Url;

use crate::error::CoreError;

/// Path of the cable endpoint when none is configured explicitly.
pub const DEFAULT_CABLE_PATH: &str = "/cable";

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(std::path::PathBuf),
    /// Skip verification (self-signed ingress certificates).
    DangerAcceptInvalid,
}

impl From<&TlsVerification> for modcfg_api::TlsMode {
    fn from(tls: &TlsVerification) -> Self {
        match tls {
            TlsVerification::SystemDefaults => Self::System,
            TlsVerification::CustomCa(path) => Self::CustomCa(path.clone()),
            TlsVerification::DangerAcceptInvalid => Self::DangerAcceptInvalid,
        }
    }
}

/// Configuration for talking to one cluster UI backend.
///
/// Built by the CLI, passed to `ResourceClient` -- core never reads config files.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST API root (e.g., `https://dash.example.com/api/`).
    pub api_url: Url,
    /// Cable websocket endpoint. Derived from `api_url` when unset.
    pub cable_url: Option<Url>,
    /// Bearer token, forwarded only on verbs registered `with_credentials`.
    pub token: Option<SecretString>,
    /// TLS verification strategy.
    pub tls: TlsVerification,
    /// Request timeout.
    pub timeout: std::time::Duration,
}

impl ClientConfig {
    pub fn new(api_url: Url) -> Self {
        Self {
            api_url,
            cable_url: None,
            token: None,
            tls: TlsVerification::default(),
            timeout: std::time::Duration::from_secs(30),
        }
    }

    /// Transport settings for the REST client.
    pub fn transport(&self) -> modcfg_api::TransportConfig {
        modcfg_api::TransportConfig {
            tls: (&self.tls).into(),
            timeout: self.timeout,
        }
    }

    /// The cable endpoint: explicit, or `ws(s)://<api host>/cable`.
    pub fn resolved_cable_url(&self) -> Result<Url, CoreError> {
        if let Some(ref url) = self.cable_url {
            return Ok(url.clone());
        }

        let scheme = match self.api_url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => {
                return Err(CoreError::configuration(format!(
                    "cannot derive cable URL from '{other}' scheme"
                )));
            }
        };

        let mut url = self.api_url.clone();
        url.set_path(DEFAULT_CABLE_PATH);
        url.set_query(None);
        url.set_scheme(scheme)
            .map_err(|()| CoreError::configuration("cannot switch API URL to websocket scheme"))?;
        Ok(url)
    }
}
