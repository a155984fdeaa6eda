//! Configuration for the modcfg CLI.
//!
//! TOML profiles, token resolution (env + keyring + plaintext), and
//! translation to `modcfg_core::ClientConfig`. The CLI layers its
//! `GlobalOpts` overrides on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use modcfg_core::{ClientConfig, TlsVerification};

/// Keyring service name; entries are keyed `<profile>/token`.
pub const KEYRING_SERVICE: &str = "modcfg";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{profile}' not found")]
    UnknownProfile { profile: String },

    #[error("no token configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named cluster profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Pick `name`, or the default profile when `name` is `None`.
    pub fn profile<'a>(&'a self, name: Option<&'a str>) -> Result<(&'a str, &'a Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get(name)
            .map(|p| (name, p))
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: name.into(),
            })
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default)]
    pub insecure: bool,

    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            insecure: false,
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_timeout() -> u64 {
    30
}

/// A named cluster profile.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// UI backend base URL (e.g., "https://dash.example.com").
    pub server: String,

    /// REST API path under `server`.
    #[serde(default = "default_api_path")]
    pub api_path: String,

    /// Cable endpoint path under `server`; defaults to `/cable`.
    pub cable_path: Option<String>,

    /// Bearer token (plaintext -- prefer keyring or env var).
    pub token: Option<String>,

    /// Environment variable name containing the bearer token.
    pub token_env: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override timeout (seconds).
    pub timeout: Option<u64>,
}

fn default_api_path() -> String {
    "api".into()
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "deckhouse", "modcfg").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("modcfg");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + `MODCFG_` env vars (`__` separates nesting).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("MODCFG_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution (without CLI flags) ───────────────────────

/// Resolve the bearer token: `token_env` → keyring → plaintext.
///
/// A missing token is fine unless the profile names a `token_env` and
/// nothing in the chain produced one.
pub fn resolve_token(profile: &Profile, profile_name: &str) -> Result<Option<SecretString>, ConfigError> {
    // 1. Profile's token_env → env var lookup
    if let Some(ref env_name) = profile.token_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(Some(SecretString::from(val)));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/token")) {
        if let Ok(secret) = entry.get_password() {
            return Ok(Some(SecretString::from(secret)));
        }
    }

    // 3. Plaintext in config
    if let Some(ref token) = profile.token {
        return Ok(Some(SecretString::from(token.clone())));
    }

    if profile.token_env.is_some() {
        return Err(ConfigError::NoCredentials {
            profile: profile_name.into(),
        });
    }
    Ok(None)
}

// ── URL helpers ─────────────────────────────────────────────────────

fn parse_server(profile: &Profile) -> Result<Url, ConfigError> {
    let url: Url = profile.server.parse().map_err(|_| ConfigError::Validation {
        field: "server".into(),
        reason: format!("invalid URL: {}", profile.server),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::Validation {
            field: "server".into(),
            reason: format!("expected http or https, got '{other}'"),
        }),
    }
}

/// `server` + `api_path`, always ending in `/`.
pub fn api_url(profile: &Profile) -> Result<Url, ConfigError> {
    let mut url = parse_server(profile)?;
    let path = format!(
        "{}/{}/",
        url.path().trim_end_matches('/'),
        profile.api_path.trim_matches('/')
    );
    url.set_path(&path.replace("//", "/"));
    Ok(url)
}

/// Explicit cable endpoint, when the profile overrides the path.
pub fn cable_url(profile: &Profile) -> Result<Option<Url>, ConfigError> {
    let Some(ref cable_path) = profile.cable_path else {
        return Ok(None);
    };

    let mut url = parse_server(profile)?;
    let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme).map_err(|()| ConfigError::Validation {
        field: "cable_path".into(),
        reason: "cannot switch server URL to a websocket scheme".into(),
    })?;
    url.set_path(&format!("/{}", cable_path.trim_start_matches('/')));
    Ok(Some(url))
}

/// Build a `ClientConfig` from a profile -- no CLI flag overrides.
pub fn profile_to_client_config(
    profile: &Profile,
    profile_name: &str,
) -> Result<ClientConfig, ConfigError> {
    let mut config = profile_endpoints(profile)?;
    config.token = resolve_token(profile, profile_name)?;
    Ok(config)
}

/// URLs, TLS and timeout of a profile, leaving the token unset.
pub fn profile_endpoints(profile: &Profile) -> Result<ClientConfig, ConfigError> {
    let mut config = ClientConfig::new(api_url(profile)?);
    config.cable_url = cable_url(profile)?;

    config.tls = if profile.insecure.unwrap_or(false) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };

    config.timeout = Duration::from_secs(profile.timeout.unwrap_or_else(default_timeout));
    Ok(config)
}
