//! CLI configuration: re-exports from `modcfg-config` plus flag overrides.
//!
//! Core never sees `GlobalOpts` -- it receives a pre-built `ClientConfig`.

use std::time::Duration;

use secrecy::SecretString;

pub use modcfg_config::{Config, config_path, load_config_or_default};
use modcfg_config::Profile;
use modcfg_core::{ClientConfig, TlsVerification};

use crate::cli::GlobalOpts;
use crate::error::CliError;

// ── Profile resolution ───────────────────────────────────────────────

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Translate a `Profile` + global flags into a `ClientConfig`.
///
/// Flags win over the profile; `--token` skips the env/keyring chain.
pub fn resolve_profile(
    profile: &Profile,
    profile_name: &str,
    global: &GlobalOpts,
) -> Result<ClientConfig, CliError> {
    let mut profile = profile.clone();
    if let Some(ref server) = global.server {
        profile.server.clone_from(server);
    }

    let mut config = match global.token {
        Some(ref token) => {
            let mut config = modcfg_config::profile_endpoints(&profile)?;
            config.token = Some(SecretString::from(token.clone()));
            config
        }
        None => modcfg_config::profile_to_client_config(&profile, profile_name)?,
    };

    apply_overrides(&mut config, global);
    Ok(config)
}

/// Build a config from flags alone when no profile exists.
pub fn resolve_flags_only(global: &GlobalOpts, default_timeout: u64) -> Result<ClientConfig, CliError> {
    let server = global.server.as_deref().ok_or_else(|| CliError::NoConfig {
        path: config_path().display().to_string(),
    })?;

    let profile = Profile {
        server: server.to_owned(),
        api_path: "api".into(),
        timeout: Some(default_timeout),
        ..Profile::default()
    };

    let mut config = modcfg_config::profile_endpoints(&profile)?;
    config.token = global.token.clone().map(SecretString::from);
    apply_overrides(&mut config, global);
    Ok(config)
}

fn apply_overrides(config: &mut ClientConfig, global: &GlobalOpts) {
    if global.insecure {
        config.tls = TlsVerification::DangerAcceptInvalid;
    }
    if let Some(secs) = global.timeout {
        config.timeout = Duration::from_secs(secs);
    }
}
