//! Command dispatch: bridges CLI args -> cache store reads/writes -> output formatting.

pub mod config_cmd;
pub mod get;
pub mod settings;
pub mod watch;

use modcfg_core::{
    CacheStore, ClientConfig, ModuleConfig, Resource, ResourceClient, bootstrap_module_configs,
};

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;
use crate::output::DetailRow;

/// Dispatch a backend-bound command to the appropriate handler.
///
/// `Config` and `Completions` never reach here; they are handled before a
/// client is built.
pub async fn dispatch(
    cmd: Command,
    config: &ClientConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let client = ResourceClient::new(config)?;
    let result = match cmd {
        Command::Get(args) => get::handle(&client, args, global).await,
        Command::Settings(args) => settings::handle(&client, args, global).await,
        Command::Watch(args) => watch::handle(&client, config, args, global).await,
        Command::Config(_) | Command::Completions(_) => Ok(()),
    };
    client.shutdown().await;
    result
}

/// Register the module config type for `name` and return its cache.
pub(crate) fn module_store(
    client: &ResourceClient,
    name: &str,
) -> Result<CacheStore<ModuleConfig>, CliError> {
    Ok(bootstrap_module_configs(client, name, None)?)
}

/// Field/value rows shared by `get` and `watch`.
pub(crate) fn detail_rows(resource: &Resource<ModuleConfig>) -> Vec<DetailRow> {
    let config = resource.payload();
    let settings = config.settings();
    let release = settings.release.as_ref();

    vec![
        DetailRow::new(
            "Name",
            config.metadata.name.clone().unwrap_or_else(|| "-".into()),
        ),
        DetailRow::new("UID", config.metadata.uid.clone()),
        DetailRow::new("Release Channel", settings.release_channel.clone()),
        DetailRow::new("Bundle", or_dash(settings.bundle.as_deref())),
        DetailRow::new("Log Level", or_dash(settings.log_level.as_deref())),
        DetailRow::new(
            "Update Mode",
            or_dash(release.and_then(|r| r.mode.as_deref())),
        ),
        DetailRow::new(
            "Disruption Approval",
            or_dash(release.and_then(|r| r.disruption_approval_mode.as_deref())),
        ),
        DetailRow::new(
            "Update Windows",
            release.map_or_else(
                || "-".into(),
                |r| r.windows.as_ref().map_or(0, Vec::len).to_string(),
            ),
        ),
        DetailRow::new("Stale", resource.is_stale().to_string()),
    ]
}

fn or_dash(value: Option<&str>) -> String {
    value.unwrap_or("-").to_owned()
}
