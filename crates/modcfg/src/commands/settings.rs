//! `settings` command handlers.

use modcfg_core::{DeckhouseSettings, Release, ResourceClient};

use crate::cli::{GlobalOpts, SettingsArgs, SettingsCommand, SettingsSetArgs};
use crate::error::CliError;
use crate::output::{self, DetailRow};

pub async fn handle(
    client: &ResourceClient,
    args: SettingsArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        SettingsCommand::Show(target) => {
            let store = super::module_store(client, &target.name)?;
            let resource = store.get_or_fetch(&target.name).await?;
            render(resource.settings(), global)
        }

        SettingsCommand::Set(set) => {
            if !has_changes(&set) {
                return Err(CliError::Validation {
                    field: "settings".into(),
                    reason: "nothing to change; pass at least one setting flag".into(),
                });
            }

            let store = super::module_store(client, &set.target.name)?;
            let current = store.get_or_fetch(&set.target.name).await?;

            let mut draft = (*current).clone();
            apply(draft.settings_mut(), set);
            let saved = draft.save().await?;

            if !global.quiet {
                eprintln!("Settings saved");
            }
            render(saved.settings(), global)
        }
    }
}

fn has_changes(set: &SettingsSetArgs) -> bool {
    set.release_channel.is_some()
        || set.log_level.is_some()
        || set.bundle.is_some()
        || set.release_mode.is_some()
        || set.disruption_approval_mode.is_some()
}

fn apply(settings: &mut DeckhouseSettings, set: SettingsSetArgs) {
    if let Some(channel) = set.release_channel {
        settings.release_channel = channel;
    }
    if let Some(level) = set.log_level {
        settings.log_level = Some(level);
    }
    if let Some(bundle) = set.bundle {
        settings.bundle = Some(bundle);
    }
    if set.release_mode.is_some() || set.disruption_approval_mode.is_some() {
        let release = settings.release.get_or_insert_with(Release::default);
        if let Some(mode) = set.release_mode {
            release.mode = Some(mode);
        }
        if let Some(mode) = set.disruption_approval_mode {
            release.disruption_approval_mode = Some(mode);
        }
    }
}

fn render(settings: &DeckhouseSettings, global: &GlobalOpts) -> Result<(), CliError> {
    let rendered = output::render_single(
        &global.output,
        settings,
        settings_rows,
        |s| s.release_channel.clone(),
    )?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}

fn settings_rows(settings: &DeckhouseSettings) -> Vec<DetailRow> {
    let release = settings.release.as_ref();
    let mut rows = vec![
        DetailRow::new("Release Channel", settings.release_channel.clone()),
        DetailRow::new("Bundle", settings.bundle.clone().unwrap_or_else(|| "-".into())),
        DetailRow::new(
            "Log Level",
            settings.log_level.clone().unwrap_or_else(|| "-".into()),
        ),
        DetailRow::new(
            "Update Mode",
            release
                .and_then(|r| r.mode.clone())
                .unwrap_or_else(|| "-".into()),
        ),
        DetailRow::new(
            "Disruption Approval",
            release
                .and_then(|r| r.disruption_approval_mode.clone())
                .unwrap_or_else(|| "-".into()),
        ),
    ];

    for window in release
        .and_then(|r| r.windows.as_deref())
        .unwrap_or_default()
    {
        let days = window
            .days
            .iter()
            .flatten()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let days = if days.is_empty() { "daily" } else { days.as_str() };
        rows.push(DetailRow::new(
            "Update Window",
            format!("{days} {}-{}", window.from, window.to),
        ));
    }
    rows
}
