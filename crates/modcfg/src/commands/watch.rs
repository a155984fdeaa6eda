//! `watch` command: follow server-pushed invalidations of one module config.

use chrono::Local;
use tracing::debug;

use modcfg_core::{CacheState, ClientConfig, EntryChange, ResourceClient};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::error::CliError;
use crate::output;

pub async fn handle(
    client: &ResourceClient,
    config: &ClientConfig,
    args: WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let name = args.target.name;
    let store = super::module_store(client, &name)?;
    let mut changes = store.subscribe();

    let cable_url = config.resolved_cable_url()?;
    client
        .connect_channel(cable_url.clone(), config.token.clone())
        .await?;
    let closed = client.channel_closed();
    tokio::pin!(closed);

    let resource = store.get_or_fetch(&name).await?;
    print_snapshot(&resource, global)?;

    let mut refreshes = 0usize;
    while args.count.is_none_or(|limit| refreshes < limit) {
        let change = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            ended = &mut closed => {
                ended?;
                return Err(CliError::ConnectionFailed {
                    url: cable_url.to_string(),
                    reason: "cable connection closed by the server".into(),
                });
            }
            change = changes.changed() => change,
        };
        let Some(change) = change else { break };
        debug!(key = %change.key, state = %change.state, seq = change.seq, "cache transition");

        if !needs_refresh(&change, &name, store.state(&name)) {
            continue;
        }

        let resource = store.get_or_fetch(&name).await?;
        refreshes += 1;
        if !global.quiet {
            let at = store
                .last_invalidation()
                .map_or_else(Local::now, |at| at.with_timezone(&Local));
            eprintln!("[{}] {name} changed on the server", at.format("%H:%M:%S"));
        }
        print_snapshot(&resource, global)?;
    }
    Ok(())
}

/// A change for `name` triggers a refetch whenever the entry currently sits
/// Stale, even if the notification itself reported a later state.
fn needs_refresh(change: &EntryChange, name: &str, current: CacheState) -> bool {
    change.key == name && current == CacheState::Stale
}

fn print_snapshot(
    resource: &modcfg_core::Resource<modcfg_core::ModuleConfig>,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let rendered = output::render_single(
        &global.output,
        &resource.to_json()?,
        |_| super::detail_rows(resource),
        |_| resource.settings().release_channel.clone(),
    )?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}
