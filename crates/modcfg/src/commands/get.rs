//! `get` command handler.

use modcfg_core::ResourceClient;

use crate::cli::{GetArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

pub async fn handle(
    client: &ResourceClient,
    args: GetArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let store = super::module_store(client, &args.target.name)?;
    let resource = store.get_or_fetch(&args.target.name).await?;

    let rendered = output::render_single(
        &global.output,
        &resource.to_json()?,
        |_| super::detail_rows(&resource),
        |_| resource.primary_key().to_owned(),
    )?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}
