//! heatsrv binary

use anyhow::{Context as _, Result};
use clap::Parser;
use tracing::error;

use heatsrv::cli::{execute, Args, Context};
use heatsrv::logging;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let command = args.command();

    let context = Context::load(&args).context("Failed to load configuration")?;
    logging::init(
        &context.config.logging.level,
        context.config.logging.dir.as_deref(),
    )
    .context("Failed to initialize logging")?;

    if let Err(e) = execute(command, context).await {
        error!("{}", e);
        return Err(e.into());
    }
    Ok(())
}
