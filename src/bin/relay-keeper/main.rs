//! relay-keeper CLI entry point.

mod cli;

use clap::Parser;
use cli::Cli;
use relay_keeper::RelayBuilder;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("relay-keeper v{}", env!("CARGO_PKG_VERSION"));

    // Resolve configuration once; nothing reads the environment after this
    let config = cli.into_config()?;

    let mut relay = RelayBuilder::new(config).build().await?;

    relay.run().await?;

    info!("relay-keeper stopped");
    Ok(())
}
