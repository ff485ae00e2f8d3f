//! RevivIA CLI - Image Restoration
//!
//! Command-line interface for the RevivIA super-resolution dispatcher.

use anyhow::Context;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use revivia::cli::{commands, Cli, Commands};
use revivia::RevivError;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over -v
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    debug!("RevivIA v{}", env!("CARGO_PKG_VERSION"));

    let Some(command) = cli.command else {
        println!("RevivIA v{}", env!("CARGO_PKG_VERSION"));
        println!("Use --help for available commands");
        return Ok(());
    };

    let config = commands::load_config(cli.config.as_deref()).context("failed to load configuration")?;
    let result = match &command {
        Commands::Upscale(args) => commands::upscale(&config, args),
        Commands::Models { json } => commands::list_models(*json),
        Commands::Fetch { models, face } => commands::fetch(&config, models, *face),
        Commands::Cache => commands::show_cache(&config),
    };

    if let Err(err) = &result {
        report(err);
    }
    result.map_err(anyhow::Error::from)
}

fn report(err: &RevivError) {
    eprintln!("{}", err.friendly_message());
    for suggestion in err.recovery_suggestions() {
        eprintln!("  - {}", suggestion);
    }
}
