//! Cellplane CLI entry point

use anyhow::{Context, Result};
use clap::Parser;

use cellplane::cli::{bootstrap, commands, Cli, Commands};
use cellplane::infrastructure::{logging, ConfigLoader};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load().context("Failed to load configuration")?,
    };
    let _log_guard = logging::init(&config.logging);

    let actor = std::env::var("USER").unwrap_or_else(|_| "cli".to_string());
    let app = bootstrap(config).await?;

    match cli.command {
        Commands::Serve => commands::handle_serve(app.ctx.clone()).await,
        Commands::Apply { file } => {
            commands::handle_apply(&app, &file, &cli.namespace, &actor).await
        }
        Commands::Get { kind, name } => {
            commands::handle_get(&app, &kind, name.as_deref(), &cli.namespace, cli.json).await
        }
        Commands::Delete { kind, name } => {
            commands::handle_delete(&app, &kind, &name, &cli.namespace, &actor).await
        }
        Commands::Events { kind, name } => {
            commands::handle_events(&app, &kind, &name, &cli.namespace, cli.json).await
        }
        Commands::Budget(command) => commands::handle_budget(&app, command, cli.json).await,
        Commands::Spawns(command) => {
            commands::handle_spawns(&app, command, &cli.namespace, &actor, cli.json).await
        }
    }
}
