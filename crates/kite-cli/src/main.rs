//! Kite CLI - Run and inspect plugin modules locally

mod cli;
mod commands;
mod dry_run;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_command(cli))
}

async fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run {
            module,
            config,
            events,
            scope,
            user_config,
        } => {
            commands::run::run(
                &module,
                config.as_deref(),
                &events,
                &scope,
                user_config.as_deref(),
            )
            .await?;
        }

        Commands::Describe { module } => {
            commands::describe::run(&module).await?;
        }
    }

    Ok(())
}
