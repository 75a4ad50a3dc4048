//! CLI definitions and command dispatch.

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Remote profiling gateway
#[derive(Parser)]
#[command(name = "flamegate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the gateway server (default)
    Serve,
    /// Print the effective configuration and exit
    Config,
}

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let config = crate::server::load_config()?;
            crate::server::run(config).await
        }
        Commands::Config => {
            let config = crate::server::load_config()?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
