mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use geist::config::GeistConfig;

#[derive(Parser)]
#[command(name = "geist", version, about = "Session-scoped semantic cache for note vaults")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
    /// Check database integrity and print row counts
    Doctor,
    /// List analysis sessions, newest first
    Sessions {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show recently accepted suggestions
    History {
        /// How many days back to look
        #[arg(long, default_value_t = 30)]
        days: i64,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the embedding model to ~/.geist/models/
    Download,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = GeistConfig::load()?;

    // Logs go to stderr so piped JSON output stays clean.
    let filter = EnvFilter::try_new(&config.log.level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Model { action } => match action {
            ModelAction::Download => cli::model_download(&config.embedding).await?,
        },
        Command::Doctor => cli::doctor::doctor(&config)?,
        Command::Sessions { json } => cli::sessions::sessions(&config, json)?,
        Command::History { days, json } => cli::history::history(&config, days, json)?,
    }

    Ok(())
}
