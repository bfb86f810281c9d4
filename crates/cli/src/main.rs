mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use gamekeep_core::{
    config::{self, AppConfig},
    CheckpointService,
};
use tracing_subscriber::{prelude::*, EnvFilter};

/// GameKeep: checkpoints for game save directories.
#[derive(Parser, Debug)]
#[command(name = "gamekeep", version, about)]
struct Args {
    /// Keep metadata and vault under this directory instead of the configured ones
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a new game
    AddGame {
        /// Game name
        #[arg(long)]
        name: String,
        /// Save directory path
        #[arg(long)]
        path: String,
    },

    /// List all registered games
    ListGames,

    /// Create a checkpoint for a game
    Checkpoint {
        /// Game id or name
        #[arg(long)]
        game: String,
        /// Checkpoint name
        #[arg(long)]
        name: String,
        /// Optional note
        #[arg(long, default_value = "")]
        note: String,
    },

    /// List checkpoints for a game
    List {
        /// Game id or name
        #[arg(long)]
        game: String,
    },

    /// Restore a checkpoint over the game's save directory
    Restore {
        /// Checkpoint id or id prefix
        #[arg(long)]
        checkpoint: String,
    },

    /// Delete a checkpoint and its archive
    Delete {
        /// Checkpoint id or id prefix
        #[arg(long)]
        checkpoint: String,
    },
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let config = match &args.root {
        Some(root) => AppConfig::with_root(root),
        None => {
            config::ensure_default_config()?;
            AppConfig::load()?
        }
    };
    let service = CheckpointService::open(&config);

    match args.command {
        Command::AddGame { name, path } => commands::add_game(&service, &name, &path),
        Command::ListGames => commands::list_games(&service),
        Command::Checkpoint { game, name, note } => {
            commands::create_checkpoint(&service, &game, &name, &note)
        }
        Command::List { game } => commands::list_checkpoints(&service, &game),
        Command::Restore { checkpoint } => commands::restore_checkpoint(&service, &checkpoint),
        Command::Delete { checkpoint } => commands::delete_checkpoint(&service, &checkpoint),
    }
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .init();
}
