//! n2n CLI
//!
//! Runs, checks and resumes batch pipelines described by a YAML file.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

/// n2n - resumable batch data pipelines
#[derive(Parser)]
#[command(name = "n2n")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scaffold a pipeline with sample data
    Init {
        /// Directory to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: String,

        /// Pipeline name (defaults to directory name)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Run a pipeline
    Run {
        /// Pipeline configuration file
        #[arg(default_value = "pipeline.yaml")]
        config: String,

        /// Resume the execution with this id, or start it under this id
        #[arg(long)]
        execution_id: Option<String>,

        /// Check everything and estimate the input size, process nothing
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate a pipeline configuration and its components
    Validate {
        /// Pipeline configuration file
        #[arg(default_value = "pipeline.yaml")]
        config: String,
    },

    /// Inspect and remove checkpoints
    Checkpoints {
        #[command(subcommand)]
        command: CheckpointCommands,
    },
}

#[derive(Subcommand)]
enum CheckpointCommands {
    /// List checkpoints, most recent first
    List {
        /// Checkpoint directory
        #[arg(long, default_value = "checkpoints")]
        dir: String,
    },

    /// Print one checkpoint
    Show {
        /// Execution id
        id: String,

        /// Checkpoint directory
        #[arg(long, default_value = "checkpoints")]
        dir: String,
    },

    /// Delete one checkpoint
    Delete {
        /// Execution id
        id: String,

        /// Checkpoint directory
        #[arg(long, default_value = "checkpoints")]
        dir: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Init { path, name } => {
            commands::init::run(&path, name.as_deref()).await?;
        }
        Commands::Run {
            config,
            execution_id,
            dry_run,
        } => {
            commands::run::run(&config, execution_id.as_deref(), dry_run).await?;
        }
        Commands::Validate { config } => {
            commands::validate::run(&config).await?;
        }
        Commands::Checkpoints { command } => match command {
            CheckpointCommands::List { dir } => {
                commands::checkpoints::list(&dir).await?;
            }
            CheckpointCommands::Show { id, dir } => {
                commands::checkpoints::show(&dir, &id).await?;
            }
            CheckpointCommands::Delete { id, dir } => {
                commands::checkpoints::delete(&dir, &id).await?;
            }
        },
    }

    Ok(())
}
