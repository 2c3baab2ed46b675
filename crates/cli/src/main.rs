//! procloom CLI: run configured programs from the terminal.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "procloom",
    about = "Run model/tool processes with paged content, forks and linked programs",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file to use
    #[arg(short, long, global = true, env = "PROCLOOM_CONFIG", default_value = "procloom.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program, once with --message or interactively
    Run {
        /// Program to run (defaults to `default_program`)
        #[arg(short, long)]
        program: Option<String>,

        /// Send a single message and exit
        #[arg(short, long)]
        message: Option<String>,
    },

    /// List configured programs and the tools they expose
    Programs,

    /// Validate the configuration and report what is missing
    Check {
        /// Also call each backend's health check
        #[arg(long)]
        ping: bool,
    },

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    match cli.command {
        Commands::Run { program, message } => {
            commands::run::run(&cli.config, program, message, cli.verbose).await?;
        }
        Commands::Programs => {
            commands::programs::run(&cli.config)?;
        }
        Commands::Check { ping } => {
            commands::check::run(&cli.config, ping).await?;
        }
        Commands::Init { force } => {
            commands::init::run(&cli.config, force)?;
        }
    }

    Ok(())
}
