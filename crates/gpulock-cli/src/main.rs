//! gpulock CLI
//!
//! Picks an idle GPU on this host and locks it across the configured stores.

mod commands;

use clap::{Parser, Subcommand};
use gpulock_core::{GpulockConfig, GpulockError};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// gpulock - distributed locking of GPUs
#[derive(Parser, Debug)]
#[command(name = "gpulock")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Lock store URL, repeatable (overrides the configuration)
    #[arg(long = "store", global = true)]
    stores: Vec<String>,

    /// Lock timeout in milliseconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Try idle GPUs in probe order instead of shuffling them
    #[arg(long, global = true)]
    no_shuffle: bool,

    /// Read the GPU snapshot from a file instead of running the probe
    #[arg(long, global = true)]
    snapshot: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Lock a GPU and print its index (default)
    Select,

    /// Lock a GPU and run a command on it
    Run {
        /// Command and arguments
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },

    /// Run a command with no GPU visible
    Hide {
        /// Command and arguments
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },

    /// Show the GPU process snapshot
    Probe {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Exit status for failures caused by the environment rather than contention
const ENVIRONMENT_FAILURE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(ENVIRONMENT_FAILURE);
        }
    };

    // Initialize logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        parse_level(&config.logging.level)
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let snapshot = cli.snapshot.as_deref();
    let result = match cli.command.unwrap_or(Commands::Select) {
        Commands::Select => commands::select(&config, snapshot).await,
        Commands::Run { command } => commands::run(&config, snapshot, &command).await,
        Commands::Hide { command } => commands::hide(&command).await,
        Commands::Probe { json } => commands::probe(&config, snapshot, json).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => report(&e),
    }
}

/// Load the configuration file and apply command-line overrides
fn load_config(cli: &Cli) -> Result<GpulockConfig, GpulockError> {
    let mut config = match &cli.config {
        Some(path) => GpulockConfig::from_file(path)?,
        None => GpulockConfig::default(),
    };

    if !cli.stores.is_empty() {
        config.stores = cli.stores.clone();
    }
    if let Some(timeout) = cli.timeout {
        config.ttl_ms = timeout;
    }
    if cli.no_shuffle {
        config.shuffle = false;
    }

    Ok(config)
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "error" => Level::ERROR,
        _ => Level::WARN,
    }
}

/// Print a diagnostic and pick the exit status
fn report(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<GpulockError>() {
        Some(GpulockError::ResourceUnavailable(reason)) => {
            eprintln!("Failed to lock GPU: {}", reason);
            ExitCode::FAILURE
        }
        Some(e) if e.is_environment() => {
            eprintln!("Environment error: {}", e);
            ExitCode::from(ENVIRONMENT_FAILURE)
        }
        _ => {
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::parse_from([
            "gpulock",
            "--store",
            "redis://a:6379",
            "--store",
            "redis://b:6379",
            "--timeout",
            "2500",
            "--no-shuffle",
        ]);
        assert!(cli.command.is_none());

        let config = load_config(&cli).unwrap();
        assert_eq!(config.stores.len(), 2);
        assert_eq!(config.ttl_ms, 2500);
        assert!(!config.shuffle);
    }

    #[test]
    fn test_run_collects_trailing_args() {
        let cli = Cli::parse_from(["gpulock", "run", "python", "train.py", "--epochs", "3"]);
        match cli.command {
            Some(Commands::Run { command }) => {
                assert_eq!(command, vec!["python", "train.py", "--epochs", "3"]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("bogus"), Level::WARN);
    }
}
