//! labsync CLI
//!
//! Command-line participant client for labsync experiments.

use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use labsync_core::Config;

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "labsync")]
#[command(about = "labsync - Participant client for networked experiments")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use this config file instead of the default
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the experiment server and participate
    Run {
        /// Server host or IP (defaults to server_host from config)
        #[arg(long)]
        host: Option<String>,
        /// Server port (defaults to server_port from config)
        #[arg(long)]
        port: Option<u16>,
        /// Full WebSocket URL, overrides host and port
        #[arg(long, conflicts_with_all = ["host", "port"])]
        url: Option<String>,
    },
    /// Inspect or reset the session identity
    Session {
        #[command(subcommand)]
        command: Option<SessionCommands>,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Show status (server, session)
    Status,
}

#[derive(Subcommand, Clone)]
enum SessionCommands {
    /// Show the stored session id
    Show,
    /// Forget the stored session id
    Reset,
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (server_host, server_port, secure, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_ref();

    // Config commands work on the file directly
    if let Commands::Config { command } = &cli.command {
        return match command {
            Some(ConfigCommands::Show) | None => commands::config::show(config_path, &output),
            Some(ConfigCommands::Set { key, value }) => {
                commands::config::set(key.clone(), value.clone(), config_path, &output)
            }
        };
    }

    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    init_logging(&config);

    match cli.command {
        Commands::Run { host, port, url } => {
            let address = commands::run::resolve_address(&config, url, host, port)?;
            commands::run::run(&config, address, &output).await
        }
        Commands::Session { command } => match command {
            Some(SessionCommands::Show) | None => commands::session::show(&config, &output),
            Some(SessionCommands::Reset) => commands::session::reset(&config, &output),
        },
        Commands::Status => commands::status::show(&config, &output),
        Commands::Config { .. } => Ok(()),
    }
}

/// Log to a file, only when LABSYNC_LOG is set
///
/// Output on the terminal is the rendered experiment, so logs never go there.
fn init_logging(config: &Config) {
    let Ok(log_level) = std::env::var("LABSYNC_LOG") else {
        return;
    };

    let log_path = config.log_path();
    let log_file = match File::create(&log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not create log file {:?}: {}", log_path, e);
            return;
        }
    };

    let env_filter = EnvFilter::new(format!(
        "labsync_core={},labsync_cli={}",
        log_level, log_level
    ));

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(log_file)
        .try_init();

    info!("Logging initialized to {:?}", log_path);
}
