//! lmsync CLI - Mirror Canvas LMS courses to a local directory
//!
//! Provides commands for:
//! - Downloading course modules, pages and files
//! - Uploading new and modified local files
//! - Previewing the remote or local course tree
//! - Managing configuration

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{
    completions::CompletionsCommand,
    config::ConfigCommand,
    exit_code_for_error,
    sync::SyncCommand,
    upload::UploadCommand,
    walk::{ShowCommand, WalkCommand},
    CommandContext,
};
use lmsync_core::config::{Config, LoggingConfig};
use output::{get_formatter, OutputFormat};

#[derive(Debug, Parser)]
#[command(name = "lmsync", version, about = "Two-way sync between Canvas LMS and a local directory")]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Download new and changed course content
    Sync(SyncCommand),
    /// Upload new and modified local files
    Upload(UploadCommand),
    /// List what a pass would visit
    Walk(WalkCommand),
    /// Print the course tree
    Show(ShowCommand),
    /// View and manage configuration
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Generate shell completions
    Completions(CompletionsCommand),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logging settings come from the file; a broken file is reported by the command itself
    let logging = cli
        .config
        .as_deref()
        .map_or_else(
            || Config::load_or_default(&Config::default_path()),
            Config::load_or_default,
        )
        .logging;
    init_tracing(&logging, cli.verbose, cli.quiet);

    let ctx = CommandContext {
        format: if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        },
        config_path: cli.config,
        quiet: cli.quiet,
    };

    let result = match cli.command {
        Commands::Sync(cmd) => cmd.execute(&ctx).await,
        Commands::Upload(cmd) => cmd.execute(&ctx).await,
        Commands::Walk(cmd) => cmd.execute(&ctx).await,
        Commands::Show(cmd) => cmd.execute(&ctx).await,
        Commands::Config(cmd) => cmd.execute(&ctx).await,
        Commands::Completions(cmd) => cmd.execute(&ctx).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            get_formatter(ctx.format.is_json()).error(&format!("{e:#}"));
            exit_code_for_error(&e)
        }
    }
}

/// Filter directive for the given flags
///
/// `-v`/`-q` win over `RUST_LOG`, which wins over `logging.level`.
fn filter_for(configured_level: &str, verbose: u8, quiet: bool) -> EnvFilter {
    let forced = match (verbose, quiet) {
        (0, true) => Some("error"),
        (0, false) => None,
        (1, _) => Some("debug"),
        _ => Some("trace"),
    };
    match forced {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(configured_level)),
    }
}

fn init_tracing(logging: &LoggingConfig, verbose: u8, quiet: bool) {
    let env_filter = filter_for(&logging.level, verbose, quiet);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
