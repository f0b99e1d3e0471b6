//! deck - turn a conversation into a slide deck
//!
//! Reads a generation request (JSON), runs the full pipeline and prints the
//! response body. Also offers offline checks for slide fragments and the
//! effective configuration.

mod commands;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use deck::DeckConfig;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "deck")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Generate presentation decks from Q&A conversations")]
#[command(long_about = r#"
Turns a question/answer conversation, its charts and cited sources into a
16:9 presentation file.

Examples:
  deck generate --request request.json      # Build a deck, print {"fileId": ..., "htmlFileId": ...}
  cat request.json | deck generate -r -     # Read the request from stdin
  deck validate slide.html --charts 2       # Check a fragment offline
  deck config --show                        # Effective configuration
"#)]
struct Cli {
    /// Config file (defaults to ~/.deck/config.toml)
    #[arg(short, long, env = "DECK_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// No colours in terminal output
    #[arg(long, global = true)]
    plain: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline for one request
    Generate {
        /// Request JSON file, or `-` for stdin
        #[arg(short, long)]
        request: PathBuf,

        /// Directory finished decks are stored under
        #[arg(short, long, env = "DECK_OUTPUT_DIR")]
        output: Option<PathBuf>,

        /// Keep the per-request workspace for inspection
        #[arg(long)]
        keep_workspace: bool,
    },

    /// Check a slide fragment against the markup contract
    Validate {
        /// Fragment file, or `-` for stdin
        fragment: PathBuf,

        /// Slide index the fragment belongs to
        #[arg(short, long, default_value = "1")]
        slide: usize,

        /// Number of chart placeholders the slide must carry
        #[arg(long, default_value = "0")]
        charts: usize,
    },

    /// Locate a stored deck
    Lookup {
        /// Requesting user
        #[arg(short, long)]
        user: String,

        /// Identifier returned by `generate`
        file_id: String,
    },

    /// Configuration management
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

fn load_config(cli: &Cli) -> Result<(DeckConfig, PathBuf)> {
    let path = cli.config.clone().unwrap_or_else(DeckConfig::config_path);
    let mut config = DeckConfig::load(&path)?;
    config.apply_env();
    Ok((config, path))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the response body
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("deck={},deck_cli={},warn", log_level, log_level).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let (mut config, config_path) = load_config(&cli)?;

    match cli.command {
        Commands::Generate {
            request,
            output,
            keep_workspace,
        } => {
            if let Some(output) = output {
                config.workflow.output_root = output;
            }
            if keep_workspace {
                config.workflow.keep_workspace = true;
            }
            config.validate()?;

            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::warn!("Interrupted, cancelling request");
                        cancel.cancel();
                    }
                }
            });

            commands::generate(&config, &request, cancel).await
        }
        Commands::Validate {
            fragment,
            slide,
            charts,
        } => commands::validate(&config, &fragment, slide, charts, cli.plain).await,
        Commands::Lookup { user, file_id } => commands::lookup(&config, &user, &file_id, cli.plain).await,
        // --show is the only action for now, and also the default
        Commands::Config { show: _ } => commands::show_config(&config, &config_path, cli.plain),
    }
}
