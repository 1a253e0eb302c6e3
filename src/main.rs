//! # Folio CLI (`folio`)
//!
//! Command-line interface for AI-assisted project descriptions.
//!
//! ## Usage
//!
//! ```bash
//! folio --config ./config/folio.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `folio generate --project <id> <url>...` | Generate a description from source files |
//! | `folio parse <file>` | Parse a saved raw model response |
//! | `folio models` | Show the configured model sequence |
//! | `folio serve` | Start the HTTP server |
//!
//! Set `RUST_LOG=folio=debug` for per-attempt diagnostics.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use folio::config::{self, Config};
use folio::fallback::FallbackOrchestrator;
use folio::parse::parse_generation;
use folio::server;

/// Folio — AI-assisted descriptions for portfolio projects.
#[derive(Parser)]
#[command(
    name = "folio",
    about = "Folio — AI-assisted descriptions for portfolio projects",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/folio.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a description and technology list from source files.
    ///
    /// Fetches each URL (which must be on the trusted raw-content host),
    /// then asks the configured models in order until one succeeds.
    /// Ctrl-C cancels the run.
    Generate {
        /// Project identifier, used for logging.
        #[arg(long)]
        project: String,

        /// Raw file URLs.
        #[arg(required = true)]
        urls: Vec<String>,

        /// Only try the default model.
        #[arg(long)]
        no_fallback: bool,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Parse a saved raw model response and print the result.
    Parse {
        /// File containing the model's raw message content.
        path: PathBuf,
    },

    /// Show the configured model sequence.
    Models,

    /// Start the HTTP server.
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("folio=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    // Commands that don't require config
    if let Commands::Parse { path } = &cli.command {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let result = parse_generation(&raw)?;
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Generate {
            project,
            urls,
            no_fallback,
            json,
        } => {
            run_generate(&cfg, &project, &urls, !no_fallback, json).await?;
        }
        Commands::Models => {
            for (i, model) in cfg.completion.model_sequence().iter().enumerate() {
                let tag = if i == 0 { "default" } else { "fallback" };
                println!("{}. {} ({})", i + 1, model, tag);
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Parse { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}

async fn run_generate(
    cfg: &Config,
    project: &str,
    urls: &[String],
    enable_fallback: bool,
    json: bool,
) -> Result<()> {
    if urls.len() > cfg.files.max_files {
        anyhow::bail!(
            "at most {} files may be submitted, got {}",
            cfg.files.max_files,
            urls.len()
        );
    }

    let orchestrator = FallbackOrchestrator::new(cfg)?;
    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let generation = match orchestrator
        .generate_with_fallback(urls, project, enable_fallback, &cancel)
        .await
    {
        Ok(generation) => generation,
        Err(e) if e.is_cancelled() => {
            eprintln!("cancelled");
            std::process::exit(130);
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "description": generation.result.description,
                "technologies": generation.result.technologies,
                "model": generation.model,
                "usage": generation.usage,
            }))?
        );
    } else {
        println!("Model: {}", generation.model);
        println!();
        println!("{}", generation.result.description);
        println!();
        println!("Technologies: {}", generation.result.technologies.join(", "));
        if let Some(usage) = generation.usage {
            println!(
                "Tokens: {} prompt + {} completion = {}",
                usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
            );
        }
    }

    Ok(())
}
