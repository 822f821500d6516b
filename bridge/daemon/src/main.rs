//! CodePulse Daemon - Review Session Bridge
//!
//! Hosts one shared review session and exposes it to editor and console
//! plugins over stdio, or runs a single review from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Serve newline-delimited JSON on stdin/stdout (default)
//! codepulse-daemon serve
//!
//! # One-shot review of a file, streamed to stdout
//! codepulse-daemon review --persona security --file src/auth.rs
//!
//! # Review stdin with Groq at the strictest level
//! cat handler.py | codepulse-daemon --provider groq --strictness 4 review -p bugfind
//!
//! # List personas
//! codepulse-daemon personas
//!
//! # Verbose logging (always on stderr)
//! RUST_LOG=debug codepulse-daemon serve
//! ```

mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{error, info};

use codepulse_core::{
    load_config, load_config_from_path, BridgeConfig, ConfigOverrides, EventSink, PersonaCatalog,
    Provider, ProviderKind, ReviewEvent, ReviewOrchestrator, SessionState, SessionStore,
    Strictness,
};

/// CodePulse Daemon - AI code review bridge
#[derive(Parser, Debug)]
#[command(name = "codepulse-daemon")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "CODEPULSE_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Review backend (gemini or groq)
    #[arg(long, value_name = "KIND")]
    provider: Option<ProviderKind>,

    /// Primary model
    #[arg(short = 'm', long, value_name = "MODEL")]
    model: Option<String>,

    /// Initial strictness (1-4)
    #[arg(short = 's', long, value_name = "LEVEL")]
    strictness: Option<i64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "CODEPULSE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the shared session as newline-delimited JSON on stdio
    Serve,

    /// Review one file (or stdin) and stream the result to stdout
    Review {
        /// Persona key
        #[arg(short = 'p', long)]
        persona: String,

        /// File to review; stdin when omitted
        #[arg(short = 'f', long, value_name = "PATH")]
        file: Option<PathBuf>,

        /// Wait for the whole review instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },

    /// List available personas
    Personas,
}

/// Initialize logging on stderr so stdout stays machine-readable
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "codepulse_daemon={level},codepulse_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

fn resolve_config(args: &Args) -> Result<BridgeConfig> {
    let mut overrides = ConfigOverrides::new();
    if let Some(kind) = args.provider {
        overrides = overrides.with_provider(kind);
    }
    if let Some(model) = &args.model {
        overrides = overrides.with_model(model.clone());
    }
    if let Some(level) = args.strictness {
        overrides = overrides.with_strictness(Strictness::new(level)?);
    }

    match &args.config {
        Some(path) => {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
            load_config_from_path(Some(path.clone()), &overrides)
        }
        None => load_config(&overrides),
    }
    .context("Failed to load configuration")
}

/// Forwards events into a channel the CLI drains
struct ChannelSink(mpsc::UnboundedSender<ReviewEvent>);

impl EventSink for ChannelSink {
    fn emit(&self, event: ReviewEvent) {
        // The receiver only goes away once the review is over.
        let _ = self.0.send(event);
    }
}

async fn read_code(file: Option<&PathBuf>) -> Result<String> {
    match file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut code = String::new();
            tokio::io::stdin()
                .read_to_string(&mut code)
                .await
                .context("Failed to read code from stdin")?;
            Ok(code)
        }
    }
}

async fn review_once(
    config: BridgeConfig,
    persona: &str,
    file: Option<&PathBuf>,
    no_stream: bool,
) -> Result<()> {
    let code = read_code(file).await?;
    let provider = Provider::from_config(config.provider);
    let mut stdout = tokio::io::stdout();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let orchestrator = ReviewOrchestrator::with_store(
        provider,
        PersonaCatalog::builtin(),
        SessionStore::from_state(SessionState::with_strictness(config.default_strictness)),
        Arc::new(ChannelSink(tx)),
    );

    let accepted = orchestrator.submit_review(persona, Some(code))?;
    info!(
        persona = %accepted.persona_key,
        strictness = accepted.strictness_level.level(),
        "Review started"
    );

    while let Some(event) = rx.recv().await {
        match event {
            ReviewEvent::StreamChunk { chunk, .. } if !no_stream => {
                stdout.write_all(chunk.as_bytes()).await?;
                stdout.flush().await?;
            }
            ReviewEvent::StreamEnd { final_result } => {
                if no_stream {
                    stdout.write_all(final_result.as_bytes()).await?;
                }
                stdout.write_all(b"\n").await?;
                break;
            }
            ReviewEvent::StreamError { message } => bail!("Review failed: {message}"),
            ReviewEvent::StreamChunk { .. }
            | ReviewEvent::StateChanged { .. }
            | ReviewEvent::HistorySelected { .. } => {}
        }
    }
    stdout.flush().await?;
    accepted.handle.outcome().await;
    Ok(())
}

fn print_personas() {
    for persona in PersonaCatalog::builtin().iter() {
        println!(
            "{:<14} {:<16} {:<20} {}",
            persona.key, persona.display_name, persona.icon, persona.color
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = resolve_config(&args)?;
    info!(
        provider = %config.provider.kind,
        model = %config.provider.model,
        source = %config.source(),
        "CodePulse daemon starting"
    );

    let result = match args.command.unwrap_or(Command::Serve) {
        Command::Personas => {
            print_personas();
            Ok(())
        }
        Command::Review {
            persona,
            file,
            no_stream,
        } => review_once(config, &persona, file.as_ref(), no_stream).await,
        Command::Serve => {
            tokio::select! {
                result = server::serve(config) => result,
                _ = tokio::signal::ctrl_c() => {
                    info!("Received interrupt, shutting down");
                    Ok(())
                }
            }
        }
    };

    if let Err(e) = &result {
        error!(error = %e, "CodePulse daemon stopped with error");
    }
    result
}
