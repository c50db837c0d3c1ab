//! Binary entry point for stowaway.
//!
//! Drives the chat and vector stores from the command line.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use stowaway::models::Metadata;
use stowaway::observability::{self, InitOptions};
use stowaway::storage::{FilesystemSink, LoggingSink};
use stowaway::{
    ChatMessage, ChatSessionHandler, ChatStore, FlushHandle, MismatchPolicy, StowawayConfig,
    VectorStore,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Stowaway - in-memory stores with write-behind persistence.
#[derive(Parser)]
#[command(name = "stowaway")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Serve Prometheus metrics over HTTP while running.
    #[arg(long, global = true)]
    metrics_expose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Run a chat session over stdin/stdout, one JSON payload per line.
    Chat {
        /// Session ID (random if omitted).
        #[arg(short, long)]
        session: Option<String>,

        /// Where flushed messages go.
        #[arg(long, value_enum, default_value_t = SinkKind::Log)]
        sink: SinkKind,

        /// Directory for the filesystem sink.
        #[arg(long, default_value = "stowaway-data")]
        dir: PathBuf,
    },

    /// Load documents from a JSON Lines file and rank them against a query.
    Search {
        /// JSON Lines file of `{"content", "embedding", "metadata"}` objects.
        #[arg(short, long)]
        input: PathBuf,

        /// Query embedding, comma-separated.
        #[arg(
            short,
            long,
            value_delimiter = ',',
            num_args = 1..,
            allow_negative_numbers = true,
            required = true
        )]
        query: Vec<f32>,

        /// Maximum number of results (configured default if omitted).
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Minimum score (configured default if omitted).
        #[arg(short, long, allow_negative_numbers = true)]
        min_score: Option<f32>,

        /// Skip documents whose dimension differs from the query.
        #[arg(long)]
        skip_mismatched: bool,
    },

    /// Print the effective configuration as TOML.
    Config,
}

/// Persistence sink choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SinkKind {
    /// Log each write.
    Log,
    /// Write one JSON file per item.
    Fs,
}

/// One line of a search input file.
#[derive(Debug, Deserialize)]
struct DocumentLine {
    content: String,
    embedding: Vec<f32>,
    #[serde(default)]
    metadata: Metadata,
}

type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Main entry point.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match StowawayConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    let _observability = match observability::init_from_config(
        &config.observability,
        InitOptions {
            verbose: cli.verbose,
            metrics_expose: cli.metrics_expose,
        },
    ) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize observability: {e}");
            return ExitCode::FAILURE;
        },
    };
    for warning in &config.warnings {
        tracing::warn!(%warning, "Configuration warning");
    }

    match run_command(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
async fn run_command(command: Commands, config: StowawayConfig) -> CommandResult {
    match command {
        Commands::Chat { session, sink, dir } => cmd_chat(&config, session, sink, &dir).await,

        Commands::Search {
            input,
            query,
            top_k,
            min_score,
            skip_mismatched,
        } => cmd_search(&config, &input, &query, top_k, min_score, skip_mismatched).await,

        Commands::Config => cmd_config(&config),
    }
}

/// Chat session over stdin.
///
/// Lines that are not JSON are treated as plain text content.
async fn cmd_chat(
    config: &StowawayConfig,
    session_id: Option<String>,
    sink: SinkKind,
    dir: &Path,
) -> CommandResult {
    let store = ChatStore::new(&config.chat);
    let flusher = spawn_chat_flusher(&store, sink, dir).await?;
    let handler = ChatSessionHandler::new(store);
    let session = match session_id {
        Some(id) => handler.connect_with_id(id),
        None => handler.connect(),
    };
    tracing::info!(session_id = session.id(), "Chat session started");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let payload = if line.trim_start().starts_with('{') {
            line
        } else {
            serde_json::json!({ "content": line }).to_string()
        };

        let response = session.process(&payload);
        let mut out = serde_json::to_string(&response)?;
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
    }

    let count = session.message_count();
    session.close();
    let report = flusher.shutdown().await?;
    tracing::info!(
        messages = count,
        written = report.written,
        failed = report.failed,
        "Chat session closed"
    );
    Ok(())
}

async fn spawn_chat_flusher(
    store: &ChatStore,
    sink: SinkKind,
    dir: &Path,
) -> Result<FlushHandle, Box<dyn std::error::Error>> {
    let handle = match sink {
        SinkKind::Log => store.spawn_flusher(Arc::new(LoggingSink::new())),
        SinkKind::Fs => {
            let sink = FilesystemSink::<ChatMessage>::with_create(dir).await?;
            store.spawn_flusher(Arc::new(sink))
        },
    };
    Ok(handle)
}

/// Ranks documents from a JSON Lines file.
async fn cmd_search(
    config: &StowawayConfig,
    input: &Path,
    query: &[f32],
    top_k: Option<usize>,
    min_score: Option<f32>,
    skip_mismatched: bool,
) -> CommandResult {
    let store = VectorStore::new(&config.vector);
    let flusher = store.spawn_flusher(Arc::new(LoggingSink::new()));

    let contents = tokio::fs::read_to_string(input)
        .await
        .map_err(|e| format!("failed to read {}: {e}", input.display()))?;
    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let document: DocumentLine = serde_json::from_str(line)
            .map_err(|e| format!("{}:{}: {e}", input.display(), index + 1))?;
        store.store_document(document.content, document.embedding, document.metadata);
    }

    let policy = if skip_mismatched {
        MismatchPolicy::Skip
    } else {
        config.vector.mismatch_policy
    };
    let results = store.similarity_search_with(
        query,
        top_k.unwrap_or(config.vector.default_top_k),
        min_score.unwrap_or(config.vector.default_min_score),
        policy,
    )?;

    println!("{}", serde_json::to_string_pretty(&results)?);

    flusher.shutdown().await?;
    Ok(())
}

/// Prints the effective configuration.
fn cmd_config(config: &StowawayConfig) -> CommandResult {
    if let Some(path) = StowawayConfig::default_path() {
        println!("# default config path: {}", path.display());
    }
    print!("{}", config.to_toml()?);
    Ok(())
}
