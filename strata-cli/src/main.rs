//! Strata CLI - inspect and replay conversation memory stored in SQLite

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use strata_core::prelude::*;

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Hierarchical conversation memory CLI", long_about = None)]
#[command(version)]
struct Cli {
    /// SQLite database (defaults to storage.sqlite_path from configuration)
    #[arg(long, global = true, env = "STRATA_DB")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append one message to a conversation
    Append {
        #[arg(long)]
        app_id: AppId,
        /// user or assistant
        #[arg(long)]
        role: Role,
        text: String,
    },
    /// Append a JSONL transcript, running a summary pass after each assistant turn
    Replay {
        #[arg(long)]
        app_id: AppId,
        #[arg(long, default_value_t = 0)]
        user_id: UserId,
        /// File with one {"role": ..., "text": ...} object per line
        transcript: PathBuf,
        /// Use the extractive summarizer and hashed embeddings
        #[arg(long)]
        offline: bool,
    },
    /// Print the assembled context as JSON
    Context {
        #[arg(long)]
        app_id: AppId,
    },
    /// Print compression statistics as JSON
    Stats {
        #[arg(long)]
        app_id: AppId,
    },
    /// Print the effective configuration
    Config,
    /// Version information
    Version,
}

#[derive(Deserialize)]
struct TranscriptLine {
    role: String,
    text: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = StrataConfig::load().context("loading configuration")?;

    match cli.command {
        Commands::Version => {
            println!("strata {}", env!("CARGO_PKG_VERSION"));
            println!("strata-core {}", strata_core::VERSION);
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Append { app_id, role, text } => {
            let memory = open(&config, cli.db, true).await?;
            let message = memory.record_message(app_id, role, &text).await?;
            println!("{}", serde_json::to_string(&message)?);
            memory.shutdown().await;
        }
        Commands::Replay {
            app_id,
            user_id,
            transcript,
            offline,
        } => {
            let memory = open(&config, cli.db, offline).await?;
            replay(&memory, RequestContext::new(app_id, user_id), &transcript).await?;
            let stats = memory.get_compression_stats(app_id).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            memory.shutdown().await;
        }
        Commands::Context { app_id } => {
            let memory = open(&config, cli.db, true).await?;
            let context = memory.assemble_context(app_id).await?;
            println!("{}", serde_json::to_string_pretty(&context)?);
            memory.shutdown().await;
        }
        Commands::Stats { app_id } => {
            let memory = open(&config, cli.db, true).await?;
            let stats = memory.get_compression_stats(app_id).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            memory.shutdown().await;
        }
    }

    Ok(())
}

/// Open memory over SQLite with passes run inline.
///
/// Read-only commands pass `offline` so they never construct a model client.
async fn open(config: &StrataConfig, db: Option<PathBuf>, offline: bool) -> Result<SmartMemory> {
    let path = db.unwrap_or_else(|| config.storage.sqlite_path.clone());
    let store = Arc::new(
        SqliteStore::open(&path).with_context(|| format!("opening {}", path.display()))?,
    );

    let mut builder = SmartMemory::builder()
        .config(config.clone())
        .store(store)
        .background_worker(false);
    if offline {
        builder = builder
            .summarizer(Arc::new(ExtractiveSummarizer::new()))
            .embedding_oracle(Arc::new(HashedEmbeddings::default()));
    }
    Ok(builder.build().await?)
}

async fn replay(memory: &SmartMemory, ctx: RequestContext, transcript: &Path) -> Result<()> {
    let file = std::fs::File::open(transcript)
        .with_context(|| format!("opening {}", transcript.display()))?;

    for (line_no, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: TranscriptLine = serde_json::from_str(&line)
            .with_context(|| format!("line {}: invalid transcript entry", line_no + 1))?;
        let role: Role = entry
            .role
            .parse()
            .with_context(|| format!("line {}", line_no + 1))?;

        let message = memory.record_message(ctx.app_id, role, &entry.text).await?;
        if role != Role::Assistant {
            continue;
        }

        match memory.run_summary_pass(&ctx).await {
            Ok(report) => {
                if let Some(short) = &report.short {
                    println!(
                        "message {}: SHORT #{} covering {}..{} ({})",
                        message.id,
                        short.id,
                        short.covered_from,
                        short.covered_to,
                        report
                            .complexity
                            .map(|c| c.to_string())
                            .unwrap_or_default(),
                    );
                }
                for (tier, outcome) in [("MID", &report.mid), ("LONG", &report.long)] {
                    match outcome {
                        Some(MergeOutcome::Merged(s)) => println!(
                            "message {}: {tier} #{} from parent #{}",
                            message.id,
                            s.id,
                            s.parent_summary_id.unwrap_or_default()
                        ),
                        Some(MergeOutcome::Aborted(reason)) => {
                            println!("message {}: {tier} merge aborted: {reason}", message.id)
                        }
                        _ => {}
                    }
                }
            }
            Err(e) => println!("message {}: summary pass failed: {e}", message.id),
        }
    }
    Ok(())
}
