//! CLI entry point for the symptom search engine.
//!
//! Provides commands for provisioning, ranking and maintenance. Every
//! command prints JSON to stdout; logs go to stderr.

use anyhow::Context;
use aurora_vector::bootstrap::run_full_setup;
use aurora_vector::{EngineError, SearchEngine, Settings, logging};
use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Symptom embedding store and hybrid search
#[derive(Parser)]
#[command(
    name = "aurora-vector",
    version = env!("CARGO_PKG_VERSION"),
    about = "Symptom embedding store and hybrid search",
    long_about = "Store symptom embeddings and rank them against a query by vector and trigram similarity.",
    next_line_help = true,
    styles = clap_cargo_style()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true, env = "AURORA_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory (overrides storage.path)
    #[arg(short, long, global = true)]
    storage: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
enum Commands {
    /// Health check, seed the base vocabulary and build the index
    #[command(about = "Provision storage with the base symptom vocabulary")]
    Setup,

    /// Rank the vocabulary against a query
    #[command(
        about = "Rank symptoms by hybrid vector and text similarity",
        after_help = "Examples:\n  aurora-vector rank --text febre --vector-file query.json\n  aurora-vector rank --text \"dor no peito\" --top-k 3\n\nThe vector file holds a JSON array of 384 floats. Without it the\ncached embedding for the text is used, or text similarity alone."
    )]
    Rank {
        /// Query text
        #[arg(short, long)]
        text: String,

        /// JSON file with the query vector
        #[arg(short, long)]
        vector_file: Option<PathBuf>,

        /// Maximum results (overrides ranking.top_k)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Abort after this many milliseconds
        #[arg(long)]
        deadline_ms: Option<u64>,
    },

    /// Build the IVF index once and report its shape
    ///
    /// Indexes live in memory only; serving processes build their own.
    #[command(
        about = "Dry-run an index build over the persisted records and report partitions",
        long_about = "Builds the approximate index from the persisted records and prints its generation, \
size and partition count. The index is not written to disk: every process builds its own \
on demand, so this command checks that a build succeeds and how it partitions the data."
    )]
    Rebuild,

    /// Evict stale embedding cache entries
    #[command(about = "Apply the cache retention policy")]
    Evict,

    /// Show engine statistics
    #[command(about = "Print record, cache and index counters")]
    Stats,

    /// Show current configuration settings
    #[command(about = "Display active settings as TOML")]
    Config,
}

#[derive(Debug, Serialize)]
struct EvictionReport {
    evicted: usize,
    remaining: usize,
}

#[derive(Debug, Serialize)]
struct RebuildReport {
    generation: u64,
    records: usize,
    partitions: usize,
    flat: bool,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        if let Some(engine_error) = e.downcast_ref::<EngineError>() {
            for suggestion in engine_error.recovery_suggestions() {
                eprintln!("  - {suggestion}");
            }
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("Configuration error loading from {}", path.display()))?,
        None => Settings::load().context("Configuration error")?,
    };
    if let Some(storage) = cli.storage {
        settings.storage.path = Some(storage);
    }
    settings.debug |= cli.debug;

    logging::init(settings.debug);

    match cli.command {
        Commands::Setup => {
            let engine = run_full_setup(settings)?;
            print_json(&engine.stats())
        }

        Commands::Rank {
            text,
            vector_file,
            top_k,
            deadline_ms,
        } => {
            let engine = SearchEngine::new(settings)?;
            let mut options = engine.default_options();
            if let Some(k) = top_k {
                options.top_k = k;
            }
            let deadline = deadline_from_ms(deadline_ms);

            let vector = match vector_file {
                Some(path) => Some(read_vector(&path)?),
                None => engine.lookup_embedding(&text, &engine.settings().cache.model),
            };

            let ranked = match vector {
                Some(vector) => engine.rank(&text, &vector, &options, deadline)?,
                None => {
                    tracing::info!("No query vector for '{text}', ranking on text only");
                    engine
                        .settings()
                        .ranking
                        .ranker()
                        .rank(&engine, &text, None, &options, deadline)?
                }
            };
            // Persist last_accessed bumps from the cache lookup
            engine.flush()?;
            print_json(&ranked)
        }

        Commands::Rebuild => {
            let engine = SearchEngine::new(settings)?;
            let snapshot = engine.rebuild_index(None)?;
            print_json(&RebuildReport {
                generation: snapshot.generation(),
                records: snapshot.len(),
                partitions: snapshot.partition_count(),
                flat: snapshot.is_flat(),
            })
        }

        Commands::Evict => {
            let engine = SearchEngine::new(settings)?;
            let evicted = engine.evict_stale();
            engine.flush()?;
            print_json(&EvictionReport {
                evicted,
                remaining: engine.stats().cache_entries,
            })
        }

        Commands::Stats => {
            let engine = SearchEngine::new(settings)?;
            print_json(&engine.stats())
        }

        Commands::Config => {
            println!("{}", toml::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

/// Absolute deadline `ms` from now; `None` when absent or out of range.
fn deadline_from_ms(ms: Option<u64>) -> Option<Instant> {
    ms.and_then(|ms| Instant::now().checked_add(Duration::from_millis(ms)))
}

fn read_vector(path: &Path) -> anyhow::Result<Vec<f32>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read vector file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("{} must contain a JSON array of floats", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
