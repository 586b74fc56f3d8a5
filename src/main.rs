//! # Lexpipe CLI
//!
//! The `lexpipe` binary is the primary interface for the opinion ingestion
//! pipeline. It provides commands for database initialization, single-file
//! ingestion, batch processing with checkpoint resume, and post-ingest
//! verification.
//!
//! ## Usage
//!
//! ```bash
//! lexpipe --config ./config/lexpipe.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lexpipe init` | Create the SQLite database and run schema migrations |
//! | `lexpipe ingest <pdf>` | Process one PDF end to end and print a summary |
//! | `lexpipe batch <dir>` | Two-phase batch over a directory of PDFs |
//! | `lexpipe verify --case-id <id>` | Field-by-field report for one case |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! lexpipe init --config ./config/lexpipe.toml
//!
//! # Ingest one opinion
//! lexpipe ingest 39300-3_III.pdf
//!
//! # Batch a directory with a metadata manifest
//! lexpipe batch ./pdfs --manifest ./manifest.csv --job-name aug_backfill
//!
//! # Resume an interrupted batch
//! lexpipe batch ./pdfs --resume ./ledger/checkpoint_aug_backfill.json
//!
//! # Retry the failures from a previous run
//! lexpipe batch ./pdfs --retry-failed ./ledger/failed_aug_backfill.csv
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use lexpipe::batch::{self, BatchOptions};
use lexpipe::config;
use lexpipe::index::{EmbedMode, PhraseFilter};
use lexpipe::migrate;
use lexpipe::progress::ProgressMode;
use lexpipe::verify;

/// Lexpipe CLI — a batch ingestion and indexing pipeline for appellate
/// court opinions.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/lexpipe.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "lexpipe",
    about = "Lexpipe — an ingestion and indexing pipeline for appellate court opinion PDFs",
    version,
    long_about = "Lexpipe extracts text from opinion PDFs (remote parse service with local \
    fallback), pulls structured fields with a local LLM, chunks and sentence-splits the body, \
    and indexes everything into SQLite with FTS5 and optional chunk embeddings."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/lexpipe.toml`. Database, extraction, model,
    /// embedding, chunking, and batch settings are read from this file.
    #[arg(long, global = true, default_value = "./config/lexpipe.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (cases,
    /// documents, dimensions, chunks, sentences, FTS, vectors). This command
    /// is idempotent — running it multiple times is safe.
    Init,

    /// Process a single PDF end to end.
    ///
    /// Extracts text, runs LLM extraction, persists the case, and indexes
    /// it. Prints a summary of what was stored. A failed extraction still
    /// records a failed case row so the failure is queryable.
    Ingest {
        /// Path to the opinion PDF.
        pdf: PathBuf,

        /// CSV manifest with per-case metadata (case number, title, dates).
        /// Without it, metadata is inferred from the filename.
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Which chunks to embed: `all`, `important` (facts, analysis,
        /// holding), or `none`.
        #[arg(long, default_value = "important")]
        embed_chunks: EmbedMode,

        /// Phrase filter: `strict` keeps only phrases containing a legal
        /// term, `relaxed` keeps everything above the frequency floor.
        #[arg(long, default_value = "strict")]
        phrases: PhraseFilter,
    },

    /// Run the two-phase batch over a directory of PDFs.
    ///
    /// Phase one extracts every file over a bounded worker pool; phase two
    /// persists and indexes the results. Progress is checkpointed after
    /// every file, so an interrupted run resumes with `--resume`.
    Batch {
        /// Directory to scan recursively for PDFs.
        dir: PathBuf,

        /// CSV manifest with per-case metadata (case number, title, dates).
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Name for this job; ledger files are keyed on it.
        /// Defaults to a timestamped name.
        #[arg(long)]
        job_name: Option<String>,

        /// Resume from a checkpoint file written by a previous run.
        #[arg(long)]
        resume: Option<PathBuf>,

        /// Reprocess the files listed in a failure log from a previous run.
        #[arg(long)]
        retry_failed: Option<PathBuf>,

        /// Maximum number of files to process.
        #[arg(long)]
        limit: Option<usize>,

        /// Extraction and insert worker count. Defaults to `[batch].workers`.
        #[arg(long)]
        workers: Option<usize>,

        /// Process files one at a time (equivalent to --workers 1).
        #[arg(long)]
        sequential: bool,

        /// Which chunks to embed: `all`, `important`, or `none`.
        #[arg(long, default_value = "important")]
        embed_chunks: EmbedMode,

        /// Phrase filter: `strict` or `relaxed`.
        #[arg(long, default_value = "strict")]
        phrases: PhraseFilter,

        /// Progress output on stderr: `off`, `human`, or `json`.
        #[arg(long, default_value = "human")]
        progress: String,
    },

    /// Print a field-by-field report for one stored case.
    ///
    /// Shows which case columns are populated and how many child rows each
    /// satellite table holds.
    Verify {
        /// The case id to report on.
        #[arg(long)]
        case_id: i64,
    },
}

fn parse_progress(s: &str) -> anyhow::Result<ProgressMode> {
    match s {
        "off" => Ok(ProgressMode::Off),
        "human" => Ok(ProgressMode::Human),
        "json" => Ok(ProgressMode::Json),
        other => anyhow::bail!("Unknown progress mode: '{}'. Must be off, human, or json.", other),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            pdf,
            manifest,
            embed_chunks,
            phrases,
        } => {
            batch::run_ingest(&cfg, &pdf, manifest.as_deref(), embed_chunks, phrases).await?;
        }
        Commands::Batch {
            dir,
            manifest,
            job_name,
            resume,
            retry_failed,
            limit,
            workers,
            sequential,
            embed_chunks,
            phrases,
            progress,
        } => {
            let opts = BatchOptions {
                manifest,
                job_name,
                resume,
                retry_failed,
                limit,
                workers,
                sequential,
                embed_mode: embed_chunks,
                phrase_filter: phrases,
                progress: parse_progress(&progress)?,
            };
            batch::run_batch(&cfg, &dir, opts).await?;
        }
        Commands::Verify { case_id } => {
            verify::run_verify(&cfg, case_id).await?;
        }
    }

    Ok(())
}
