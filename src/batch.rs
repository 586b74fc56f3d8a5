//! Batch pipeline orchestration.
//!
//! Runs a directory of opinion PDFs through two strictly separated phases:
//! every extraction finishes before the first insert starts. Extraction is
//! fanned out over a bounded worker pool; inserts run through their own
//! pool against the shared SQLite pool. The progress ledger is saved after
//! every state change, and Ctrl-C triggers a best-effort checkpoint save
//! before exit.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::assemble;
use crate::config::Config;
use crate::db;
use crate::dimensions::DimensionResolver;
use crate::extract::TextExtractor;
use crate::index::{self, EmbedMode, PhraseFilter};
use crate::ledger::{self, ProgressLedger};
use crate::manifest::{self, Manifest};
use crate::models::{CaseRecord, FailureRecord};
use crate::persist;
use crate::progress::{BatchProgressEvent, ProgressMode};

pub struct BatchOptions {
    pub manifest: Option<PathBuf>,
    pub job_name: Option<String>,
    pub resume: Option<PathBuf>,
    pub retry_failed: Option<PathBuf>,
    pub limit: Option<usize>,
    pub workers: Option<usize>,
    pub sequential: bool,
    pub embed_mode: EmbedMode,
    pub phrase_filter: PhraseFilter,
    pub progress: ProgressMode,
}

/// Run the two-phase batch over a directory of PDFs.
pub async fn run_batch(config: &Config, dir: &Path, opts: BatchOptions) -> Result<()> {
    let started = Instant::now();

    let mut files = match &opts.retry_failed {
        Some(csv) => ledger::load_failed_files(csv)?,
        None => discover_pdfs(dir)?,
    };
    if files.is_empty() {
        bail!("No PDF files found under {}", dir.display());
    }
    if let Some(limit) = opts.limit {
        files.truncate(limit);
    }

    let ledger = match &opts.resume {
        Some(checkpoint) => ProgressLedger::resume(checkpoint, files.len() as u64)?,
        None => ProgressLedger::new(&config.batch.ledger_dir, opts.job_name.clone(), files.len() as u64)?,
    };
    // Failed files are terminal in the processed set; a retry run feeds
    // them back in explicitly, so only normal runs subtract it
    if opts.retry_failed.is_none() {
        files = ledger.unprocessed(&files).into_iter().cloned().collect();
    }
    info!(job = ledger.job_name(), files = files.len(), "batch starting");

    let ledger = Arc::new(Mutex::new(ledger));
    spawn_checkpoint_on_interrupt(ledger.clone());

    let manifest = match &opts.manifest {
        Some(path) => Some(Manifest::load(path)?),
        None => None,
    };

    let workers = if opts.sequential {
        1
    } else {
        opts.workers.unwrap_or(config.batch.workers).max(1)
    };

    let config = Arc::new(config.clone());
    let manifest = Arc::new(manifest);
    let extractor = Arc::new(TextExtractor::new(config.extraction.clone())?);
    let reporter = opts.progress.reporter();

    // Phase 1: extract everything
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut handles = Vec::with_capacity(files.len());
    for (idx, path) in files.iter().enumerate() {
        let semaphore = semaphore.clone();
        let config = config.clone();
        let manifest = manifest.clone();
        let extractor = extractor.clone();
        let path = path.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let metadata = manifest::metadata_for(&path, manifest.as_ref().as_ref());
            let record = assemble::assemble_case(&config, &extractor, metadata, &path).await;
            (idx, path, record)
        }));
    }

    let total = files.len() as u64;
    let mut extracted: Vec<(usize, PathBuf, CaseRecord)> = Vec::with_capacity(files.len());
    for handle in handles {
        let result = handle.await.context("extraction task panicked")?;
        extracted.push(result);
        reporter.report(BatchProgressEvent::Extracting {
            n: extracted.len() as u64,
            total,
        });
    }
    // Results arrive in completion order; restore input order
    extracted.sort_by_key(|(idx, _, _)| *idx);

    {
        let mut ledger = ledger.lock().ok().context("ledger mutex poisoned")?;
        for (_, path, record) in &extracted {
            if record.extraction_ok {
                ledger.mark_extracted(path)?;
            } else {
                ledger.mark_failed(&failure_for(path, record, "extraction"))?;
            }
        }
    }

    // Phase 2: persist and index
    let pool = db::connect(&config).await?;
    let dims = Arc::new(DimensionResolver::new(pool.clone()));
    let embed_lock = Arc::new(tokio::sync::Mutex::new(()));

    let semaphore = Arc::new(Semaphore::new(workers));
    let mut handles = Vec::with_capacity(extracted.len());
    for (_, path, record) in extracted {
        let semaphore = semaphore.clone();
        let config = config.clone();
        let pool = pool.clone();
        let dims = dims.clone();
        let embed_lock = embed_lock.clone();
        let ledger = ledger.clone();
        let embed_mode = opts.embed_mode;
        let phrase_filter = opts.phrase_filter;
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            persist_one(
                &config,
                &pool,
                &dims,
                &embed_lock,
                &ledger,
                &path,
                record,
                embed_mode,
                phrase_filter,
            )
            .await
        }));
    }

    let mut inserted = 0u64;
    let insert_total = handles.len() as u64;
    for handle in handles {
        handle.await.context("insert task panicked")??;
        inserted += 1;
        reporter.report(BatchProgressEvent::Inserting {
            n: inserted,
            total: insert_total,
        });
    }

    pool.close().await;
    let mut ledger = ledger.lock().ok().context("ledger mutex poisoned")?;
    ledger.finish(started.elapsed())?;
    Ok(())
}

/// Persist one record and run indexing for successful extractions.
/// Insert failures are recorded in the ledger, not propagated.
#[allow(clippy::too_many_arguments)]
async fn persist_one(
    config: &Config,
    pool: &sqlx::SqlitePool,
    dims: &DimensionResolver,
    embed_lock: &tokio::sync::Mutex<()>,
    ledger: &Mutex<ProgressLedger>,
    path: &Path,
    record: CaseRecord,
    embed_mode: EmbedMode,
    phrase_filter: PhraseFilter,
) -> Result<()> {
    match persist::insert_case(pool, dims, &record).await {
        Ok((case_id, was_new)) => {
            if record.extraction_ok {
                let stats = index::index_case(
                    pool,
                    &config.chunking,
                    &config.embedding,
                    embed_lock,
                    case_id,
                    &record.full_text,
                    embed_mode,
                    phrase_filter,
                )
                .await;
                for error in &stats.errors {
                    warn!(case_id, error = %error, "indexing error");
                }
                info!(
                    case_id,
                    was_new,
                    chunks = stats.chunks_created,
                    sentences = stats.sentences_created,
                    "case persisted"
                );
                let mut ledger = ledger.lock().ok().context("ledger mutex poisoned")?;
                ledger.mark_success(path, was_new)?;
            }
            // Failed extractions were already terminal in phase 1; the row
            // exists so the failure is queryable
            Ok(())
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "insert failed");
            if record.extraction_ok {
                let mut failure = failure_for(path, &record, "insert");
                failure.error = e.to_string();
                let mut ledger = ledger.lock().ok().context("ledger mutex poisoned")?;
                ledger.mark_failed(&failure)?;
            }
            Ok(())
        }
    }
}

/// Process a single PDF end to end and print a summary.
pub async fn run_ingest(
    config: &Config,
    pdf: &Path,
    manifest_path: Option<&Path>,
    embed_mode: EmbedMode,
    phrase_filter: PhraseFilter,
) -> Result<()> {
    let manifest = match manifest_path {
        Some(p) => Some(Manifest::load(p)?),
        None => None,
    };
    let extractor = TextExtractor::new(config.extraction.clone())?;
    let metadata = manifest::metadata_for(pdf, manifest.as_ref());
    let record = assemble::assemble_case(config, &extractor, metadata, pdf).await;

    let pool = db::connect(config).await?;
    let dims = DimensionResolver::new(pool.clone());
    let (case_id, was_new) = persist::insert_case(&pool, &dims, &record).await?;

    println!("ingest {}", record.metadata.pdf_filename);
    println!("  case id: {}", case_id);
    println!("  new insert: {}", was_new);

    if record.extraction_ok {
        let embed_lock = tokio::sync::Mutex::new(());
        let stats = index::index_case(
            &pool,
            &config.chunking,
            &config.embedding,
            &embed_lock,
            case_id,
            &record.full_text,
            embed_mode,
            phrase_filter,
        )
        .await;
        println!("  chunks: {}", stats.chunks_created);
        println!("  sentences: {}", stats.sentences_created);
        println!("  words indexed: {}", stats.words_indexed);
        println!("  phrases: {}", stats.phrases_extracted);
        if config.embedding.is_enabled() {
            println!("  embeddings: {}", stats.embeddings_generated);
        }
        for error in &stats.errors {
            println!("  warning: {}", error);
        }
    } else {
        println!(
            "  extraction failed: {}",
            record.error_message.as_deref().unwrap_or("unknown error")
        );
    }
    println!("ok");

    pool.close().await;
    Ok(())
}

fn failure_for(path: &Path, record: &CaseRecord, stage: &str) -> FailureRecord {
    FailureRecord {
        timestamp: Utc::now().to_rfc3339(),
        file_path: path.to_string_lossy().into_owned(),
        stage: stage.to_string(),
        error: record
            .error_message
            .clone()
            .unwrap_or_else(|| "unknown error".to_string()),
        case_number: record.metadata.case_number.clone(),
        case_title: record.metadata.title.clone().unwrap_or_default(),
    }
}

/// Recursively find PDFs under a directory, sorted for deterministic order.
fn discover_pdfs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .map(|ext| ext.eq_ignore_ascii_case("pdf"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Save the checkpoint when the process is interrupted.
fn spawn_checkpoint_on_interrupt(ledger: Arc<Mutex<ProgressLedger>>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            if let Ok(mut ledger) = ledger.lock() {
                if let Err(e) = ledger.save() {
                    eprintln!("checkpoint save on interrupt failed: {}", e);
                }
            }
            eprintln!("interrupted, checkpoint saved");
            std::process::exit(130);
        }
    });
}
