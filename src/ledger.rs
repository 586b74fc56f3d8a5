//! Batch progress ledger: checkpoint file + failure log.
//!
//! The ledger records which files have been extracted, which are awaiting
//! insert, and which are done, so an interrupted batch can resume without
//! redoing work. The checkpoint is the complete state as JSON, written to a
//! temp file, fsynced, and atomically renamed; a backup copy is refreshed
//! every fixed number of saves. Failures go to an append-only CSV, one row
//! per failed file. Failed files count as processed: they are only
//! revisited through an explicit retry run.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::models::{BatchStats, FailureRecord};

/// Refresh the backup checkpoint every this many saves.
const BACKUP_INTERVAL: u64 = 50;

/// Complete checkpoint state. Everything needed to resume lives here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressState {
    pub job_name: String,
    pub processed_files: BTreeSet<String>,
    pub extracted_files: BTreeSet<String>,
    pub pending_inserts: BTreeSet<String>,
    pub stats: BatchStats,
    pub total_files: u64,
    pub processed_count: u64,
    pub last_updated: String,
}

pub struct ProgressLedger {
    state: ProgressState,
    checkpoint_path: PathBuf,
    backup_path: PathBuf,
    tmp_path: PathBuf,
    failed_path: PathBuf,
    saves: u64,
}

impl ProgressLedger {
    /// Start a fresh ledger. A missing job name becomes a timestamped one.
    pub fn new(ledger_dir: &Path, job_name: Option<String>, total_files: u64) -> Result<Self> {
        std::fs::create_dir_all(ledger_dir)
            .with_context(|| format!("Failed to create ledger dir: {}", ledger_dir.display()))?;
        let job_name =
            job_name.unwrap_or_else(|| Utc::now().format("batch_%Y%m%d_%H%M%S").to_string());
        let state = ProgressState {
            job_name: job_name.clone(),
            processed_files: BTreeSet::new(),
            extracted_files: BTreeSet::new(),
            pending_inserts: BTreeSet::new(),
            stats: BatchStats::default(),
            total_files,
            processed_count: 0,
            last_updated: Utc::now().to_rfc3339(),
        };
        Ok(Self::with_paths(ledger_dir, state))
    }

    /// Resume from an existing checkpoint file.
    pub fn resume(checkpoint: &Path, total_files: u64) -> Result<Self> {
        let content = std::fs::read_to_string(checkpoint)
            .with_context(|| format!("Failed to read checkpoint: {}", checkpoint.display()))?;
        let mut state: ProgressState =
            serde_json::from_str(&content).context("Malformed checkpoint file")?;
        state.total_files = total_files.max(state.total_files);
        let dir = checkpoint
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(Self::with_paths(&dir, state))
    }

    fn with_paths(ledger_dir: &Path, state: ProgressState) -> Self {
        let job = &state.job_name;
        Self {
            checkpoint_path: ledger_dir.join(format!("checkpoint_{}.json", job)),
            backup_path: ledger_dir.join(format!("checkpoint_{}.backup.json", job)),
            tmp_path: ledger_dir.join(format!("checkpoint_{}.tmp", job)),
            failed_path: ledger_dir.join(format!("failed_{}.csv", job)),
            state,
            saves: 0,
        }
    }

    pub fn job_name(&self) -> &str {
        &self.state.job_name
    }

    pub fn stats(&self) -> &BatchStats {
        &self.state.stats
    }

    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint_path
    }

    pub fn failed_log_path(&self) -> &Path {
        &self.failed_path
    }

    /// Record a successful extraction: the file now awaits insert.
    pub fn mark_extracted(&mut self, path: &Path) -> Result<()> {
        let key = normalize(path);
        self.state.extracted_files.insert(key.clone());
        self.state.pending_inserts.insert(key);
        self.save()
    }

    /// Record a completed insert. `was_new` distinguishes inserts from
    /// duplicate updates in the stats.
    pub fn mark_success(&mut self, path: &Path, was_new: bool) -> Result<()> {
        let key = normalize(path);
        self.state.pending_inserts.remove(&key);
        if self.state.processed_files.insert(key) {
            self.state.processed_count += 1;
        }
        self.state.stats.extracted += 1;
        if was_new {
            self.state.stats.inserted += 1;
        } else {
            self.state.stats.duplicates += 1;
        }
        self.save()
    }

    /// Record a terminal failure at the given stage and append it to the
    /// failure log. The file counts as processed.
    pub fn mark_failed(&mut self, record: &FailureRecord) -> Result<()> {
        let key = normalize(Path::new(&record.file_path));
        self.state.pending_inserts.remove(&key);
        if self.state.processed_files.insert(key) {
            self.state.processed_count += 1;
        }
        if record.stage == "insert" {
            self.state.stats.failed_insert += 1;
        } else {
            self.state.stats.failed_extraction += 1;
        }
        self.append_failure(record)?;
        self.save()
    }

    /// Input files minus the processed set, path-normalized.
    pub fn unprocessed<'a>(&self, files: &'a [PathBuf]) -> Vec<&'a PathBuf> {
        files
            .iter()
            .filter(|f| !self.state.processed_files.contains(&normalize(f)))
            .collect()
    }

    /// Write the checkpoint: temp file, fsync, atomic rename. A failure in
    /// the atomic path falls back to writing the checkpoint directly.
    pub fn save(&mut self) -> Result<()> {
        self.state.last_updated = Utc::now().to_rfc3339();
        let json = serde_json::to_string_pretty(&self.state)?;

        match self.write_atomic(&json) {
            Ok(()) => {}
            Err(e) => {
                warn!(error = %e, "atomic checkpoint write failed, writing directly");
                std::fs::write(&self.checkpoint_path, &json)
                    .context("Direct checkpoint write failed")?;
            }
        }

        self.saves += 1;
        if self.saves % BACKUP_INTERVAL == 0 {
            if let Err(e) = std::fs::copy(&self.checkpoint_path, &self.backup_path) {
                warn!(error = %e, "checkpoint backup copy failed");
            }
        }
        Ok(())
    }

    fn write_atomic(&self, json: &str) -> Result<()> {
        let mut file = std::fs::File::create(&self.tmp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&self.tmp_path, &self.checkpoint_path)?;
        Ok(())
    }

    fn append_failure(&self, record: &FailureRecord) -> Result<()> {
        let new_file = !self.failed_path.exists();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.failed_path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(new_file)
            .from_writer(file);
        let mut clipped = record.clone();
        if clipped.error.chars().count() > 500 {
            clipped.error = clipped.error.chars().take(500).collect();
        }
        writer.serialize(&clipped)?;
        writer.flush()?;
        Ok(())
    }

    /// Print the end-of-run summary in the house style.
    pub fn finish(&mut self, elapsed: std::time::Duration) -> Result<()> {
        self.save()?;
        let stats = &self.state.stats;
        println!("batch {}", self.state.job_name);
        println!("  total files: {}", self.state.total_files);
        println!("  extracted: {}", stats.extracted);
        println!("  inserted: {}", stats.inserted);
        println!("  duplicates updated: {}", stats.duplicates);
        println!(
            "  failed: {} extraction, {} insert",
            stats.failed_extraction, stats.failed_insert
        );
        println!("  elapsed: {:.1}s", elapsed.as_secs_f64());
        if stats.failed_extraction + stats.failed_insert > 0 {
            println!(
                "  retry failures with: --retry-failed {}",
                self.failed_path.display()
            );
        }
        println!("ok");
        Ok(())
    }
}

/// Canonicalize when possible so resume matches across relative and
/// absolute invocations.
fn normalize(path: &Path) -> String {
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

/// Read a failure log and return the files that still exist on disk.
pub fn load_failed_files(csv_path: &Path) -> Result<Vec<PathBuf>> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("Failed to open failure log: {}", csv_path.display()))?;
    let mut files = Vec::new();
    for record in reader.deserialize() {
        let failure: FailureRecord = record.context("Malformed failure log row")?;
        let path = PathBuf::from(&failure.file_path);
        if path.exists() {
            files.push(path);
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger =
            ProgressLedger::new(dir.path(), Some("testjob".to_string()), 3).unwrap();
        ledger.mark_extracted(Path::new("/in/a.pdf")).unwrap();
        ledger.mark_success(Path::new("/in/a.pdf"), true).unwrap();
        ledger
            .mark_failed(&FailureRecord {
                timestamp: Utc::now().to_rfc3339(),
                file_path: "/in/b.pdf".to_string(),
                stage: "extraction".to_string(),
                error: "text too short".to_string(),
                case_number: "123".to_string(),
                case_title: "".to_string(),
            })
            .unwrap();

        let resumed = ProgressLedger::resume(ledger.checkpoint_path(), 3).unwrap();
        assert_eq!(resumed.job_name(), "testjob");
        assert_eq!(resumed.stats().inserted, 1);
        assert_eq!(resumed.stats().failed_extraction, 1);

        let files = vec![
            PathBuf::from("/in/a.pdf"),
            PathBuf::from("/in/b.pdf"),
            PathBuf::from("/in/c.pdf"),
        ];
        let remaining = resumed.unprocessed(&files);
        assert_eq!(remaining, vec![&PathBuf::from("/in/c.pdf")]);
    }

    #[test]
    fn failure_log_round_trip_filters_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("real.pdf");
        std::fs::write(&existing, b"x").unwrap();

        let mut ledger = ProgressLedger::new(dir.path(), Some("j".to_string()), 2).unwrap();
        for path in [existing.to_string_lossy().into_owned(), "/gone/x.pdf".to_string()] {
            ledger
                .mark_failed(&FailureRecord {
                    timestamp: Utc::now().to_rfc3339(),
                    file_path: path,
                    stage: "insert".to_string(),
                    error: "db locked".to_string(),
                    case_number: "".to_string(),
                    case_title: "".to_string(),
                })
                .unwrap();
        }

        let files = load_failed_files(ledger.failed_log_path()).unwrap();
        assert_eq!(files, vec![existing]);
    }

    #[test]
    fn duplicate_success_counts_once_in_processed() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = ProgressLedger::new(dir.path(), Some("j2".to_string()), 1).unwrap();
        ledger.mark_success(Path::new("/in/a.pdf"), true).unwrap();
        ledger.mark_success(Path::new("/in/a.pdf"), false).unwrap();
        let content = std::fs::read_to_string(ledger.checkpoint_path()).unwrap();
        let state: ProgressState = serde_json::from_str(&content).unwrap();
        assert_eq!(state.processed_count, 1);
        assert_eq!(state.stats.inserted, 1);
        assert_eq!(state.stats.duplicates, 1);
    }

    #[test]
    fn long_errors_are_truncated_in_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = ProgressLedger::new(dir.path(), Some("j3".to_string()), 1).unwrap();
        ledger
            .mark_failed(&FailureRecord {
                timestamp: Utc::now().to_rfc3339(),
                file_path: "/in/a.pdf".to_string(),
                stage: "extraction".to_string(),
                error: "e".repeat(2000),
                case_number: "".to_string(),
                case_title: "".to_string(),
            })
            .unwrap();
        let content = std::fs::read_to_string(ledger.failed_log_path()).unwrap();
        assert!(content.len() < 1000);
    }

    #[test]
    fn multibyte_errors_clip_on_character_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = ProgressLedger::new(dir.path(), Some("j4".to_string()), 1).unwrap();
        ledger
            .mark_failed(&FailureRecord {
                timestamp: Utc::now().to_rfc3339(),
                file_path: "/in/a.pdf".to_string(),
                stage: "extraction".to_string(),
                error: "\u{20ac}".repeat(800),
                case_number: "".to_string(),
                case_title: "".to_string(),
            })
            .unwrap();
        let content = std::fs::read_to_string(ledger.failed_log_path()).unwrap();
        assert_eq!(content.matches('\u{20ac}').count(), 500);
    }
}
