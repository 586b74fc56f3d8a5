//! Core data models for the opinion ingestion pipeline.
//!
//! These types represent a case as it moves through the pipeline: manifest
//! metadata, the structured extraction produced by the language model, the
//! assembled case record, and the chunk/sentence units produced by indexing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata known about a case before its PDF is opened.
///
/// Comes from a manifest row when one exists, otherwise inferred from the
/// filename (`39300-3_III.pdf` → case number `39300-3`, division `III`).
#[derive(Debug, Clone, Default)]
pub struct CaseMetadata {
    pub case_number: String,
    pub division: Option<String>,
    pub title: Option<String>,
    pub opinion_type: Option<String>,
    pub court_level: String,
    pub publication_status: Option<String>,
    pub file_date: Option<String>,
    pub pdf_url: Option<String>,
    pub case_info_url: Option<String>,
    pub pdf_filename: String,
}

/// A party to the case (e.g. "Smith, Appellant (Plaintiff)").
#[derive(Debug, Clone, Default)]
pub struct Party {
    pub name: String,
    pub legal_role: Option<String>,
    pub personal_role: Option<String>,
    pub party_type: Option<String>,
}

/// Counsel of record.
#[derive(Debug, Clone, Default)]
pub struct Attorney {
    pub name: String,
    pub firm_name: Option<String>,
    pub representing: Option<String>,
}

/// A judge on the panel (or the trial judge). Judges are deduplicated by
/// name in a shared dimension table; `role` is per-case.
#[derive(Debug, Clone, Default)]
pub struct Judge {
    pub name: String,
    pub role: Option<String>,
}

/// A citation from this case to another case.
#[derive(Debug, Clone)]
pub struct Citation {
    pub target: String,
    pub relationship: String,
}

/// A statute reference as extracted (raw text, e.g. "RCW 9A.36.021(1)(c)").
#[derive(Debug, Clone)]
pub struct StatuteRef {
    pub raw_text: String,
}

/// One legal issue decided by the opinion, with its taxonomy placement.
#[derive(Debug, Clone, Default)]
pub struct Issue {
    pub category: String,
    pub subcategory: String,
    pub issue_summary: Option<String>,
    pub decision_summary: Option<String>,
    pub appeal_outcome: Option<String>,
    pub winner_legal_role: Option<String>,
    pub winner_personal_role: Option<String>,
    pub keywords: Option<String>,
    pub rcw_references: Vec<String>,
    pub decision_stage: String,
    pub confidence_score: Option<f64>,
    pub appellant_argument: Option<String>,
    pub respondent_argument: Option<String>,
}

/// The fully assembled case: metadata + text + structured extraction.
///
/// A failed extraction still produces a record (with `extraction_ok = false`
/// and `error_message` set) so the failure is persisted and visible.
#[derive(Debug, Clone, Default)]
pub struct CaseRecord {
    pub metadata: CaseMetadata,
    pub full_text: String,
    pub page_count: Option<i64>,
    pub file_size: Option<i64>,
    pub source_file_path: String,

    pub summary: Option<String>,
    pub case_type: Option<String>,
    pub county: Option<String>,
    pub trial_court: Option<String>,
    pub trial_judge: Option<String>,
    pub source_docket_number: Option<String>,
    pub opinion_filed_date: Option<String>,
    pub appeal_outcome: Option<String>,
    pub outcome_detail: Option<String>,
    pub winner_legal_role: Option<String>,
    pub winner_personal_role: Option<String>,

    pub parties: Vec<Party>,
    pub attorneys: Vec<Attorney>,
    pub judges: Vec<Judge>,
    pub citations: Vec<Citation>,
    pub statutes: Vec<StatuteRef>,
    pub issues: Vec<Issue>,

    pub extraction_ok: bool,
    pub error_message: Option<String>,
    pub extraction_model: Option<String>,
    pub extraction_timestamp: Option<DateTime<Utc>>,
}

/// A section-labelled chunk of opinion text. Orders start at 1.
#[derive(Debug, Clone)]
pub struct TextChunk {
    pub chunk_order: i64,
    pub section: String,
    pub text: String,
    pub word_count: i64,
    pub hash: String,
}

/// A sentence within a chunk. `sentence_order` restarts per chunk;
/// `global_order` is strictly increasing across the whole case.
#[derive(Debug, Clone)]
pub struct Sentence {
    pub sentence_order: i64,
    pub global_order: i64,
    pub text: String,
    pub word_count: i64,
}

/// Counters reported by the indexing pass for one case.
#[derive(Debug, Clone, Default)]
pub struct IndexingStats {
    pub chunks_created: u64,
    pub sentences_created: u64,
    pub words_indexed: u64,
    pub phrases_extracted: u64,
    pub embeddings_generated: u64,
    pub errors: Vec<String>,
}

/// Aggregate counters carried in the batch checkpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchStats {
    pub extracted: u64,
    pub inserted: u64,
    pub duplicates: u64,
    pub failed_extraction: u64,
    pub failed_insert: u64,
}

/// One row of the append-only failure log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub timestamp: String,
    pub file_path: String,
    pub stage: String,
    pub error: String,
    pub case_number: String,
    pub case_title: String,
}
