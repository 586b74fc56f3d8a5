//! Case assembly: one PDF in, one [`CaseRecord`] out.
//!
//! Resolves metadata, extracts text, runs the county pre-extraction over
//! the untruncated text, calls the language model, and merges the results.
//! Assembly never returns an error: any failure is folded into a record
//! with `extraction_ok = false` so the batch layer can persist and report it.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use tracing::{info, warn};

use crate::config::Config;
use crate::extract::TextExtractor;
use crate::llm;
use crate::models::{CaseMetadata, CaseRecord, Judge};

/// The 39 Washington counties, lowercase.
const WASHINGTON_COUNTIES: &[&str] = &[
    "adams",
    "asotin",
    "benton",
    "chelan",
    "clark",
    "clallam",
    "columbia",
    "cowlitz",
    "douglas",
    "ferry",
    "franklin",
    "garfield",
    "grant",
    "grays harbor",
    "island",
    "jefferson",
    "king",
    "kitsap",
    "kittitas",
    "klickitat",
    "lewis",
    "lincoln",
    "mason",
    "okanogan",
    "pacific",
    "pend oreille",
    "pierce",
    "san juan",
    "skagit",
    "skamania",
    "snohomish",
    "spokane",
    "stevens",
    "thurston",
    "wahkiakum",
    "walla walla",
    "whatcom",
    "whitman",
    "yakima",
];

/// Contexts in which a county name counts as the originating county,
/// most specific first.
const COUNTY_CONTEXTS: &[&str] = &[
    r"\b{c} county superior court\b",
    r"\bappeal from {c} county\b",
    r"\bfrom {c} county superior court\b",
    r"\bin {c} county\b",
    r"\bof {c} county\b",
    r"\b{c} county\b",
];

/// How far into the text the county search looks.
const COUNTY_SEARCH_CHARS: usize = 15_000;

static COUNTY_PATTERNS: Lazy<Vec<(String, Vec<Regex>)>> = Lazy::new(|| {
    WASHINGTON_COUNTIES
        .iter()
        .map(|county| {
            let patterns = COUNTY_CONTEXTS
                .iter()
                .map(|ctx| {
                    let pattern = ctx.replace("{c}", county);
                    Regex::new(&pattern)
                        .unwrap_or_else(|e| panic!("bad county pattern {}: {}", pattern, e))
                })
                .collect();
            (title_case(county), patterns)
        })
        .collect()
});

fn title_case(name: &str) -> String {
    name.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Find the originating county by direct pattern match over the opinion
/// head. Runs on untruncated text, so it catches counties the model loses
/// to truncation. Context patterns are tried in specificity order.
pub fn county_from_text(text: &str) -> Option<String> {
    let head: String = text.chars().take(COUNTY_SEARCH_CHARS).collect::<String>().to_lowercase();
    for ctx_idx in 0..COUNTY_CONTEXTS.len() {
        for (county, patterns) in COUNTY_PATTERNS.iter() {
            if patterns[ctx_idx].is_match(&head) {
                return Some(county.clone());
            }
        }
    }
    None
}

/// Assemble a case from its PDF. Failures produce a failed record, never
/// an error.
pub async fn assemble_case(
    config: &Config,
    extractor: &TextExtractor,
    metadata: CaseMetadata,
    path: &Path,
) -> CaseRecord {
    let file_size = std::fs::metadata(path).map(|m| m.len() as i64).ok();

    let extracted = match extractor.extract(path).await {
        Ok(e) => e,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "text extraction failed");
            return failed_record(metadata, path, file_size, format!("text extraction failed: {}", e));
        }
    };

    if extracted.text.trim().len() < 100 {
        return failed_record(
            metadata,
            path,
            file_size,
            format!(
                "extracted text too short ({} chars)",
                extracted.text.trim().len()
            ),
        );
    }

    let pre_county = county_from_text(&extracted.text);

    let llm_case = match llm::extract_case(&config.model, &extracted.text).await {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "structured extraction failed");
            let mut record =
                failed_record(metadata, path, file_size, format!("structured extraction failed: {}", e));
            record.full_text = extracted.text;
            record.page_count = extracted.pages;
            record.county = pre_county;
            return record;
        }
    };

    info!(
        case = %metadata.case_number,
        parties = llm_case.parties.len(),
        issues = llm_case.issues.len(),
        "case assembled"
    );

    let mut judges = llm_case.judges;
    if let Some(trial_judge) = &llm_case.trial_judge {
        if !judges.iter().any(|j| j.name == *trial_judge) {
            judges.push(Judge {
                name: trial_judge.clone(),
                role: Some("trial".to_string()),
            });
        }
    }

    CaseRecord {
        metadata,
        full_text: extracted.text,
        page_count: extracted.pages,
        file_size,
        source_file_path: path.to_string_lossy().into_owned(),
        summary: llm_case.summary,
        case_type: llm_case.case_type,
        // The direct pattern match beats the model's guess
        county: pre_county.or(llm_case.county),
        trial_court: llm_case.trial_court,
        trial_judge: llm_case.trial_judge,
        source_docket_number: llm_case.source_docket_number,
        opinion_filed_date: llm_case.opinion_filed_date,
        appeal_outcome: llm_case.appeal_outcome,
        outcome_detail: llm_case.outcome_detail,
        winner_legal_role: llm_case.winner_legal_role,
        winner_personal_role: llm_case.winner_personal_role,
        parties: llm_case.parties,
        attorneys: llm_case.attorneys,
        judges,
        citations: llm_case.citations,
        statutes: llm_case.statutes,
        issues: llm_case.issues,
        extraction_ok: true,
        error_message: None,
        extraction_model: Some(config.model.model.clone()),
        extraction_timestamp: Some(Utc::now()),
    }
}

fn failed_record(
    metadata: CaseMetadata,
    path: &Path,
    file_size: Option<i64>,
    error: String,
) -> CaseRecord {
    CaseRecord {
        metadata,
        source_file_path: path.to_string_lossy().into_owned(),
        file_size,
        extraction_ok: false,
        error_message: Some(error),
        extraction_timestamp: Some(Utc::now()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn county_found_in_superior_court_context() {
        let text = "Appeal from the judgment of the Spokane County Superior Court, entered May 1.";
        assert_eq!(county_from_text(text), Some("Spokane".to_string()));
    }

    #[test]
    fn two_word_counties_match() {
        let text = "On appeal from Walla Walla County Superior Court.";
        assert_eq!(county_from_text(text), Some("Walla Walla".to_string()));
    }

    #[test]
    fn specific_context_beats_bare_mention() {
        // "King County" appears first, but the superior court context for
        // Pierce is more specific and wins
        let text = "The King County facility records were admitted. \
                    This matter comes before us on appeal from the Pierce County Superior Court.";
        assert_eq!(county_from_text(text), Some("Pierce".to_string()));
    }

    #[test]
    fn no_county_yields_none() {
        assert_eq!(county_from_text("No geographic references appear here."), None);
    }

    #[test]
    fn county_beyond_search_window_is_missed() {
        let mut text = "word ".repeat(4000);
        text.push_str("appeal from King County Superior Court");
        assert_eq!(county_from_text(&text), None);
    }
}
