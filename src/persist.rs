//! Transactional case persistence.
//!
//! One transaction per case, keyed by the natural key
//! `(case_file_id, court_level)`. Re-ingesting a case deletes its child
//! rows and rewrites them, so the latest extraction always wins and partial
//! writes never survive a crash. Dimension and judge lookups run before the
//! transaction opens; they are idempotent and shared across cases.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::debug;

use crate::dimensions::DimensionResolver;
use crate::models::CaseRecord;

static STATUTE_RE: Lazy<Regex> = Lazy::new(|| {
    // Title (9, 9A, 26), dotted section, optional parenthesized subsections
    Regex::new(r"^(RCW)\s+(\d+[A-Za-z]?)\.([0-9A-Za-z.]+?)((?:\([^)]+\))+)?$").unwrap()
});

/// Insert or replace a case and all of its children.
/// Returns `(case_id, was_new_insert)`.
pub async fn insert_case(
    pool: &SqlitePool,
    dims: &DimensionResolver,
    record: &CaseRecord,
) -> Result<(i64, bool)> {
    let meta = &record.metadata;

    // Derived display fields
    let division_display = meta.division.as_ref().map(|d| format!("Division {}", d));
    let court = build_court_name(&meta.court_level, meta.division.as_deref());
    let docket_number = match &meta.division {
        Some(d) => format!("{}-{}", meta.case_number, d),
        None => meta.case_number.clone(),
    };
    let filed_date = record
        .opinion_filed_date
        .clone()
        .or_else(|| meta.file_date.clone());
    let (decision_year, decision_month) = parse_year_month(filed_date.as_deref());
    let publication_status = meta
        .publication_status
        .clone()
        .unwrap_or_else(|| "Published".to_string());
    let published = is_published(&publication_status);
    let processing_status = if record.extraction_ok {
        "ai_processed"
    } else {
        "failed"
    };
    let title = meta
        .title
        .clone()
        .or_else(|| Some(meta.pdf_filename.clone()))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Unknown".to_string());

    // Resolve shared dimensions outside the write transaction
    let court_id = dims.court_id(&court, &meta.court_level).await?;
    let case_type_id = dims
        .case_type_id(record.case_type.as_deref().unwrap_or("Other"))
        .await?;
    let stage_type_id = dims.stage_type_id("appeal").await?;
    let document_type_id = dims.document_type_id("Opinion").await?;

    let mut judge_links: Vec<(i64, Option<String>)> = Vec::new();
    for judge in &record.judges {
        let judge_id = get_or_create_judge(pool, &judge.name).await?;
        judge_links.push((judge_id, judge.role.clone()));
    }

    let mut statute_links: Vec<(i64, String)> = Vec::new();
    for statute in &record.statutes {
        if let Some(statute_id) = resolve_statute(pool, &statute.raw_text).await? {
            statute_links.push((statute_id, statute.raw_text.clone()));
        }
    }

    let mut issue_taxonomies: Vec<i64> = Vec::new();
    for issue in &record.issues {
        issue_taxonomies.push(dims.taxonomy_id(&issue.category, &issue.subcategory).await?);
    }

    let mut tx = pool.begin().await?;

    // Existing id lookup decides insert vs replace
    let existing_id: Option<i64> = sqlx::query_scalar(
        "SELECT case_id FROM cases WHERE case_file_id = ? AND court_level = ?",
    )
    .bind(&meta.case_number)
    .bind(&meta.court_level)
    .fetch_optional(&mut *tx)
    .await?;
    let was_new = existing_id.is_none();

    if let Some(case_id) = existing_id {
        clear_children(&mut tx, case_id).await?;
    }

    sqlx::query(
        r#"
        INSERT INTO cases (
            case_file_id, title, court_level, court, district, county,
            docket_number, source_docket_number, filed_date, published,
            publication_status, decision_year, decision_month, summary,
            full_text, source_url, case_info_url, case_type, appeal_outcome,
            outcome_detail, winner_legal_role, winner_personal_role,
            trial_court, trial_judge, source_file, source_file_path,
            court_id, case_type_id, stage_type_id, extraction_model,
            extraction_timestamp, processing_status, error_message
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(case_file_id, court_level) DO UPDATE SET
            title = excluded.title,
            court = excluded.court,
            district = excluded.district,
            county = excluded.county,
            docket_number = excluded.docket_number,
            source_docket_number = excluded.source_docket_number,
            filed_date = excluded.filed_date,
            published = excluded.published,
            publication_status = excluded.publication_status,
            decision_year = excluded.decision_year,
            decision_month = excluded.decision_month,
            summary = excluded.summary,
            full_text = excluded.full_text,
            source_url = excluded.source_url,
            case_info_url = excluded.case_info_url,
            case_type = excluded.case_type,
            appeal_outcome = excluded.appeal_outcome,
            outcome_detail = excluded.outcome_detail,
            winner_legal_role = excluded.winner_legal_role,
            winner_personal_role = excluded.winner_personal_role,
            trial_court = excluded.trial_court,
            trial_judge = excluded.trial_judge,
            source_file = excluded.source_file,
            source_file_path = excluded.source_file_path,
            court_id = excluded.court_id,
            case_type_id = excluded.case_type_id,
            stage_type_id = excluded.stage_type_id,
            extraction_model = excluded.extraction_model,
            extraction_timestamp = excluded.extraction_timestamp,
            processing_status = excluded.processing_status,
            error_message = excluded.error_message
        "#,
    )
    .bind(&meta.case_number)
    .bind(&title)
    .bind(&meta.court_level)
    .bind(&court)
    .bind(&division_display)
    .bind(&record.county)
    .bind(&docket_number)
    .bind(&record.source_docket_number)
    .bind(&filed_date)
    .bind(published)
    .bind(&publication_status)
    .bind(decision_year)
    .bind(decision_month)
    .bind(&record.summary)
    .bind(&record.full_text)
    .bind(&meta.pdf_url)
    .bind(&meta.case_info_url)
    .bind(&record.case_type)
    .bind(&record.appeal_outcome)
    .bind(&record.outcome_detail)
    .bind(&record.winner_legal_role)
    .bind(&record.winner_personal_role)
    .bind(&record.trial_court)
    .bind(&record.trial_judge)
    .bind(&meta.pdf_filename)
    .bind(&record.source_file_path)
    .bind(court_id)
    .bind(case_type_id)
    .bind(stage_type_id)
    .bind(&record.extraction_model)
    .bind(record.extraction_timestamp.map(|t| t.to_rfc3339()))
    .bind(processing_status)
    .bind(&record.error_message)
    .execute(&mut *tx)
    .await?;

    let case_id: i64 = match existing_id {
        Some(id) => id,
        None => sqlx::query_scalar(
            "SELECT case_id FROM cases WHERE case_file_id = ? AND court_level = ?",
        )
        .bind(&meta.case_number)
        .bind(&meta.court_level)
        .fetch_one(&mut *tx)
        .await?,
    };

    sqlx::query(
        r#"
        INSERT INTO documents (case_id, title, source_url, page_count, file_size,
                               processing_status, stage_type_id, document_type_id)
        VALUES (?, ?, ?, ?, ?, 'completed', ?, ?)
        "#,
    )
    .bind(case_id)
    .bind(&title)
    .bind(&meta.pdf_url)
    .bind(record.page_count)
    .bind(record.file_size)
    .bind(stage_type_id)
    .bind(document_type_id)
    .execute(&mut *tx)
    .await?;

    for party in &record.parties {
        sqlx::query(
            "INSERT INTO parties (case_id, name, legal_role, personal_role, party_type) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(case_id)
        .bind(&party.name)
        .bind(&party.legal_role)
        .bind(&party.personal_role)
        .bind(&party.party_type)
        .execute(&mut *tx)
        .await?;
    }

    for attorney in &record.attorneys {
        sqlx::query(
            "INSERT INTO attorneys (case_id, name, firm_name, representing) VALUES (?, ?, ?, ?)",
        )
        .bind(case_id)
        .bind(&attorney.name)
        .bind(&attorney.firm_name)
        .bind(&attorney.representing)
        .execute(&mut *tx)
        .await?;
    }

    for (judge_id, role) in &judge_links {
        sqlx::query(
            "INSERT OR IGNORE INTO case_judges (case_id, judge_id, role) VALUES (?, ?, ?)",
        )
        .bind(case_id)
        .bind(judge_id)
        .bind(role)
        .execute(&mut *tx)
        .await?;
    }

    for citation in &record.citations {
        sqlx::query(
            "INSERT OR IGNORE INTO citation_edges (source_case_id, target_case_citation, relationship) VALUES (?, ?, ?)",
        )
        .bind(case_id)
        .bind(&citation.target)
        .bind(&citation.relationship)
        .execute(&mut *tx)
        .await?;
    }

    for (statute_id, raw_text) in &statute_links {
        sqlx::query(
            "INSERT INTO statute_citations (case_id, statute_id, raw_text) VALUES (?, ?, ?)",
        )
        .bind(case_id)
        .bind(statute_id)
        .bind(raw_text)
        .execute(&mut *tx)
        .await?;
    }

    for (issue, taxonomy_id) in record.issues.iter().zip(&issue_taxonomies) {
        let rcw_reference = issue.rcw_references.first().cloned();
        let inserted = sqlx::query(
            r#"
            INSERT INTO issues_decisions (
                case_id, taxonomy_id, issue_summary, rcw_reference, keywords,
                decision_stage, decision_summary, appeal_outcome,
                winner_legal_role, winner_personal_role, confidence_score
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(case_id)
        .bind(taxonomy_id)
        .bind(&issue.issue_summary)
        .bind(&rcw_reference)
        .bind(&issue.keywords)
        .bind(&issue.decision_stage)
        .bind(&issue.decision_summary)
        .bind(&issue.appeal_outcome)
        .bind(&issue.winner_legal_role)
        .bind(&issue.winner_personal_role)
        .bind(issue.confidence_score)
        .execute(&mut *tx)
        .await?;
        let issue_id = inserted.last_insert_rowid();

        for (side, argument) in [
            ("appellant", &issue.appellant_argument),
            ("respondent", &issue.respondent_argument),
        ] {
            if let Some(text) = argument {
                sqlx::query(
                    "INSERT INTO arguments (case_id, issue_id, side, argument_text) VALUES (?, ?, ?, ?)",
                )
                .bind(case_id)
                .bind(issue_id)
                .bind(side)
                .bind(text)
                .execute(&mut *tx)
                .await?;
            }
        }
    }

    tx.commit().await?;
    Ok((case_id, was_new))
}

/// Delete every child row of a case before rewriting it.
async fn clear_children(tx: &mut Transaction<'_, Sqlite>, case_id: i64) -> Result<()> {
    for sql in [
        "DELETE FROM arguments WHERE case_id = ?",
        "DELETE FROM issues_decisions WHERE case_id = ?",
        "DELETE FROM statute_citations WHERE case_id = ?",
        "DELETE FROM citation_edges WHERE source_case_id = ?",
        "DELETE FROM case_judges WHERE case_id = ?",
        "DELETE FROM attorneys WHERE case_id = ?",
        "DELETE FROM parties WHERE case_id = ?",
        "DELETE FROM documents WHERE case_id = ?",
        "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT chunk_id FROM case_chunks WHERE case_id = ?)",
        "DELETE FROM case_sentences WHERE chunk_id IN (SELECT chunk_id FROM case_chunks WHERE case_id = ?)",
        "DELETE FROM sentences_fts WHERE case_id = ?",
        "DELETE FROM case_phrases WHERE case_id = ?",
        "DELETE FROM case_chunks WHERE case_id = ?",
    ] {
        sqlx::query(sql).bind(case_id).execute(&mut **tx).await?;
    }
    Ok(())
}

async fn get_or_create_judge(pool: &SqlitePool, name: &str) -> Result<i64> {
    sqlx::query("INSERT OR IGNORE INTO judges (name) VALUES (?)")
        .bind(name)
        .execute(pool)
        .await?;
    let id: i64 = sqlx::query_scalar("SELECT judge_id FROM judges WHERE name = ?")
        .bind(name)
        .fetch_one(pool)
        .await?;
    Ok(id)
}

/// Resolve a raw statute citation to a `statutes_dim` row, parsing it into
/// code/title/section/subsection. Match order: exact with subsection, exact
/// section, section prefix, then create. Unparseable citations are skipped.
async fn resolve_statute(pool: &SqlitePool, raw: &str) -> Result<Option<i64>> {
    let caps = match STATUTE_RE.captures(raw.trim()) {
        Some(c) => c,
        None => {
            debug!(citation = raw, "unparseable statute citation skipped");
            return Ok(None);
        }
    };
    let code = &caps[1];
    let title_num = &caps[2];
    let section = &caps[3];
    let subsection = caps.get(4).map(|m| m.as_str().to_string());

    if let Some(sub) = &subsection {
        let id: Option<i64> = sqlx::query_scalar(
            "SELECT statute_id FROM statutes_dim WHERE code = ? AND title_num = ? AND section = ? AND subsection = ?",
        )
        .bind(code)
        .bind(title_num)
        .bind(section)
        .bind(sub)
        .fetch_optional(pool)
        .await?;
        if let Some(id) = id {
            return Ok(Some(id));
        }
    }

    let id: Option<i64> = sqlx::query_scalar(
        "SELECT statute_id FROM statutes_dim WHERE code = ? AND title_num = ? AND section = ? AND subsection IS NULL",
    )
    .bind(code)
    .bind(title_num)
    .bind(section)
    .fetch_optional(pool)
    .await?;
    if let Some(id) = id {
        return Ok(Some(id));
    }

    let id: Option<i64> = sqlx::query_scalar(
        "SELECT statute_id FROM statutes_dim WHERE code = ? AND title_num = ? AND section LIKE ? || '%' LIMIT 1",
    )
    .bind(code)
    .bind(title_num)
    .bind(section)
    .fetch_optional(pool)
    .await?;
    if let Some(id) = id {
        return Ok(Some(id));
    }

    let display_text = format!(
        "{} {}.{}{}",
        code,
        title_num,
        section,
        subsection.as_deref().unwrap_or("")
    );
    sqlx::query(
        "INSERT OR IGNORE INTO statutes_dim (code, title_num, section, subsection, display_text) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(code)
    .bind(title_num)
    .bind(section)
    .bind(&subsection)
    .bind(&display_text)
    .execute(pool)
    .await?;
    let id: i64 = sqlx::query_scalar(
        "SELECT statute_id FROM statutes_dim WHERE code = ? AND title_num = ? AND section = ? AND COALESCE(subsection, '') = COALESCE(?, '')",
    )
    .bind(code)
    .bind(title_num)
    .bind(section)
    .bind(&subsection)
    .fetch_one(pool)
    .await?;
    Ok(Some(id))
}

fn build_court_name(court_level: &str, division: Option<&str>) -> String {
    let lower = court_level.to_lowercase();
    if lower.contains("supreme") {
        "Washington State Supreme Court".to_string()
    } else if lower.contains("appeals") {
        match division {
            Some(d) => format!("Washington Court of Appeals Division {}", d),
            None => "Washington Court of Appeals".to_string(),
        }
    } else {
        court_level.to_string()
    }
}

fn parse_year_month(date: Option<&str>) -> (Option<i64>, Option<i64>) {
    let date = match date {
        Some(d) => d,
        None => return (None, None),
    };
    let mut parts = date.split('-');
    let year = parts.next().and_then(|y| y.parse().ok());
    let month = parts.next().and_then(|m| m.parse().ok());
    (year, month)
}

fn is_published(status: &str) -> bool {
    let lower = status.to_lowercase();
    !lower.contains("unpublished") && lower.contains("published")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statute_regex_parses_subsections() {
        let caps = STATUTE_RE.captures("RCW 9A.36.021(1)(c)").unwrap();
        assert_eq!(&caps[1], "RCW");
        assert_eq!(&caps[2], "9A");
        assert_eq!(&caps[3], "36.021");
        assert_eq!(caps.get(4).unwrap().as_str(), "(1)(c)");
    }

    #[test]
    fn statute_regex_without_subsection() {
        let caps = STATUTE_RE.captures("RCW 26.09.187").unwrap();
        assert_eq!(&caps[2], "26");
        assert_eq!(&caps[3], "09.187");
        assert!(caps.get(4).is_none());
    }

    #[test]
    fn statute_regex_rejects_non_rcw() {
        assert!(STATUTE_RE.captures("WAC 388-14A-3370").is_none());
        assert!(STATUTE_RE.captures("former RCW 9.94A.030").is_none());
    }

    #[test]
    fn court_names_from_level() {
        assert_eq!(
            build_court_name("Supreme Court", None),
            "Washington State Supreme Court"
        );
        assert_eq!(
            build_court_name("Court of Appeals", Some("II")),
            "Washington Court of Appeals Division II"
        );
        assert_eq!(build_court_name("Unknown", None), "Unknown");
    }

    #[test]
    fn year_month_from_iso_date() {
        assert_eq!(parse_year_month(Some("2024-03-14")), (Some(2024), Some(3)));
        assert_eq!(parse_year_month(Some("2024")), (Some(2024), None));
        assert_eq!(parse_year_month(None), (None, None));
    }

    #[test]
    fn unpublished_is_not_published() {
        assert!(is_published("Published"));
        assert!(is_published("Published Opinion"));
        assert!(!is_published("Unpublished"));
        assert!(!is_published("Order"));
    }
}
