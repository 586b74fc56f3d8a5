//! Post-ingest verification report.
//!
//! Prints everything stored for one case so an operator can eyeball an
//! ingestion: which columns came back populated, which are still NULL, and
//! how many child rows each satellite table holds. Used by `lexpipe verify`
//! after a suspicious or important ingest.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

/// Run the verify command: load one case and print a field-by-field report.
pub async fn run_verify(config: &Config, case_id: i64) -> Result<()> {
    let pool = db::connect(config).await?;

    let row = sqlx::query(
        r#"
        SELECT case_file_id, title, court_level, court, district, county,
               docket_number, filed_date, published, publication_status,
               decision_year, decision_month, summary, case_type,
               appeal_outcome, winner_legal_role, winner_personal_role,
               trial_judge, processing_status, error_message,
               extraction_model, extraction_timestamp,
               LENGTH(COALESCE(full_text, '')) AS text_chars
        FROM cases WHERE case_id = ?
        "#,
    )
    .bind(case_id)
    .fetch_optional(&pool)
    .await?;

    let Some(row) = row else {
        bail!("No case with id {}", case_id);
    };

    println!("Case {} — Verification Report", case_id);
    println!("=============================");
    println!();
    print_field("case_file_id", row.get::<Option<String>, _>("case_file_id"));
    print_field("title", row.get::<Option<String>, _>("title"));
    print_field("court_level", row.get::<Option<String>, _>("court_level"));
    print_field("court", row.get::<Option<String>, _>("court"));
    print_field("district", row.get::<Option<String>, _>("district"));
    print_field("county", row.get::<Option<String>, _>("county"));
    print_field("docket_number", row.get::<Option<String>, _>("docket_number"));
    print_field("filed_date", row.get::<Option<String>, _>("filed_date"));
    print_field(
        "published",
        Some(if row.get::<i64, _>("published") != 0 { "yes" } else { "no" }.to_string()),
    );
    print_field(
        "publication_status",
        row.get::<Option<String>, _>("publication_status"),
    );
    print_field(
        "decision_year",
        row.get::<Option<i64>, _>("decision_year").map(|y| y.to_string()),
    );
    print_field(
        "decision_month",
        row.get::<Option<i64>, _>("decision_month").map(|m| m.to_string()),
    );
    print_field("case_type", row.get::<Option<String>, _>("case_type"));
    print_field("appeal_outcome", row.get::<Option<String>, _>("appeal_outcome"));
    print_field(
        "winner_legal_role",
        row.get::<Option<String>, _>("winner_legal_role"),
    );
    print_field(
        "winner_personal_role",
        row.get::<Option<String>, _>("winner_personal_role"),
    );
    print_field("trial_judge", row.get::<Option<String>, _>("trial_judge"));
    print_field("summary", row.get::<Option<String>, _>("summary").map(clip));
    print_field(
        "full_text",
        Some(format!("{} chars", row.get::<i64, _>("text_chars"))),
    );
    print_field(
        "extraction_model",
        row.get::<Option<String>, _>("extraction_model"),
    );
    print_field(
        "extraction_timestamp",
        row.get::<Option<String>, _>("extraction_timestamp"),
    );
    print_field(
        "processing_status",
        row.get::<Option<String>, _>("processing_status"),
    );
    if let Some(error) = row.get::<Option<String>, _>("error_message") {
        print_field("error_message", Some(clip(error)));
    }

    println!();
    println!("  Child rows:");
    print_count(&pool, case_id, "documents", "documents").await?;
    print_count(&pool, case_id, "parties", "parties").await?;
    print_count(&pool, case_id, "attorneys", "attorneys").await?;
    print_count(&pool, case_id, "judges", "case_judges").await?;
    print_count(&pool, case_id, "citations", "citation_edges").await?;
    print_count(&pool, case_id, "statute citations", "statute_citations").await?;
    print_count(&pool, case_id, "issues", "issues_decisions").await?;
    print_count(&pool, case_id, "arguments", "arguments").await?;
    print_count(&pool, case_id, "chunks", "case_chunks").await?;

    let sentences: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM case_sentences s
        JOIN case_chunks c ON c.chunk_id = s.chunk_id
        WHERE c.case_id = ?
        "#,
    )
    .bind(case_id)
    .fetch_one(&pool)
    .await?;
    println!("    {:<20} {}", "sentences", sentences);

    print_count(&pool, case_id, "phrases", "case_phrases").await?;

    let vectors: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM chunk_vectors v
        JOIN case_chunks c ON c.chunk_id = v.chunk_id
        WHERE c.case_id = ?
        "#,
    )
    .bind(case_id)
    .fetch_one(&pool)
    .await?;
    println!("    {:<20} {}", "chunk vectors", vectors);

    println!();

    pool.close().await;
    Ok(())
}

fn print_field(name: &str, value: Option<String>) {
    match value {
        Some(v) if !v.is_empty() => println!("  \u{2713} {:<22} {}", name, v),
        _ => println!("  \u{25cb} {:<22} NULL", name),
    }
}

async fn print_count(
    pool: &SqlitePool,
    case_id: i64,
    label: &str,
    table: &str,
) -> Result<()> {
    let count: i64 =
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {} WHERE case_id = ?", table))
            .bind(case_id)
            .fetch_one(pool)
            .await?;
    println!("    {:<20} {}", label, count);
    Ok(())
}

fn clip(s: String) -> String {
    if s.chars().count() > 120 {
        let head: String = s.chars().take(117).collect();
        format!("{}...", head)
    } else {
        s
    }
}
