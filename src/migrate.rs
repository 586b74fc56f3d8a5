//! Idempotent schema migrations.
//!
//! Creates the case tables, child-entity tables, dimension tables, and the
//! lexical index (chunks, sentences, word dictionary, sentence FTS5, phrase
//! table, chunk vectors). Safe to run repeatedly.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    run_migrations_on(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Migration body, separated so tests can run it against a scratch pool.
pub async fn run_migrations_on(pool: &SqlitePool) -> Result<()> {
    // Core case table. (case_file_id, court_level) is the natural key used
    // for idempotent re-ingestion.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cases (
            case_id INTEGER PRIMARY KEY AUTOINCREMENT,
            case_file_id TEXT NOT NULL,
            title TEXT,
            court_level TEXT NOT NULL,
            court TEXT,
            district TEXT,
            county TEXT,
            docket_number TEXT,
            source_docket_number TEXT,
            filed_date TEXT,
            published INTEGER NOT NULL DEFAULT 1,
            publication_status TEXT,
            decision_year INTEGER,
            decision_month INTEGER,
            summary TEXT,
            full_text TEXT,
            source_url TEXT,
            case_info_url TEXT,
            case_type TEXT,
            appeal_outcome TEXT,
            outcome_detail TEXT,
            winner_legal_role TEXT,
            winner_personal_role TEXT,
            trial_court TEXT,
            trial_judge TEXT,
            source_file TEXT,
            source_file_path TEXT,
            court_id INTEGER,
            case_type_id INTEGER,
            stage_type_id INTEGER,
            extraction_model TEXT,
            extraction_timestamp TEXT,
            processing_status TEXT NOT NULL DEFAULT 'pending',
            error_message TEXT,
            UNIQUE(case_file_id, court_level)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One document row per source PDF
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            document_id INTEGER PRIMARY KEY AUTOINCREMENT,
            case_id INTEGER NOT NULL,
            title TEXT,
            source_url TEXT,
            page_count INTEGER,
            file_size INTEGER,
            processing_status TEXT,
            stage_type_id INTEGER,
            document_type_id INTEGER,
            FOREIGN KEY (case_id) REFERENCES cases(case_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Child entities replaced wholesale on re-ingestion
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS parties (
            party_id INTEGER PRIMARY KEY AUTOINCREMENT,
            case_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            legal_role TEXT,
            personal_role TEXT,
            party_type TEXT,
            FOREIGN KEY (case_id) REFERENCES cases(case_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS attorneys (
            attorney_id INTEGER PRIMARY KEY AUTOINCREMENT,
            case_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            firm_name TEXT,
            representing TEXT,
            FOREIGN KEY (case_id) REFERENCES cases(case_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Judges are shared across cases; case_judges carries the per-case role
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS judges (
            judge_id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS case_judges (
            case_id INTEGER NOT NULL,
            judge_id INTEGER NOT NULL,
            role TEXT,
            PRIMARY KEY (case_id, judge_id),
            FOREIGN KEY (case_id) REFERENCES cases(case_id),
            FOREIGN KEY (judge_id) REFERENCES judges(judge_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS citation_edges (
            source_case_id INTEGER NOT NULL,
            target_case_citation TEXT NOT NULL,
            relationship TEXT NOT NULL DEFAULT 'cited',
            PRIMARY KEY (source_case_id, target_case_citation),
            FOREIGN KEY (source_case_id) REFERENCES cases(case_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Statute dimension: parsed (code, title, section, subsection)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS statutes_dim (
            statute_id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL,
            title_num TEXT NOT NULL,
            section TEXT NOT NULL,
            subsection TEXT,
            display_text TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_statutes_dim_key \
         ON statutes_dim(code, title_num, section, COALESCE(subsection, ''))",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS statute_citations (
            statute_citation_id INTEGER PRIMARY KEY AUTOINCREMENT,
            case_id INTEGER NOT NULL,
            statute_id INTEGER NOT NULL,
            raw_text TEXT NOT NULL,
            FOREIGN KEY (case_id) REFERENCES cases(case_id),
            FOREIGN KEY (statute_id) REFERENCES statutes_dim(statute_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS issues_decisions (
            issue_id INTEGER PRIMARY KEY AUTOINCREMENT,
            case_id INTEGER NOT NULL,
            taxonomy_id INTEGER,
            issue_summary TEXT,
            rcw_reference TEXT,
            keywords TEXT,
            decision_stage TEXT,
            decision_summary TEXT,
            appeal_outcome TEXT,
            winner_legal_role TEXT,
            winner_personal_role TEXT,
            confidence_score REAL,
            FOREIGN KEY (case_id) REFERENCES cases(case_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS arguments (
            argument_id INTEGER PRIMARY KEY AUTOINCREMENT,
            case_id INTEGER NOT NULL,
            issue_id INTEGER NOT NULL,
            side TEXT NOT NULL,
            argument_text TEXT NOT NULL,
            FOREIGN KEY (case_id) REFERENCES cases(case_id),
            FOREIGN KEY (issue_id) REFERENCES issues_decisions(issue_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Dimension tables
    for table in ["case_types", "stage_types", "document_types"] {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            )
            "#,
            table
        ))
        .execute(pool)
        .await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS courts_dim (
            court_id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            level TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Two-level taxonomy tree; NULL parent rows are categories
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS legal_taxonomy (
            taxonomy_id INTEGER PRIMARY KEY AUTOINCREMENT,
            parent_id INTEGER,
            name TEXT NOT NULL COLLATE NOCASE,
            level TEXT NOT NULL,
            FOREIGN KEY (parent_id) REFERENCES legal_taxonomy(taxonomy_id)
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_taxonomy_key \
         ON legal_taxonomy(COALESCE(parent_id, 0), name, level)",
    )
    .execute(pool)
    .await?;

    // Lexical index
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS word_dictionary (
            word_id INTEGER PRIMARY KEY AUTOINCREMENT,
            word TEXT NOT NULL UNIQUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS case_chunks (
            chunk_id INTEGER PRIMARY KEY AUTOINCREMENT,
            case_id INTEGER NOT NULL,
            chunk_order INTEGER NOT NULL,
            section TEXT NOT NULL,
            text TEXT NOT NULL,
            word_count INTEGER NOT NULL,
            hash TEXT NOT NULL,
            UNIQUE(case_id, chunk_order),
            FOREIGN KEY (case_id) REFERENCES cases(case_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS case_sentences (
            sentence_id INTEGER PRIMARY KEY AUTOINCREMENT,
            chunk_id INTEGER NOT NULL,
            sentence_order INTEGER NOT NULL,
            global_order INTEGER NOT NULL,
            text TEXT NOT NULL,
            word_count INTEGER NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES case_chunks(chunk_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS case_phrases (
            phrase_id INTEGER PRIMARY KEY AUTOINCREMENT,
            case_id INTEGER NOT NULL,
            phrase TEXT NOT NULL,
            n INTEGER NOT NULL,
            frequency INTEGER NOT NULL,
            example_sentence_id INTEGER,
            example_chunk_id INTEGER,
            FOREIGN KEY (case_id) REFERENCES cases(case_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id INTEGER PRIMARY KEY,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            vector BLOB NOT NULL,
            text_hash TEXT NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES case_chunks(chunk_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='sentences_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE sentences_fts USING fts5(
                sentence_id UNINDEXED,
                chunk_id UNINDEXED,
                case_id UNINDEXED,
                text
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    // Indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_parties_case ON parties(case_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_attorneys_case ON attorneys(case_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_issues_case ON issues_decisions(case_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_case ON case_chunks(case_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sentences_chunk ON case_sentences(chunk_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_phrases_case ON case_phrases(case_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cases_county ON cases(county)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cases_year ON cases(decision_year DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
