//! End-to-end pipeline tests against a scratch SQLite database: migrations,
//! idempotent case insertion, and the lexical indexing pass.

use std::path::Path;

use lexpipe::config::{
    BatchConfig, ChunkingConfig, Config, DbConfig, EmbeddingConfig, ExtractionConfig, ModelConfig,
};
use lexpipe::db;
use lexpipe::dimensions::DimensionResolver;
use lexpipe::index::{self, EmbedMode, PhraseFilter};
use lexpipe::lexicon;
use lexpipe::migrate;
use lexpipe::models::{
    Attorney, CaseMetadata, CaseRecord, Citation, Issue, Judge, Party, StatuteRef,
};
use lexpipe::persist;
use sqlx::SqlitePool;

fn test_config(dir: &Path) -> Config {
    Config {
        db: DbConfig {
            path: dir.join("cases.db"),
        },
        extraction: ExtractionConfig::default(),
        model: ModelConfig {
            base_url: "http://localhost:11434".to_string(),
            model: "test".to_string(),
            temperature: 0.1,
            max_chars: 25_000,
            num_predict: 8192,
            num_ctx: 32_768,
            timeout_secs: 300,
        },
        embedding: EmbeddingConfig::default(),
        chunking: ChunkingConfig::default(),
        batch: BatchConfig::default(),
    }
}

fn sample_text() -> String {
    let mut text = String::from("STATEMENT OF FACTS OF THE CASE\n\n");
    for _ in 0..40 {
        text.push_str("The trial court entered judgment against the defendant after trial. ");
    }
    text.push_str("\n\n");
    for _ in 0..40 {
        text.push_str("On appeal the respondent argued that the evidence supported the verdict. ");
    }
    text
}

fn sample_record() -> CaseRecord {
    CaseRecord {
        metadata: CaseMetadata {
            case_number: "39300-3".to_string(),
            division: Some("III".to_string()),
            title: Some("State v. Example".to_string()),
            opinion_type: Some("appeals".to_string()),
            court_level: "Court of Appeals".to_string(),
            publication_status: Some("Published Opinion".to_string()),
            file_date: Some("2023-06-15".to_string()),
            pdf_url: None,
            case_info_url: None,
            pdf_filename: "39300-3_III.pdf".to_string(),
        },
        full_text: sample_text(),
        page_count: Some(12),
        file_size: Some(48_000),
        source_file_path: "/in/39300-3_III.pdf".to_string(),
        summary: Some("Affirmed on sufficiency of the evidence.".to_string()),
        case_type: Some("Criminal Law".to_string()),
        county: Some("Spokane".to_string()),
        trial_court: Some("Spokane County Superior Court".to_string()),
        trial_judge: Some("Jane Roe".to_string()),
        source_docket_number: None,
        opinion_filed_date: Some("2023-06-15".to_string()),
        appeal_outcome: Some("affirmed".to_string()),
        outcome_detail: None,
        winner_legal_role: Some("respondent".to_string()),
        winner_personal_role: Some("plaintiff".to_string()),
        parties: vec![
            Party {
                name: "State of Washington".to_string(),
                legal_role: Some("respondent".to_string()),
                personal_role: Some("plaintiff".to_string()),
                party_type: Some("government".to_string()),
            },
            Party {
                name: "John Example".to_string(),
                legal_role: Some("appellant".to_string()),
                personal_role: Some("defendant".to_string()),
                party_type: Some("individual".to_string()),
            },
        ],
        attorneys: vec![Attorney {
            name: "Pat Counsel".to_string(),
            firm_name: None,
            representing: Some("appellant".to_string()),
        }],
        judges: vec![
            Judge {
                name: "Lee Author".to_string(),
                role: Some("author".to_string()),
            },
            Judge {
                name: "Jane Roe".to_string(),
                role: Some("trial".to_string()),
            },
        ],
        citations: vec![Citation {
            target: "State v. Green, 94 Wn.2d 216".to_string(),
            relationship: "cited".to_string(),
        }],
        statutes: vec![StatuteRef {
            raw_text: "RCW 9A.36.021(1)(c)".to_string(),
        }],
        issues: vec![Issue {
            category: "Criminal Law".to_string(),
            subcategory: "Sufficiency of the Evidence".to_string(),
            issue_summary: Some("Whether the evidence supported the conviction.".to_string()),
            decision_summary: Some("The evidence was sufficient.".to_string()),
            appeal_outcome: Some("affirmed".to_string()),
            winner_legal_role: Some("respondent".to_string()),
            winner_personal_role: Some("plaintiff".to_string()),
            keywords: Some("sufficiency, evidence".to_string()),
            rcw_references: vec!["RCW 9A.36.021".to_string()],
            decision_stage: "appeal".to_string(),
            confidence_score: Some(0.9),
            appellant_argument: Some("The evidence was insufficient.".to_string()),
            respondent_argument: Some("A rational trier of fact could convict.".to_string()),
        }],
        extraction_ok: true,
        error_message: None,
        extraction_model: Some("test".to_string()),
        extraction_timestamp: Some(chrono::Utc::now()),
    }
}

async fn setup() -> (tempfile::TempDir, Config, SqlitePool) {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let pool = db::connect(&config).await.unwrap();
    migrate::run_migrations_on(&pool).await.unwrap();
    // Idempotent: a second run must not error
    migrate::run_migrations_on(&pool).await.unwrap();
    (dir, config, pool)
}

async fn count(pool: &SqlitePool, sql: &str, case_id: i64) -> i64 {
    sqlx::query_scalar(sql)
        .bind(case_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn case_insert_is_idempotent() {
    let (_dir, _config, pool) = setup().await;
    let dims = DimensionResolver::new(pool.clone());
    let record = sample_record();

    let (first_id, was_new) = persist::insert_case(&pool, &dims, &record).await.unwrap();
    assert!(was_new);

    let (second_id, was_new) = persist::insert_case(&pool, &dims, &record).await.unwrap();
    assert!(!was_new);
    assert_eq!(first_id, second_id);

    // Children are replaced, not accumulated
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM parties WHERE case_id = ?", first_id).await,
        2
    );
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM attorneys WHERE case_id = ?", first_id).await,
        1
    );
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM case_judges WHERE case_id = ?", first_id).await,
        2
    );
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM citation_edges WHERE source_case_id = ?", first_id)
            .await,
        1
    );
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM issues_decisions WHERE case_id = ?", first_id).await,
        1
    );
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM statute_citations WHERE case_id = ?", first_id).await,
        1
    );
    // One issue carries two arguments, one per side
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM arguments WHERE case_id = ?", first_id).await,
        2
    );

    let total_cases: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cases")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(total_cases, 1);
    pool.close().await;
}

#[tokio::test]
async fn indexing_populates_lexical_tables() {
    let (_dir, config, pool) = setup().await;
    let dims = DimensionResolver::new(pool.clone());
    let record = sample_record();
    let (case_id, _) = persist::insert_case(&pool, &dims, &record).await.unwrap();

    let embed_lock = tokio::sync::Mutex::new(());
    let stats = index::index_case(
        &pool,
        &config.chunking,
        &config.embedding,
        &embed_lock,
        case_id,
        &record.full_text,
        EmbedMode::None,
        PhraseFilter::Strict,
    )
    .await;

    assert!(stats.errors.is_empty(), "indexing errors: {:?}", stats.errors);
    assert!(stats.chunks_created >= 1);
    assert!(stats.sentences_created >= 40);
    assert!(stats.words_indexed > 0);
    assert!(stats.phrases_extracted > 0);
    assert_eq!(stats.embeddings_generated, 0);

    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM case_chunks WHERE case_id = ?", case_id).await,
        stats.chunks_created as i64
    );
    let sentences: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM case_sentences s \
         JOIN case_chunks c ON c.chunk_id = s.chunk_id WHERE c.case_id = ?",
    )
    .bind(case_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(sentences, stats.sentences_created as i64);
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM sentences_fts WHERE case_id = ?", case_id).await,
        stats.sentences_created as i64
    );
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM chunk_vectors v \
             JOIN case_chunks c ON c.chunk_id = v.chunk_id WHERE c.case_id = ?", case_id)
            .await,
        0
    );

    // Sentence orders restart per chunk and the global order never repeats
    let distinct_globals: i64 = sqlx::query_scalar(
        "SELECT COUNT(DISTINCT s.global_order) FROM case_sentences s \
         JOIN case_chunks c ON c.chunk_id = s.chunk_id WHERE c.case_id = ?",
    )
    .bind(case_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(distinct_globals, sentences);

    // The dominant bigram survives the strict filter and is searchable
    let hits = lexicon::phrase_search(&pool, "trial court", 10).await.unwrap();
    assert!(!hits.is_empty());
    assert!(hits[0].text.contains("trial court"));

    let stored_phrase: i64 = count(
        &pool,
        "SELECT COUNT(*) FROM case_phrases WHERE case_id = ? AND phrase = 'trial court'",
        case_id,
    )
    .await;
    assert_eq!(stored_phrase, 1);
    pool.close().await;
}

#[tokio::test]
async fn reingestion_clears_lexical_children() {
    let (_dir, config, pool) = setup().await;
    let dims = DimensionResolver::new(pool.clone());
    let record = sample_record();
    let (case_id, _) = persist::insert_case(&pool, &dims, &record).await.unwrap();

    let embed_lock = tokio::sync::Mutex::new(());
    let stats = index::index_case(
        &pool,
        &config.chunking,
        &config.embedding,
        &embed_lock,
        case_id,
        &record.full_text,
        EmbedMode::None,
        PhraseFilter::Relaxed,
    )
    .await;
    assert!(stats.chunks_created >= 1);

    // Re-inserting the same case wipes its lexical children so the next
    // indexing pass starts clean
    let (same_id, was_new) = persist::insert_case(&pool, &dims, &record).await.unwrap();
    assert_eq!(same_id, case_id);
    assert!(!was_new);

    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM case_chunks WHERE case_id = ?", case_id).await,
        0
    );
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM sentences_fts WHERE case_id = ?", case_id).await,
        0
    );
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM case_phrases WHERE case_id = ?", case_id).await,
        0
    );
    pool.close().await;
}

#[tokio::test]
async fn taxonomy_names_fold_case_under_one_parent() {
    let (_dir, _config, pool) = setup().await;
    let dims = DimensionResolver::new(pool.clone());

    // Casing variants outside the normalization table resolve to one node
    let a = dims.taxonomy_id("Maritime Law", "").await.unwrap();
    let b = dims.taxonomy_id("maritime law", "").await.unwrap();
    assert_eq!(a, b);

    let sub_a = dims.taxonomy_id("Maritime Law", "Salvage").await.unwrap();
    let sub_b = dims.taxonomy_id("maritime law", "SALVAGE").await.unwrap();
    assert_eq!(sub_a, sub_b);
    assert_ne!(sub_a, a);

    let nodes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM legal_taxonomy")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(nodes, 2);
    pool.close().await;
}

#[tokio::test]
async fn failed_extraction_is_persisted_as_failed_row() {
    let (_dir, _config, pool) = setup().await;
    let dims = DimensionResolver::new(pool.clone());

    let record = CaseRecord {
        metadata: CaseMetadata {
            case_number: "99999-9".to_string(),
            court_level: "Supreme Court".to_string(),
            pdf_filename: "99999-9.pdf".to_string(),
            ..Default::default()
        },
        source_file_path: "/in/99999-9.pdf".to_string(),
        extraction_ok: false,
        error_message: Some("Extracted text too short: 12 chars".to_string()),
        ..Default::default()
    };

    let (case_id, was_new) = persist::insert_case(&pool, &dims, &record).await.unwrap();
    assert!(was_new);

    let (status, error): (String, Option<String>) = sqlx::query_as(
        "SELECT processing_status, error_message FROM cases WHERE case_id = ?",
    )
    .bind(case_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(status, "failed");
    assert!(error.unwrap().contains("too short"));
    pool.close().await;
}
