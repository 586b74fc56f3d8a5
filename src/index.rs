//! Per-case lexical indexing.
//!
//! After a case commits, this pass chunks its full text, stores the chunks,
//! embeds them according to the configured mode, splits sentences with a
//! case-wide running order, feeds each sentence to the lexical indexer, and
//! finishes with a phrase extraction sweep. Indexing is deliberately
//! non-transactional with the case insert: a failure here is recorded in
//! the returned stats and logged, never rolled back into the case write.

use std::collections::HashMap;
use std::str::FromStr;

use anyhow::Result;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::warn;

use crate::config::{ChunkingConfig, EmbeddingConfig};
use crate::embedding;
use crate::lexicon::{self, WordCache};
use crate::models::{IndexingStats, Sentence, TextChunk};
use crate::segment;

/// Sections worth embedding when the mode is `Important`.
const IMPORTANT_SECTIONS: &[&str] = &["FACTS", "ANALYSIS", "HOLDING"];

/// Shortest n-gram length extracted as a phrase.
const PHRASE_MIN_N: usize = 2;
/// Longest n-gram length extracted as a phrase.
const PHRASE_MAX_N: usize = 3;
/// Phrases seen fewer times than this are dropped.
const PHRASE_MIN_FREQUENCY: u64 = 2;

/// Terms that make a phrase legally meaningful under strict filtering.
const LEGAL_TERMS: &[&str] = &[
    "court",
    "appeal",
    "appellant",
    "respondent",
    "plaintiff",
    "defendant",
    "statute",
    "evidence",
    "motion",
    "judgment",
    "negligence",
    "liability",
    "damages",
    "conviction",
    "sentence",
    "sentencing",
    "custody",
    "jurisdiction",
    "counsel",
    "testimony",
    "contract",
    "trial",
    "verdict",
    "remand",
    "probation",
];

/// Which chunks get embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedMode {
    All,
    Important,
    None,
}

impl FromStr for EmbedMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(EmbedMode::All),
            "important" => Ok(EmbedMode::Important),
            "none" => Ok(EmbedMode::None),
            other => anyhow::bail!("Unknown embed mode: '{}'. Must be all, important, or none.", other),
        }
    }
}

/// Which extracted phrases are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhraseFilter {
    /// Keep only phrases containing a legal term.
    Strict,
    /// Keep everything above the frequency floor.
    Relaxed,
}

impl FromStr for PhraseFilter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "strict" => Ok(PhraseFilter::Strict),
            "relaxed" => Ok(PhraseFilter::Relaxed),
            other => anyhow::bail!("Unknown phrase filter: '{}'. Must be strict or relaxed.", other),
        }
    }
}

/// Index one case. Per-chunk failures are collected in `stats.errors` and
/// processing continues with the next chunk.
pub async fn index_case(
    pool: &SqlitePool,
    chunking: &ChunkingConfig,
    embed_config: &EmbeddingConfig,
    embed_lock: &Mutex<()>,
    case_id: i64,
    full_text: &str,
    embed_mode: EmbedMode,
    phrase_filter: PhraseFilter,
) -> IndexingStats {
    let mut stats = IndexingStats::default();
    let chunks = segment::split_chunks(full_text, chunking);
    let mut word_cache = WordCache::new();
    let mut global_order: i64 = 0;
    let mut all_sentences: Vec<(i64, i64, Sentence)> = Vec::new();

    for chunk in &chunks {
        let chunk_id = match insert_chunk(pool, case_id, chunk).await {
            Ok(id) => id,
            Err(e) => {
                stats
                    .errors
                    .push(format!("chunk {}: {}", chunk.chunk_order, e));
                continue;
            }
        };
        stats.chunks_created += 1;

        if should_embed(embed_mode, &chunk.section) && embed_config.is_enabled() {
            // One in-flight embedding request at a time across the batch
            let _guard = embed_lock.lock().await;
            match embedding::embed_text(embed_config, &chunk.text).await {
                Ok(vector) => {
                    if let Err(e) = store_vector(pool, chunk_id, embed_config, &vector, chunk).await
                    {
                        stats
                            .errors
                            .push(format!("chunk {} vector: {}", chunk.chunk_order, e));
                    } else {
                        stats.embeddings_generated += 1;
                    }
                }
                Err(e) => {
                    warn!(case_id, chunk = chunk.chunk_order, error = %e, "embedding failed, skipping");
                }
            }
        }

        let sentences = segment::split_sentences(&chunk.text, global_order);
        global_order += sentences.len() as i64;

        for sentence in sentences {
            match insert_sentence(pool, chunk_id, &sentence).await {
                Ok(sentence_id) => {
                    stats.sentences_created += 1;
                    match lexicon::index_sentence(
                        pool,
                        &mut word_cache,
                        sentence_id,
                        chunk_id,
                        case_id,
                        &sentence.text,
                    )
                    .await
                    {
                        Ok(words) => stats.words_indexed += words,
                        Err(e) => stats.errors.push(format!(
                            "chunk {} sentence {}: {}",
                            chunk.chunk_order, sentence.sentence_order, e
                        )),
                    }
                    all_sentences.push((chunk_id, sentence_id, sentence));
                }
                Err(e) => {
                    stats.errors.push(format!(
                        "chunk {} sentence {}: {}",
                        chunk.chunk_order, sentence.sentence_order, e
                    ));
                }
            }
        }
    }

    match store_phrases(pool, case_id, &all_sentences, phrase_filter).await {
        Ok(count) => stats.phrases_extracted = count,
        Err(e) => stats.errors.push(format!("phrase extraction: {}", e)),
    }

    stats
}

fn should_embed(mode: EmbedMode, section: &str) -> bool {
    match mode {
        EmbedMode::All => true,
        EmbedMode::Important => IMPORTANT_SECTIONS.contains(&section),
        EmbedMode::None => false,
    }
}

async fn insert_chunk(pool: &SqlitePool, case_id: i64, chunk: &TextChunk) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO case_chunks (case_id, chunk_order, section, text, word_count, hash) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(case_id)
    .bind(chunk.chunk_order)
    .bind(&chunk.section)
    .bind(&chunk.text)
    .bind(chunk.word_count)
    .bind(&chunk.hash)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

async fn insert_sentence(pool: &SqlitePool, chunk_id: i64, sentence: &Sentence) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO case_sentences (chunk_id, sentence_order, global_order, text, word_count) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(chunk_id)
    .bind(sentence.sentence_order)
    .bind(sentence.global_order)
    .bind(&sentence.text)
    .bind(sentence.word_count)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

async fn store_vector(
    pool: &SqlitePool,
    chunk_id: i64,
    config: &EmbeddingConfig,
    vector: &[f32],
    chunk: &TextChunk,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO chunk_vectors (chunk_id, model, dims, vector, text_hash)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(chunk_id) DO UPDATE SET
            model = excluded.model,
            dims = excluded.dims,
            vector = excluded.vector,
            text_hash = excluded.text_hash
        "#,
    )
    .bind(chunk_id)
    .bind(config.model.as_deref().unwrap_or(""))
    .bind(vector.len() as i64)
    .bind(embedding::vec_to_blob(vector))
    .bind(&chunk.hash)
    .execute(pool)
    .await?;
    Ok(())
}

/// Case-wide phrase sweep: count 2- and 3-grams across all sentences,
/// keep the frequent ones (filtered to legal phrases in strict mode), and
/// remember where each was first seen.
async fn store_phrases(
    pool: &SqlitePool,
    case_id: i64,
    sentences: &[(i64, i64, Sentence)],
    filter: PhraseFilter,
) -> Result<u64> {
    // phrase -> (n, frequency, example sentence, example chunk)
    let mut counts: HashMap<String, (usize, u64, i64, i64)> = HashMap::new();
    for (chunk_id, sentence_id, sentence) in sentences {
        let tokens = lexicon::tokenize(&sentence.text);
        for n in PHRASE_MIN_N..=PHRASE_MAX_N {
            for window in tokens.windows(n) {
                let phrase = window.join(" ");
                counts
                    .entry(phrase)
                    .and_modify(|entry| entry.1 += 1)
                    .or_insert((n, 1, *sentence_id, *chunk_id));
            }
        }
    }

    let mut stored = 0u64;
    for (phrase, (n, frequency, sentence_id, chunk_id)) in counts {
        if frequency < PHRASE_MIN_FREQUENCY {
            continue;
        }
        if filter == PhraseFilter::Strict && !is_legal_phrase(&phrase) {
            continue;
        }
        sqlx::query(
            r#"
            INSERT INTO case_phrases (case_id, phrase, n, frequency, example_sentence_id, example_chunk_id)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(case_id)
        .bind(&phrase)
        .bind(n as i64)
        .bind(frequency as i64)
        .bind(sentence_id)
        .bind(chunk_id)
        .execute(pool)
        .await?;
        stored += 1;
    }
    Ok(stored)
}

fn is_legal_phrase(phrase: &str) -> bool {
    phrase
        .split(' ')
        .any(|word| LEGAL_TERMS.contains(&word))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_mode_parsing() {
        assert_eq!(EmbedMode::from_str("all").unwrap(), EmbedMode::All);
        assert_eq!(
            EmbedMode::from_str("important").unwrap(),
            EmbedMode::Important
        );
        assert_eq!(EmbedMode::from_str("none").unwrap(), EmbedMode::None);
        assert!(EmbedMode::from_str("some").is_err());
    }

    #[test]
    fn important_mode_selects_analysis_sections() {
        assert!(should_embed(EmbedMode::Important, "FACTS"));
        assert!(should_embed(EmbedMode::Important, "ANALYSIS"));
        assert!(should_embed(EmbedMode::Important, "HOLDING"));
        assert!(!should_embed(EmbedMode::Important, "HEADER"));
        assert!(!should_embed(EmbedMode::Important, "CONTENT"));
        assert!(should_embed(EmbedMode::All, "HEADER"));
        assert!(!should_embed(EmbedMode::None, "ANALYSIS"));
    }

    #[test]
    fn legal_phrase_detection() {
        assert!(is_legal_phrase("summary judgment"));
        assert!(is_legal_phrase("the trial court"));
        assert!(!is_legal_phrase("three days later"));
    }
}
