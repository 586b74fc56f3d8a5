//! Lexical indexing: tokenization, the word dictionary, and sentence-level
//! full-text search.
//!
//! Every persisted sentence gets an FTS5 row; its distinct tokens are
//! registered in `word_dictionary` through an in-process cache so repeat
//! words cost nothing. Phrase lookups go straight to FTS5 phrase queries.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::SqlitePool;
use std::collections::HashSet;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\w'-]+").unwrap());
static HAS_LETTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-zA-Z]").unwrap());

/// Lowercase and tokenize text. Tokens are runs of word chars, apostrophes,
/// and hyphens, at least two chars long, containing at least one letter,
/// with trailing possessives stripped.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut tokens = Vec::new();
    for m in TOKEN_RE.find_iter(&lowered) {
        let word = m.as_str();
        if word.len() < 2 || !HAS_LETTER.is_match(word) {
            continue;
        }
        let stripped = word
            .strip_suffix("'s")
            .or_else(|| word.strip_suffix('\''))
            .unwrap_or(word);
        if !stripped.is_empty() {
            tokens.push(stripped.to_string());
        }
    }
    tokens
}

/// Word dictionary front-end with a per-run cache of known words.
pub struct WordCache {
    known: HashSet<String>,
}

impl WordCache {
    pub fn new() -> Self {
        Self {
            known: HashSet::new(),
        }
    }

    /// Register a word if it is not already in the dictionary. Returns true
    /// when the word was new to this run.
    pub async fn ensure(&mut self, pool: &SqlitePool, word: &str) -> Result<bool> {
        if self.known.contains(word) {
            return Ok(false);
        }
        // Insert-or-ignore resolves races between concurrent cases
        sqlx::query("INSERT OR IGNORE INTO word_dictionary (word) VALUES (?)")
            .bind(word)
            .execute(pool)
            .await?;
        self.known.insert(word.to_string());
        Ok(true)
    }
}

impl Default for WordCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Index one stored sentence: write its FTS5 row and register its tokens.
/// Returns the number of tokens indexed.
pub async fn index_sentence(
    pool: &SqlitePool,
    cache: &mut WordCache,
    sentence_id: i64,
    chunk_id: i64,
    case_id: i64,
    text: &str,
) -> Result<u64> {
    sqlx::query("INSERT INTO sentences_fts (sentence_id, chunk_id, case_id, text) VALUES (?, ?, ?, ?)")
        .bind(sentence_id)
        .bind(chunk_id)
        .bind(case_id)
        .bind(text)
        .execute(pool)
        .await?;

    let tokens = tokenize(text);
    let count = tokens.len() as u64;
    let distinct: HashSet<String> = tokens.into_iter().collect();
    for word in distinct {
        cache.ensure(pool, &word).await?;
    }
    Ok(count)
}

/// A sentence matched by a phrase query.
#[derive(Debug, Clone)]
pub struct PhraseHit {
    pub sentence_id: i64,
    pub chunk_id: i64,
    pub case_id: i64,
    pub text: String,
}

/// Find sentences containing an exact phrase, via an FTS5 phrase query.
pub async fn phrase_search(pool: &SqlitePool, phrase: &str, limit: i64) -> Result<Vec<PhraseHit>> {
    // Quote the phrase so FTS5 treats it as adjacency, not OR terms
    let quoted = format!("\"{}\"", phrase.replace('"', ""));
    let rows: Vec<(i64, i64, i64, String)> = sqlx::query_as(
        r#"
        SELECT sentence_id, chunk_id, case_id, text
        FROM sentences_fts
        WHERE sentences_fts MATCH ?
        ORDER BY rank
        LIMIT ?
        "#,
    )
    .bind(&quoted)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(sentence_id, chunk_id, case_id, text)| PhraseHit {
            sentence_id,
            chunk_id,
            case_id,
            text,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_lowercases_and_strips_possessives() {
        let tokens = tokenize("The Defendant's motion was DENIED.");
        assert_eq!(tokens, vec!["the", "defendant", "motion", "was", "denied"]);
    }

    #[test]
    fn tokenize_drops_short_and_numeric_tokens() {
        let tokens = tokenize("a 42 RCW 9.94A is ok");
        assert_eq!(tokens, vec!["rcw", "94a", "is", "ok"]);
    }

    #[test]
    fn tokenize_keeps_hyphenated_terms() {
        let tokens = tokenize("The court considered cross-examination briefly.");
        assert!(tokens.contains(&"cross-examination".to_string()));
    }

    #[test]
    fn tokenize_bare_apostrophe_suffix() {
        let tokens = tokenize("the defendants' vehicles");
        assert_eq!(tokens, vec!["the", "defendants", "vehicles"]);
    }
}
