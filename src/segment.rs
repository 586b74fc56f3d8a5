//! Section-aware text segmentation.
//!
//! Splits opinion text into chunks on paragraph boundaries, labelling each
//! chunk with the opinion section it falls in (HEADER, PARTIES, PROCEDURAL,
//! FACTS, ANALYSIS, HOLDING, or CONTENT). Chunks respect target/min/max word
//! bounds; oversized accumulations are subdivided and short trailing pieces
//! merged back. Sentence splitting protects reporter and statute citations
//! so "100 Wn.2d 212" never breaks a sentence in half.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::config::ChunkingConfig;
use crate::models::{Sentence, TextChunk};

/// Section label applied when no heading pattern matches.
pub const SECTION_CONTENT: &str = "CONTENT";

/// Ordered heading patterns. First section whose pattern matches the
/// uppercased paragraph wins; order matters (FACTS before ANALYSIS would
/// misfile "FINDINGS OF FACT AND CONCLUSIONS OF LAW" the other way around).
static SECTION_PATTERNS: Lazy<Vec<(&'static str, Vec<Regex>)>> = Lazy::new(|| {
    fn compile(patterns: &[&str]) -> Vec<Regex> {
        patterns
            .iter()
            .map(|p| Regex::new(p).unwrap_or_else(|e| panic!("bad section pattern {}: {}", p, e)))
            .collect()
    }
    vec![
        (
            "HEADER",
            compile(&[
                r"IN THE .* COURT",
                r"STATE OF .*",
                r"COUNTY OF .*",
                r"NO\.\s*\d+",
                r"CASE NO\.",
                r"DOCKET",
            ]),
        ),
        (
            "PARTIES",
            compile(&[
                r"PLAINTIFF",
                r"DEFENDANT",
                r"APPELLANT",
                r"RESPONDENT",
                r"PETITIONER",
            ]),
        ),
        (
            "PROCEDURAL",
            compile(&[
                r"PROCEDURAL HISTORY",
                r"BACKGROUND",
                r"PROCEEDINGS",
                r"MOTION",
                r"APPEAL",
            ]),
        ),
        (
            "FACTS",
            compile(&[
                r"STATEMENT OF FACTS",
                r"FACTUAL BACKGROUND",
                r"FACTS",
                r"FINDINGS OF FACT",
            ]),
        ),
        (
            "ANALYSIS",
            compile(&[
                r"ANALYSIS",
                r"DISCUSSION",
                r"LEGAL ANALYSIS",
                r"CONCLUSIONS OF LAW",
                r"OPINION",
            ]),
        ),
        (
            "HOLDING",
            compile(&[
                r"HOLDING",
                r"CONCLUSION",
                r"DECISION",
                r"JUDGMENT",
                r"ORDER",
            ]),
        ),
    ]
});

static PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").unwrap());

/// Citation shapes that must never be split mid-sentence: Pacific Reporter,
/// Washington Reports, U.S. Reports, RCW and WAC references.
static CITATION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\d+\s+P\.\s*\d+d?\s+\d+",
        r"(?i)\d+\s+Wn\.\s*\d*\s+\d+",
        r"(?i)\d+\s+U\.S\.\s+\d+",
        r"(?i)RCW\s+\d+\.\d+\.\d+",
        r"(?i)WAC\s+\d+-\d+-\d+",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap_or_else(|e| panic!("bad citation pattern {}: {}", p, e)))
    .collect()
});

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn classify_section(paragraph: &str) -> Option<&'static str> {
    let upper = paragraph.to_uppercase();
    for (section, patterns) in SECTION_PATTERNS.iter() {
        if patterns.iter().any(|re| re.is_match(&upper)) {
            return Some(section);
        }
    }
    None
}

/// Split opinion text into section-labelled chunks. Chunk orders start at 1.
/// Chunks shorter than `min_words` are dropped.
pub fn split_chunks(text: &str, params: &ChunkingConfig) -> Vec<TextChunk> {
    let paragraphs: Vec<&str> = PARAGRAPH_BREAK
        .split(text)
        .map(str::trim)
        .filter(|p| word_count(p) >= 5)
        .collect();

    let mut chunks: Vec<TextChunk> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_words = 0usize;
    let mut current_section = SECTION_CONTENT;

    for para in paragraphs {
        if let Some(section) = classify_section(para) {
            if section != current_section {
                if !current.is_empty() {
                    finalize_chunk(&mut chunks, &current, current_section, params);
                    current.clear();
                    current_words = 0;
                }
                current_section = section;
            }
        }

        current.push(para);
        current_words += word_count(para);

        if current_words >= params.target_words {
            if current_words > params.max_words {
                split_large(&mut chunks, &current, current_section, params);
            } else {
                finalize_chunk(&mut chunks, &current, current_section, params);
            }
            current.clear();
            current_words = 0;
        }
    }

    if !current.is_empty() {
        finalize_chunk(&mut chunks, &current, current_section, params);
    }

    chunks
}

/// Subdivide an accumulation that overshot `max_words`: emit chunks at the
/// target boundary, then merge a single trailing paragraph into the previous
/// chunk when the merge stays under `max_words`.
fn split_large(
    chunks: &mut Vec<TextChunk>,
    paragraphs: &[&str],
    section: &str,
    params: &ChunkingConfig,
) {
    let mut current: Vec<&str> = Vec::new();
    let mut current_words = 0usize;

    for para in paragraphs {
        current.push(para);
        current_words += word_count(para);
        if current_words >= params.target_words {
            finalize_chunk(chunks, &current, section, params);
            current.clear();
            current_words = 0;
        }
    }

    if current.is_empty() {
        return;
    }
    // Only a lone trailing paragraph merges backward
    if current.len() == 1 {
        if let Some(last) = chunks.last_mut() {
            if last.section == section
                && last.word_count as usize + current_words <= params.max_words
            {
                last.text.push_str("\n\n");
                last.text.push_str(&current.join("\n\n"));
                last.word_count += current_words as i64;
                last.hash = hash_text(&last.text);
                return;
            }
        }
    }
    finalize_chunk(chunks, &current, section, params);
}

fn finalize_chunk(
    chunks: &mut Vec<TextChunk>,
    paragraphs: &[&str],
    section: &str,
    params: &ChunkingConfig,
) {
    let text = paragraphs.join("\n\n");
    let words = word_count(&text);
    if words < params.min_words {
        return;
    }
    let hash = hash_text(&text);
    chunks.push(TextChunk {
        chunk_order: chunks.len() as i64 + 1,
        section: section.to_string(),
        text,
        word_count: words as i64,
        hash,
    });
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Split chunk text into sentences, protecting citations from the splitter.
///
/// `global_start` is the number of sentences already emitted for this case;
/// each returned sentence's `global_order` continues from it. Fragments
/// under 10 characters are dropped.
pub fn split_sentences(text: &str, global_start: i64) -> Vec<Sentence> {
    // Mask citations behind placeholders the splitter cannot match
    let mut masked = text.to_string();
    let mut replacements: Vec<(String, String)> = Vec::new();
    for (pat_idx, re) in CITATION_PATTERNS.iter().enumerate() {
        loop {
            let found = match re.find(&masked) {
                Some(m) => (m.start(), m.end(), m.as_str().to_string()),
                None => break,
            };
            let placeholder = format!("__CITATION_{}_{}__", pat_idx, replacements.len());
            masked.replace_range(found.0..found.1, &placeholder);
            replacements.push((placeholder, found.2));
        }
    }

    let mut sentences = Vec::new();
    for raw in split_on_boundaries(&masked) {
        let mut restored = raw.trim().to_string();
        for (placeholder, original) in &replacements {
            restored = restored.replace(placeholder.as_str(), original);
        }
        if restored.len() < 10 {
            continue;
        }
        let words = word_count(&restored) as i64;
        let order = sentences.len() as i64 + 1;
        sentences.push(Sentence {
            sentence_order: order,
            global_order: global_start + order,
            text: restored,
            word_count: words,
        });
    }
    sentences
}

/// Split on `[.!?]` followed by whitespace and a capital letter. The
/// terminator stays with the left sentence, the capital starts the right.
fn split_on_boundaries(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut pieces = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;
    while i < chars.len() {
        if matches!(chars[i], '.' | '!' | '?') {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j > i + 1 && j < chars.len() && chars[j].is_ascii_uppercase() {
                pieces.push(chars[start..=i].iter().collect());
                start = j;
                i = j;
                continue;
            }
        }
        i += 1;
    }
    if start < chars.len() {
        pieces.push(chars[start..].iter().collect());
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ChunkingConfig {
        ChunkingConfig::default()
    }

    fn paragraph(words: usize) -> String {
        (0..words)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn short_text_produces_no_chunks() {
        // Under min_words, everything is dropped
        let chunks = split_chunks("Too short to keep as a chunk of an opinion.", &params());
        assert!(chunks.is_empty());
    }

    #[test]
    fn chunk_orders_start_at_one() {
        let text = (0..8)
            .map(|_| paragraph(120))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = split_chunks(&text, &params());
        assert!(!chunks.is_empty());
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_order, i as i64 + 1);
        }
    }

    #[test]
    fn oversized_section_splits_near_target() {
        // A 900-word FACTS run comes out as two chunks of roughly 450 words.
        let mut text = String::from("STATEMENT OF FACTS OF THE CASE\n\n");
        for _ in 0..6 {
            text.push_str(&paragraph(150));
            text.push_str("\n\n");
        }
        let chunks = split_chunks(&text, &params());
        assert_eq!(chunks.len(), 2);
        for c in &chunks {
            assert_eq!(c.section, "FACTS");
            assert!(c.word_count >= 200 && c.word_count <= 500, "{}", c.word_count);
        }
    }

    #[test]
    fn single_trailing_paragraph_merges_backward() {
        let paras = [paragraph(350), paragraph(60)];
        let refs: Vec<&str> = paras.iter().map(String::as_str).collect();
        let mut chunks = Vec::new();
        split_large(&mut chunks, &refs, SECTION_CONTENT, &params());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].word_count, 410);
    }

    #[test]
    fn multi_paragraph_leftover_is_not_merged() {
        // Two trailing paragraphs stay out of the previous chunk even when
        // the combined size would fit under max_words
        let paras = [paragraph(350), paragraph(30), paragraph(40)];
        let refs: Vec<&str> = paras.iter().map(String::as_str).collect();
        let mut chunks = Vec::new();
        split_large(&mut chunks, &refs, SECTION_CONTENT, &params());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].word_count, 350);
    }

    #[test]
    fn section_change_closes_chunk() {
        let mut text = String::new();
        text.push_str("STATEMENT OF FACTS OF THE CASE\n\n");
        text.push_str(&paragraph(250));
        text.push_str("\n\nTHE ANALYSIS OF THE ISSUES FOLLOWS\n\n");
        text.push_str(&paragraph(250));
        let chunks = split_chunks(&text, &params());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].section, "FACTS");
        assert_eq!(chunks[1].section, "ANALYSIS");
    }

    #[test]
    fn bare_headings_under_five_words_are_dropped() {
        // "ANALYSIS" alone is filtered out with the short paragraphs, so the
        // following content keeps the default label
        let text = format!("ANALYSIS\n\n{}", paragraph(300));
        let chunks = split_chunks(&text, &params());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].section, SECTION_CONTENT);
    }

    #[test]
    fn citation_is_restored_intact() {
        let text = "The controlling authority is 720 P.2d 808. That case resolves the issue.";
        let sentences = split_sentences(text, 0);
        assert_eq!(sentences.len(), 2);
        assert!(sentences[0].text.contains("720 P.2d 808"));
        assert_eq!(sentences[1].text, "That case resolves the issue.");
    }

    #[test]
    fn statute_reference_survives_splitting() {
        let text = "The charge arose under RCW 9.94.030. Defendant appealed the conviction.";
        let sentences = split_sentences(text, 0);
        assert_eq!(sentences.len(), 2);
        assert!(sentences[0].text.contains("RCW 9.94.030"));
    }

    #[test]
    fn short_fragments_are_skipped() {
        let text = "Yes. No. The trial court granted summary judgment on all claims.";
        let sentences = split_sentences(text, 0);
        assert_eq!(sentences.len(), 1);
    }

    #[test]
    fn global_order_continues_across_chunks() {
        let first = split_sentences("One full sentence here. Another full sentence here.", 0);
        assert_eq!(first.last().unwrap().global_order, 2);
        let second = split_sentences("A third sentence follows the others.", 2);
        assert_eq!(second[0].sentence_order, 1);
        assert_eq!(second[0].global_order, 3);
    }
}
