//! Chunk embedding via a local Ollama instance.
//!
//! Calls `POST /api/embed` with chunk text truncated to a fixed input
//! budget. Vectors are stored as little-endian f32 BLOBs. Embedding is
//! best-effort: the indexing pass logs and skips failures rather than
//! failing the case.

use anyhow::{bail, Result};
use std::time::Duration;

use crate::config::EmbeddingConfig;

/// Longest input (chars) sent to the embedding endpoint.
const EMBED_INPUT_CHARS: usize = 4000;

/// Embed one text with the configured provider.
pub async fn embed_text(config: &EmbeddingConfig, text: &str) -> Result<Vec<f32>> {
    match config.provider.as_str() {
        "ollama" => embed_ollama(config, text).await,
        "disabled" => bail!("Embedding provider is disabled"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

async fn embed_ollama(config: &EmbeddingConfig, text: &str) -> Result<Vec<f32>> {
    let base_url = config
        .base_url
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("embedding.base_url required for Ollama provider"))?;
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let input: String = text.chars().take(EMBED_INPUT_CHARS).collect();
    let body = serde_json::json!({
        "model": model,
        "input": input,
    });

    let url = format!("{}/api/embed", base_url.trim_end_matches('/'));
    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client.post(&url).json(&body).send().await;
        match resp {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    return parse_ollama_response(&json);
                }
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!(
                        "Ollama API error {}: {}",
                        status,
                        body_text
                    ));
                    continue;
                }
                let body_text = response.text().await.unwrap_or_default();
                bail!("Ollama API error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
}

/// Parse an Ollama embed response. Newer versions return `embeddings`
/// (an array of vectors); older ones return a single `embedding`.
fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let vector = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .and_then(|arr| arr.first())
        .or_else(|| json.get("embedding"));

    let arr = match vector.and_then(|v| v.as_array()) {
        Some(a) => a,
        None => bail!("Unexpected Ollama embed response shape"),
    };

    Ok(arr
        .iter()
        .filter_map(|v| v.as_f64())
        .map(|f| f as f32)
        .collect())
}

/// Encode an embedding vector as little-endian bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

/// Decode a stored BLOB back into an embedding vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_round_trip() {
        let vec = vec![0.5f32, -1.25, 3.75, 0.0];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob.len(), 16);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn parses_both_response_shapes() {
        let newer = serde_json::json!({"embeddings": [[0.1, 0.2]]});
        assert_eq!(parse_ollama_response(&newer).unwrap().len(), 2);
        let older = serde_json::json!({"embedding": [0.1, 0.2, 0.3]});
        assert_eq!(parse_ollama_response(&older).unwrap().len(), 3);
    }
}
