use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// PDF text extraction: remote parse service with a local fallback.
#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// Base URL of the remote parse service. None = local extraction only.
    #[serde(default)]
    pub service_url: Option<String>,
    #[serde(default = "default_extraction_retries")]
    pub max_retries: u32,
    #[serde(default = "default_extraction_timeout")]
    pub timeout_secs: u64,
    /// Results shorter than this (chars) are treated as a thin parse and retried.
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,
    /// Concurrent requests allowed against the parse service.
    #[serde(default = "default_extraction_concurrency")]
    pub concurrency: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            service_url: None,
            max_retries: default_extraction_retries(),
            timeout_secs: default_extraction_timeout(),
            min_text_chars: default_min_text_chars(),
            concurrency: default_extraction_concurrency(),
        }
    }
}

fn default_extraction_retries() -> u32 {
    3
}
fn default_extraction_timeout() -> u64 {
    120
}
fn default_min_text_chars() -> usize {
    100
}
fn default_extraction_concurrency() -> usize {
    2
}

/// Language model used for structured extraction (Ollama-style API).
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_num_predict")]
    pub num_predict: u64,
    #[serde(default = "default_num_ctx")]
    pub num_ctx: u64,
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
}

fn default_temperature() -> f64 {
    0.1
}
fn default_max_chars() -> usize {
    25_000
}
fn default_num_predict() -> u64 {
    8192
}
fn default_num_ctx() -> u64 {
    32_768
}
fn default_model_timeout() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_embed_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            base_url: None,
            model: None,
            dims: None,
            max_retries: default_embed_max_retries(),
            timeout_secs: default_embed_timeout(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_embed_max_retries() -> u32 {
    3
}
fn default_embed_timeout() -> u64 {
    60
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Word bounds for section-aware chunking.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_target_words")]
    pub target_words: usize,
    #[serde(default = "default_min_words")]
    pub min_words: usize,
    #[serde(default = "default_max_words")]
    pub max_words: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_words: default_target_words(),
            min_words: default_min_words(),
            max_words: default_max_words(),
        }
    }
}

fn default_target_words() -> usize {
    350
}
fn default_min_words() -> usize {
    200
}
fn default_max_words() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct BatchConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Directory for checkpoint files and the failure log.
    #[serde(default = "default_ledger_dir")]
    pub ledger_dir: PathBuf,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            ledger_dir: default_ledger_dir(),
        }
    }
}

fn default_workers() -> usize {
    4
}
fn default_ledger_dir() -> PathBuf {
    PathBuf::from("./ledger")
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.min_words == 0 {
        anyhow::bail!("chunking.min_words must be > 0");
    }
    if config.chunking.min_words > config.chunking.target_words {
        anyhow::bail!("chunking.min_words must be <= chunking.target_words");
    }
    if config.chunking.target_words > config.chunking.max_words {
        anyhow::bail!("chunking.target_words must be <= chunking.max_words");
    }

    // Validate model
    if config.model.base_url.is_empty() {
        anyhow::bail!("model.base_url must be set");
    }
    if config.model.model.is_empty() {
        anyhow::bail!("model.model must be set");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.base_url.is_none() {
            anyhow::bail!(
                "embedding.base_url must be set when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be set when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or ollama.",
            other
        ),
    }

    if config.batch.workers == 0 {
        anyhow::bail!("batch.workers must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let f = write_config(
            r#"
            [db]
            path = "./data/cases.db"
            [model]
            base_url = "http://localhost:11434"
            model = "llama3.1:8b"
            "#,
        );
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.chunking.target_words, 350);
        assert_eq!(cfg.chunking.min_words, 200);
        assert_eq!(cfg.chunking.max_words, 500);
        assert_eq!(cfg.batch.workers, 4);
        assert!(!cfg.embedding.is_enabled());
        assert_eq!(cfg.extraction.concurrency, 2);
    }

    #[test]
    fn rejects_inverted_chunk_bounds() {
        let f = write_config(
            r#"
            [db]
            path = "./data/cases.db"
            [model]
            base_url = "http://localhost:11434"
            model = "llama3.1:8b"
            [chunking]
            target_words = 100
            min_words = 200
            max_words = 500
            "#,
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn embedding_requires_model_and_url() {
        let f = write_config(
            r#"
            [db]
            path = "./data/cases.db"
            [model]
            base_url = "http://localhost:11434"
            model = "llama3.1:8b"
            [embedding]
            provider = "ollama"
            "#,
        );
        assert!(load_config(f.path()).is_err());
    }
}
