//! PDF text extraction.
//!
//! Primary path is a remote parse service (`POST /parse`), capped at a small
//! number of concurrent requests and retried with backoff when the service
//! returns a thin result. When no service is configured, or every attempt
//! comes back thin, extraction falls back to local `pdf-extract`. Slip
//! opinion boilerplate is stripped from the head of the text before it goes
//! anywhere else.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::ExtractionConfig;

/// Phrases that mark the slip opinion filing notice. The notice is stripped
/// only when at least two of them co-occur near the top of the document.
const NOTICE_MARKERS: &[&str] = &[
    "IN CLERK'S OFFICE",
    "SUPREME COURT, STATE OF WASHINGTON",
    "This opinion was filed for record",
    "SUSAN L. CARLSON",
    "SUPREME COURT CLERK",
];

/// How far into the document the notice can extend.
const NOTICE_SPAN_CHARS: usize = 2000;

/// Extraction result: plain text plus the page count when the service
/// reports one.
#[derive(Debug, Clone)]
pub struct ExtractedText {
    pub text: String,
    pub pages: Option<i64>,
}

#[derive(Deserialize)]
struct ParseResponse {
    text: String,
    #[serde(default)]
    pages: Option<i64>,
}

/// Client for the parse service with a shared concurrency cap.
pub struct TextExtractor {
    config: ExtractionConfig,
    client: reqwest::Client,
    semaphore: Arc<Semaphore>,
}

impl TextExtractor {
    pub fn new(config: ExtractionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Ok(Self {
            config,
            client,
            semaphore,
        })
    }

    /// Extract text from a PDF, preferring the remote service.
    pub async fn extract(&self, path: &Path) -> Result<ExtractedText> {
        let mut result = match &self.config.service_url {
            Some(url) => match self.extract_remote(url, path).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "parse service failed, falling back to local extraction");
                    extract_local(path).await?
                }
            },
            None => extract_local(path).await?,
        };

        result.text = strip_filing_notice(&result.text);
        Ok(result)
    }

    async fn extract_remote(&self, base_url: &str, path: &Path) -> Result<ExtractedText> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .context("extraction semaphore closed")?;

        let url = format!("{}/parse", base_url.trim_end_matches('/'));
        let body = serde_json::json!({ "path": path.to_string_lossy() });
        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self.client.post(&url).json(&body).send().await;
            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed: ParseResponse = response.json().await?;
                        if parsed.text.trim().len() >= self.config.min_text_chars {
                            debug!(path = %path.display(), pages = ?parsed.pages, "parse service returned text");
                            return Ok(ExtractedText {
                                text: parsed.text,
                                pages: parsed.pages,
                            });
                        }
                        // The service sometimes returns a near-empty parse
                        // on the first pass over a scanned document
                        last_err = Some(anyhow::anyhow!(
                            "parse service returned {} chars",
                            parsed.text.trim().len()
                        ));
                        continue;
                    }
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("parse service error {}: {}", status, body_text));
                        continue;
                    }
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("parse service error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("parse service failed after retries")))
    }
}

/// Local extraction via pdf-extract, off the async runtime. No page count
/// is available here.
async fn extract_local(path: &Path) -> Result<ExtractedText> {
    let path = path.to_path_buf();
    let text = tokio::task::spawn_blocking(move || {
        pdf_extract::extract_text(&path)
            .with_context(|| format!("Local PDF extraction failed: {}", path.display()))
    })
    .await
    .context("local extraction task panicked")??;
    Ok(ExtractedText { text, pages: None })
}

/// Strip the slip opinion filing notice from the head of the text.
///
/// The notice block (file stamp, clerk's certification, signature lines)
/// precedes the caption and pollutes both chunking and extraction. It is
/// recognized by marker co-occurrence; the strip ends at the line holding
/// the last marker found within the span.
pub fn strip_filing_notice(text: &str) -> String {
    let head: String = text.chars().take(NOTICE_SPAN_CHARS).collect();
    let head_upper = head.to_uppercase();

    let mut found = 0;
    let mut last_end = 0;
    for marker in NOTICE_MARKERS {
        if let Some(pos) = head_upper.find(&marker.to_uppercase()) {
            found += 1;
            let end = pos + marker.len();
            if end > last_end {
                last_end = end;
            }
        }
    }

    if found < 2 || !head.is_char_boundary(last_end) {
        return text.to_string();
    }

    let cut_bytes = head[last_end..]
        .find('\n')
        .map(|n| last_end + n + 1)
        .unwrap_or(last_end);
    let cut_chars = head[..cut_bytes].chars().count();
    text.chars().skip(cut_chars).collect::<String>().trim_start().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notice_is_stripped_when_markers_cooccur() {
        let text = "FILED\nIN CLERK'S OFFICE\nSUPREME COURT, STATE OF WASHINGTON\n\
                    This opinion was filed for record at 8:00 a.m. on March 14, 2024\n\
                    SUSAN L. CARLSON\nSUPREME COURT CLERK\n\n\
                    STATE OF WASHINGTON, Respondent, v. JOHN DOE, Appellant.";
        let stripped = strip_filing_notice(text);
        assert!(stripped.starts_with("STATE OF WASHINGTON, Respondent"));
        assert!(!stripped.contains("CLERK'S OFFICE"));
    }

    #[test]
    fn single_marker_is_not_enough() {
        let text = "The clerk noted that SUPREME COURT CLERK procedures applied. More text.";
        assert_eq!(strip_filing_notice(text), text);
    }

    #[test]
    fn markers_beyond_the_span_are_ignored() {
        let mut text = "x".repeat(3000);
        text.push_str("\nIN CLERK'S OFFICE\nSUSAN L. CARLSON\n");
        assert_eq!(strip_filing_notice(&text), text);
    }
}
