//! Embedding collaborator: trait, providers, and vector utilities.
//!
//! Defines the [`Embedder`] trait and concrete implementations:
//! - **[`DisabledEmbedder`]**: returns errors; used when embeddings are not configured.
//! - **[`OpenAIEmbedder`]**: calls the OpenAI embeddings API (or a compatible gateway).
//! - **[`OllamaEmbedder`]**: calls a local Ollama instance's `/api/embed` endpoint.
//!
//! Also provides vector utilities shared by the stores:
//! - [`cosine_similarity`]: similarity between two embedding vectors
//! - [`vec_to_blob`] / [`blob_to_vec`]: little-endian `f32` BLOB encoding
//!
//! # Retry Strategy
//!
//! Both HTTP providers retry transport-level failures with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;

/// What the vectors will be used for. Some models embed documents and
/// queries into asymmetric spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedTask {
    Document,
    Query,
}

/// Embedding backend. One vector per input text, fixed dimensionality.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts, preserving input order.
    async fn embed(&self, texts: &[String], task: EmbedTask) -> Result<Vec<Vec<f32>>>;
}

/// Embed `texts` in batches of `batch_size`, checking count and dimensionality.
pub async fn embed_batched(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
    task: EmbedTask,
) -> Result<Vec<Vec<f32>>> {
    let mut out = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let vectors = embedder.embed(batch, task).await?;
        if vectors.len() != batch.len() {
            bail!(
                "{} returned {} vectors for {} inputs",
                embedder.model_name(),
                vectors.len(),
                batch.len()
            );
        }
        for v in &vectors {
            if v.len() != embedder.dims() {
                bail!(
                    "{} returned a {}-dimensional vector, expected {}",
                    embedder.model_name(),
                    v.len(),
                    embedder.dims()
                );
            }
        }
        debug!(model = embedder.model_name(), batch = batch.len(), "embedded batch");
        out.extend(vectors);
    }
    Ok(out)
}

/// Embed a single query text.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    let results = embed_batched(embedder, &[text.to_string()], 1, EmbedTask::Query).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

/// Create the configured [`Embedder`].
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledEmbedder)),
        "openai" => Ok(Box::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Box::new(OllamaEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled Provider ============

/// A no-op embedder that always returns errors.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String], _task: EmbedTask) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

// ============ OpenAI Provider ============

/// Embedder using `POST /v1/embeddings`.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIEmbedder {
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            url,
            api_key,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String], _task: EmbedTask) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let request = self
            .client
            .post(format!("{}/v1/embeddings", self.url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&body);

        let json = send_with_backoff(request, self.max_retries, "OpenAI").await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        indexed.push((index, to_f32_vec(embedding)?));
    }
    indexed.sort_by_key(|(i, _)| *i);

    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedder using a local Ollama instance (default `http://localhost:11434`).
///
/// `nomic-embed-*` models are trained with task prefixes, which are added
/// automatically.
pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            url,
            max_retries: config.max_retries,
            client,
        })
    }

    fn prefixed(&self, texts: &[String], task: EmbedTask) -> Vec<String> {
        if !self.model.starts_with("nomic-embed") {
            return texts.to_vec();
        }
        let prefix = match task {
            EmbedTask::Document => "search_document: ",
            EmbedTask::Query => "search_query: ",
        };
        texts.iter().map(|t| format!("{}{}", prefix, t)).collect()
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String], task: EmbedTask) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": self.prefixed(texts, task),
        });
        let request = self
            .client
            .post(format!("{}/api/embed", self.url.trim_end_matches('/')))
            .json(&body);

        let json = send_with_backoff(request, self.max_retries, "Ollama")
            .await
            .with_context(|| format!("Ollama embedding failed (is Ollama running at {}?)", self.url))?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|e| {
            let values = e
                .as_array()
                .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))?;
            to_f32_vec(values)
        })
        .collect()
}

// ============ Shared HTTP plumbing ============

/// POST with exponential backoff on 429/5xx/network errors.
pub(crate) async fn send_with_backoff(
    request: reqwest::RequestBuilder,
    max_retries: u32,
    label: &str,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let req = request
            .try_clone()
            .ok_or_else(|| anyhow::anyhow!("{} request body cannot be retried", label))?;

        match req.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    warn!(attempt, %status, "{} API transient error", label);
                    last_err = Some(anyhow::anyhow!("{} API error {}: {}", label, status, body_text));
                    continue;
                }

                bail!("{} API error {}: {}", label, status, body_text);
            }
            Err(e) => {
                warn!(attempt, error = %e, "{} request failed", label);
                last_err = Some(e.into());
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} request failed after retries", label)))
}

fn to_f32_vec(values: &[serde_json::Value]) -> Result<Vec<f32>> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| anyhow::anyhow!("embedding element {} is not a number: {}", i, v))
        })
        .collect()
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use grounded_rag::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedEmbedder {
        dims: usize,
        extra: bool,
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed(&self, texts: &[String], _task: EmbedTask) -> Result<Vec<Vec<f32>>> {
            let mut out: Vec<Vec<f32>> = texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect();
            if self.extra {
                out.push(vec![0.0, 0.0]);
            }
            Ok(out)
        }
    }

    #[tokio::test]
    async fn test_batched_preserves_order() {
        let e = FixedEmbedder { dims: 2, extra: false };
        let texts: Vec<String> = (1..=5).map(|n| "x".repeat(n)).collect();
        let out = embed_batched(&e, &texts, 2, EmbedTask::Document).await.unwrap();
        let firsts: Vec<f32> = out.iter().map(|v| v[0]).collect();
        assert_eq!(firsts, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[tokio::test]
    async fn test_batched_rejects_count_mismatch() {
        let e = FixedEmbedder { dims: 2, extra: true };
        let err = embed_batched(&e, &["a".to_string()], 4, EmbedTask::Document)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("2 vectors for 1 inputs"));
    }

    #[tokio::test]
    async fn test_batched_rejects_wrong_dims() {
        let e = FixedEmbedder { dims: 3, extra: false };
        assert!(embed_query(&e, "q").await.is_err());
    }

    #[tokio::test]
    async fn test_disabled_errors() {
        let err = DisabledEmbedder
            .embed(&["x".to_string()], EmbedTask::Query)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }

    #[test]
    fn test_parse_openai_orders_by_index() {
        let json = json!({"data": [
            {"index": 1, "embedding": [2.0, 2.0]},
            {"index": 0, "embedding": [1.0, 1.0]}
        ]});
        let out = parse_openai_response(&json).unwrap();
        assert_eq!(out, vec![vec![1.0, 1.0], vec![2.0, 2.0]]);
    }

    #[test]
    fn test_parse_ollama() {
        let json = json!({"embeddings": [[0.5, 0.25]]});
        assert_eq!(parse_ollama_response(&json).unwrap(), vec![vec![0.5, 0.25]]);
        assert!(parse_ollama_response(&json!({})).is_err());
    }

    #[test]
    fn test_non_numeric_elements_rejected() {
        let ollama = json!({"embeddings": [[0.5, "0.25", null]]});
        let err = parse_ollama_response(&ollama).unwrap_err();
        assert!(err.to_string().contains("element 1"), "{}", err);

        let openai = json!({"data": [{"index": 0, "embedding": [0.1, null]}]});
        assert!(parse_openai_response(&openai).is_err());
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }
}
