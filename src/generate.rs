//! Text generation collaborator.
//!
//! A [`Generator`] turns one prompt into one completion. It knows nothing
//! about citations or retries; [`crate::grounding`] layers those on top.
//!
//! Providers:
//! - **[`DisabledGenerator`]**: always errors.
//! - **[`OpenAIGenerator`]**: `POST /v1/chat/completions` with JSON mode.
//! - **[`OllamaGenerator`]**: `POST /api/generate` with `format: "json"`.
//!
//! Transport retries (429/5xx/network) use the same exponential backoff as
//! the embedding providers.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::embedding::send_with_backoff;

/// Per-call sampling parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_output_tokens: 800,
        }
    }
}

impl From<&GenerationConfig> for SamplingConfig {
    fn from(cfg: &GenerationConfig) -> Self {
        Self {
            temperature: cfg.temperature,
            max_output_tokens: cfg.max_output_tokens,
        }
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// One completion for `prompt`. Returns the raw model text.
    async fn generate(&self, prompt: &str, sampling: &SamplingConfig) -> Result<String>;

    /// Provider name for logging.
    fn name(&self) -> &str;

    /// Model identifier.
    fn model(&self) -> &str;
}

pub fn create_generator(config: &GenerationConfig) -> Result<Box<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledGenerator)),
        "openai" => Ok(Box::new(OpenAIGenerator::new(config)?)),
        "ollama" => Ok(Box::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    async fn generate(&self, _prompt: &str, _sampling: &SamplingConfig) -> Result<String> {
        bail!("Generation provider is disabled")
    }
    fn name(&self) -> &str {
        "disabled"
    }
    fn model(&self) -> &str {
        "disabled"
    }
}

/// Chat-completions generator. Requires `OPENAI_API_KEY`.
pub struct OpenAIGenerator {
    model: String,
    url: String,
    api_key: String,
    client: reqwest::Client,
}

/// Transport retries for generation calls. Citation retries are separate.
const GENERATION_TRANSPORT_RETRIES: u32 = 2;

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;
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
            url,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    async fn generate(&self, prompt: &str, sampling: &SamplingConfig) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": sampling.temperature,
            "max_tokens": sampling.max_output_tokens,
            "response_format": {"type": "json_object"},
        });
        let request = self
            .client
            .post(format!(
                "{}/v1/chat/completions",
                self.url.trim_end_matches('/')
            ))
            .bearer_auth(&self.api_key)
            .json(&body);

        let json = send_with_backoff(request, GENERATION_TRANSPORT_RETRIES, "OpenAI").await?;
        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing message content"))
    }
    fn name(&self) -> &str {
        "openai"
    }
    fn model(&self) -> &str {
        &self.model
    }
}

/// Local Ollama generator (default `http://localhost:11434`).
pub struct OllamaGenerator {
    model: String,
    url: String,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { model, url, client })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, prompt: &str, sampling: &SamplingConfig) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "format": "json",
            "options": {
                "temperature": sampling.temperature,
                "num_predict": sampling.max_output_tokens,
            },
        });
        let request = self
            .client
            .post(format!("{}/api/generate", self.url.trim_end_matches('/')))
            .json(&body);

        let json = send_with_backoff(request, GENERATION_TRANSPORT_RETRIES, "Ollama").await?;
        json.get("response")
            .and_then(|r| r.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing response field"))
    }
    fn name(&self) -> &str {
        "ollama"
    }
    fn model(&self) -> &str {
        &self.model
    }
}
