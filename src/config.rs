//! TOML configuration.
//!
//! Every section has defaults, so an empty file is a valid (if offline)
//! configuration. API keys are read from the environment, never from the
//! file.
//!
//! ```toml
//! [db]
//! path = "./data/grag.sqlite"
//!
//! [chunking]
//! size = 1400
//! overlap = 160
//!
//! [retrieval]
//! candidate_k = 30
//! top_k = 15
//! mmr_lambda = 0.6
//!
//! [tenancy]
//! fallback = "reject"        # or "id_prefix"
//!
//! [embedding]
//! provider = "openai"        # disabled | openai | ollama
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [generation]
//! provider = "openai"        # disabled | openai | ollama
//! model = "gpt-4o-mini"
//! max_citation_retries = 2
//! retry_strategy = "fixed"   # or "escalating"
//! citation_fallback = "reject"  # or "cite_all_hits"
//!
//! [server]
//! bind = "127.0.0.1:8080"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::chunk::{validate_window, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::error::{RagError, Result};
use crate::grounding::{CitationFallback, RetryStrategyKind};
use crate::mmr::DEFAULT_LAMBDA;
use crate::retrieve::MAX_TOP_K;
use crate::tenant::TenantFallback;

/// Upper bound on `generation.max_citation_retries`.
pub const MAX_CITATION_RETRIES: u32 = 10;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub tenancy: TenancyConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/grag.sqlite"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Window size in characters.
    #[serde(default = "default_chunk_size")]
    pub size: usize,
    /// Characters shared by consecutive windows.
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Nearest neighbors requested from the vector store.
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    /// Hits kept after MMR when the caller does not say.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_mmr_lambda")]
    pub mmr_lambda: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_k: default_candidate_k(),
            top_k: default_top_k(),
            mmr_lambda: DEFAULT_LAMBDA,
        }
    }
}

fn default_candidate_k() -> usize {
    30
}
fn default_top_k() -> usize {
    15
}
fn default_mmr_lambda() -> f64 {
    DEFAULT_LAMBDA
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TenancyConfig {
    #[serde(default)]
    pub fallback: TenantFallback,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama, or an OpenAI-compatible gateway).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Extra attempts when the answer comes back without valid citations.
    #[serde(default = "default_citation_retries")]
    pub max_citation_retries: u32,
    #[serde(default)]
    pub retry_strategy: RetryStrategyKind,
    #[serde(default)]
    pub citation_fallback: CitationFallback,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            max_citation_retries: default_citation_retries(),
            retry_strategy: RetryStrategyKind::default(),
            citation_fallback: CitationFallback::default(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_temperature() -> f32 {
    0.3
}
fn default_max_output_tokens() -> u32 {
    800
}
fn default_citation_retries() -> u32 {
    2
}
fn default_generation_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl Config {
    /// Defaults for every section, with providers disabled.
    pub fn minimal() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        validate_window(self.chunking.size, self.chunking.overlap)?;

        if self.retrieval.top_k == 0 || self.retrieval.top_k > MAX_TOP_K {
            return Err(RagError::Config(format!(
                "retrieval.top_k must be between 1 and {}",
                MAX_TOP_K
            )));
        }
        if self.retrieval.candidate_k < self.retrieval.top_k {
            return Err(RagError::Config(
                "retrieval.candidate_k must be >= retrieval.top_k".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retrieval.mmr_lambda) {
            return Err(RagError::Config(
                "retrieval.mmr_lambda must be in [0.0, 1.0]".into(),
            ));
        }

        match self.embedding.provider.as_str() {
            "disabled" | "openai" | "ollama" => {}
            other => {
                return Err(RagError::Config(format!(
                    "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
                    other
                )))
            }
        }
        if self.embedding.is_enabled() {
            if self.embedding.model.is_none() {
                return Err(RagError::Config(format!(
                    "embedding.model must be specified when provider is '{}'",
                    self.embedding.provider
                )));
            }
            if matches!(self.embedding.dims, None | Some(0)) {
                return Err(RagError::Config(format!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    self.embedding.provider
                )));
            }
            if self.embedding.batch_size == 0 {
                return Err(RagError::Config("embedding.batch_size must be > 0".into()));
            }
        }

        match self.generation.provider.as_str() {
            "disabled" | "openai" | "ollama" => {}
            other => {
                return Err(RagError::Config(format!(
                    "Unknown generation provider: '{}'. Must be disabled, openai, or ollama.",
                    other
                )))
            }
        }
        if self.generation.is_enabled() && self.generation.model.is_none() {
            return Err(RagError::Config(format!(
                "generation.model must be specified when provider is '{}'",
                self.generation.provider
            )));
        }
        if self.generation.max_citation_retries > MAX_CITATION_RETRIES {
            return Err(RagError::Config(format!(
                "generation.max_citation_retries must be <= {}",
                MAX_CITATION_RETRIES
            )));
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(RagError::Config(
                "generation.temperature must be in [0.0, 2.0]".into(),
            ));
        }

        Ok(())
    }
}

/// Parse a TOML string and validate it.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)
        .map_err(|e| RagError::Config(format!("Failed to parse config file: {}", e)))?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        RagError::Config(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.chunking.size, 1400);
        assert_eq!(cfg.chunking.overlap, 160);
        assert_eq!(cfg.retrieval.candidate_k, 30);
        assert_eq!(cfg.retrieval.top_k, 15);
        assert!((cfg.retrieval.mmr_lambda - 0.6).abs() < 1e-12);
        assert_eq!(cfg.generation.max_citation_retries, 2);
        assert_eq!(cfg.tenancy.fallback, TenantFallback::Reject);
        assert_eq!(cfg.generation.retry_strategy, RetryStrategyKind::Fixed);
        assert_eq!(cfg.generation.citation_fallback, CitationFallback::Reject);
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        let err = parse_config("[chunking]\nsize = 100\noverlap = 100\n").unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
    }

    #[test]
    fn top_k_above_request_limit_rejected() {
        let err = parse_config("[retrieval]\ncandidate_k = 100\ntop_k = 51\n").unwrap_err();
        assert!(matches!(err, RagError::Config(ref m) if m.contains("top_k")));

        let cfg = parse_config("[retrieval]\ncandidate_k = 100\ntop_k = 50\n").unwrap();
        assert_eq!(cfg.retrieval.top_k, MAX_TOP_K);
    }

    #[test]
    fn citation_retries_are_bounded() {
        let err = parse_config("[generation]\nmax_citation_retries = 4294967295\n").unwrap_err();
        assert!(matches!(err, RagError::Config(ref m) if m.contains("max_citation_retries")));

        let cfg = parse_config("[generation]\nmax_citation_retries = 10\n").unwrap();
        assert_eq!(cfg.generation.max_citation_retries, MAX_CITATION_RETRIES);
    }

    #[test]
    fn lambda_out_of_range_rejected() {
        let err = parse_config("[retrieval]\nmmr_lambda = 1.5\n").unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
    }

    #[test]
    fn enabled_embedding_requires_model_and_dims() {
        assert!(parse_config("[embedding]\nprovider = \"openai\"\n").is_err());
        assert!(parse_config("[embedding]\nprovider = \"openai\"\nmodel = \"m\"\n").is_err());
        assert!(
            parse_config("[embedding]\nprovider = \"openai\"\nmodel = \"m\"\ndims = 8\n").is_ok()
        );
    }

    #[test]
    fn unknown_provider_rejected() {
        assert!(parse_config("[generation]\nprovider = \"magic\"\n").is_err());
    }

    #[test]
    fn enum_sections_parse() {
        let cfg = parse_config(
            "[tenancy]\nfallback = \"id_prefix\"\n[generation]\nretry_strategy = \"escalating\"\ncitation_fallback = \"cite_all_hits\"\n",
        )
        .unwrap();
        assert_eq!(cfg.tenancy.fallback, TenantFallback::IdPrefix);
        assert_eq!(cfg.generation.retry_strategy, RetryStrategyKind::Escalating);
        assert_eq!(cfg.generation.citation_fallback, CitationFallback::CiteAllHits);
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = load_config(Path::new("/nonexistent/grag.toml")).unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
    }
}
