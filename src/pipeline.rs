//! The assembled pipeline: ingest, search, ask.
//!
//! [`RagPipeline`] owns one of each collaborator and is cheap to share
//! behind an `Arc`. Per-request state stays inside each call.

use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::error::{RagError, Result, Stage};
use crate::extract::{Extractor, FsExtractor};
use crate::generate::{create_generator, Generator, SamplingConfig};
use crate::grounding::GroundedGenerator;
use crate::ingest::Ingestor;
use crate::models::{ChatResponse, ChunkHit, IngestReport, TenantId};
use crate::retrieve::{RetrievalParams, Retriever};
use crate::store::{ChunkTextStore, SqliteStore, VectorStore};

/// Collaborators the pipeline is built from.
pub struct Components {
    pub extractor: Arc<dyn Extractor>,
    pub embedder: Arc<dyn Embedder>,
    pub vectors: Arc<dyn VectorStore>,
    pub texts: Arc<dyn ChunkTextStore>,
    pub generator: Arc<dyn Generator>,
}

pub struct RagPipeline {
    ingestor: Ingestor,
    retriever: Retriever,
    grounded: GroundedGenerator,
    defaults: RetrievalParams,
}

impl RagPipeline {
    pub fn new(config: &Config, components: Components) -> Self {
        let Components {
            extractor,
            embedder,
            vectors,
            texts,
            generator,
        } = components;

        let ingestor = Ingestor::new(
            extractor,
            embedder.clone(),
            vectors.clone(),
            texts.clone(),
            config.chunking.clone(),
            config.embedding.batch_size,
        );
        let retriever = Retriever::new(embedder, vectors, texts, config.tenancy.fallback);
        let grounded = GroundedGenerator::new(generator)
            .with_sampling(SamplingConfig::from(&config.generation))
            .with_max_retries(config.generation.max_citation_retries)
            .with_strategy(config.generation.retry_strategy.build())
            .with_fallback(config.generation.citation_fallback);

        Self {
            ingestor,
            retriever,
            grounded,
            defaults: RetrievalParams {
                candidate_k: config.retrieval.candidate_k,
                top_k: config.retrieval.top_k,
                mmr_lambda: config.retrieval.mmr_lambda,
            },
        }
    }

    /// Build the configured providers over a SQLite store.
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(
            SqliteStore::open(&config.db.path)
                .await
                .map_err(|e| RagError::upstream(Stage::Storage, e))?,
        );
        let embedder: Arc<dyn Embedder> = create_embedder(&config.embedding)
            .map_err(|e| RagError::Config(format!("{:#}", e)))?
            .into();
        let generator: Arc<dyn Generator> = create_generator(&config.generation)
            .map_err(|e| RagError::Config(format!("{:#}", e)))?
            .into();

        Ok(Self::new(
            config,
            Components {
                extractor: Arc::new(FsExtractor),
                embedder,
                vectors: store.clone(),
                texts: store,
                generator,
            },
        ))
    }

    pub async fn ingest(
        &self,
        tenant: &TenantId,
        source_uri: &str,
        doc_id: &str,
    ) -> Result<IngestReport> {
        self.ingestor.ingest(tenant, source_uri, doc_id).await
    }

    /// Diverse hits for `query`. `top_k` defaults to `retrieval.top_k`.
    pub async fn search(
        &self,
        tenant: &TenantId,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<ChunkHit>> {
        let params = RetrievalParams {
            top_k: top_k.unwrap_or(self.defaults.top_k),
            ..self.defaults
        };
        self.retriever.search(tenant, query, params).await
    }

    /// Search, then answer with validated citations.
    pub async fn ask(
        &self,
        tenant: &TenantId,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<ChatResponse> {
        let start = Instant::now();
        let hits = self.search(tenant, query, top_k).await?;
        if hits.is_empty() {
            return Err(RagError::NoRelevantContent);
        }
        let answer = self.grounded.generate(query, &hits).await?;
        let latency_ms = start.elapsed().as_millis() as u64;

        info!(
            tenant = %tenant,
            hits = hits.len(),
            citations = answer.citations.len(),
            latency_ms,
            "answered query"
        );
        Ok(ChatResponse {
            answer: answer.answer,
            citations: answer.citations,
            latency_ms,
        })
    }
}
