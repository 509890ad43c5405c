//! Document ingestion orchestration.
//!
//! Coordinates the write path for one document:
//! extract → chunk → embed → replace vectors → persist chunk text.
//!
//! Re-ingesting a `(tenant, doc_id)` replaces the previous version. The
//! old vectors are swapped for the new ones in a single store operation, so
//! a failed write leaves the previous version searchable and chunks that no
//! longer exist do not linger in search results.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::chunk::make_chunks;
use crate::config::ChunkingConfig;
use crate::embedding::{embed_batched, EmbedTask, Embedder};
use crate::error::{RagError, Result, Stage, StageContext};
use crate::extract::Extractor;
use crate::models::{IndexRecord, IngestReport, TenantId};
use crate::store::{ChunkTextStore, VectorStore};
use crate::tenant::composite_id;

pub struct Ingestor {
    extractor: Arc<dyn Extractor>,
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    texts: Arc<dyn ChunkTextStore>,
    chunking: ChunkingConfig,
    batch_size: usize,
}

impl Ingestor {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        texts: Arc<dyn ChunkTextStore>,
        chunking: ChunkingConfig,
        batch_size: usize,
    ) -> Self {
        Self {
            extractor,
            embedder,
            vectors,
            texts,
            chunking,
            batch_size,
        }
    }

    /// Ingest `source_uri` as document `doc_id` of `tenant`.
    pub async fn ingest(
        &self,
        tenant: &TenantId,
        source_uri: &str,
        doc_id: &str,
    ) -> Result<IngestReport> {
        let doc_id = doc_id.trim();
        if doc_id.is_empty() {
            return Err(RagError::InvalidInput("doc_id cannot be empty".into()));
        }
        let job_id = Uuid::new_v4().to_string();

        let pages = self.extractor.extract_pages(source_uri).await?;
        let chunks = make_chunks(&pages, self.chunking.size, self.chunking.overlap)?;
        if chunks.is_empty() {
            return Err(RagError::Unextractable(source_uri.to_string()));
        }

        let inputs: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_batched(
            self.embedder.as_ref(),
            &inputs,
            self.batch_size,
            EmbedTask::Document,
        )
        .await
        .stage(Stage::Embed)?;

        let records: Vec<IndexRecord> = chunks
            .iter()
            .cloned()
            .zip(vectors)
            .map(|(chunk, vector)| IndexRecord {
                id: composite_id(tenant, doc_id, &chunk.chunk_id),
                tenant: tenant.clone(),
                doc_id: doc_id.to_string(),
                path: source_uri.trim().to_string(),
                chunk,
                vector,
            })
            .collect();

        let replaced = self
            .vectors
            .replace_document(tenant, doc_id, &records)
            .await
            .stage(Stage::Search)?;
        self.texts
            .persist_chunk_text(tenant, doc_id, &chunks)
            .await
            .stage(Stage::Storage)?;

        info!(
            job_id = %job_id,
            tenant = %tenant,
            doc_id,
            pages = pages.len(),
            chunks = chunks.len(),
            replaced,
            "ingested document"
        );

        Ok(IngestReport {
            job_id,
            doc_id: doc_id.to_string(),
            chunks: chunks.len(),
            ingested_at: Utc::now(),
        })
    }
}
