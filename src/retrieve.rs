//! Tenant-scoped retrieval: query → diverse, normalized hits.
//!
//! ```text
//! query ─embed─▶ vector search (tenant namespace, candidate_k)
//!       ─▶ tenant guard ─▶ hydrate full text ─▶ normalize
//!       ─▶ sort by score ─▶ MMR (top_k)
//! ```
//!
//! The tenant guard runs on every search regardless of whether the store
//! claims to filter by namespace itself.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::embedding::{embed_query, Embedder};
use crate::error::{RagError, Result, Stage, StageContext};
use crate::mmr::select_diverse;
use crate::models::{ChunkHit, RawHit, TenantId};
use crate::normalize::normalize;
use crate::store::{ChunkTextStore, VectorStore};
use crate::tenant::{retain_tenant, TenantFallback};

/// Upper bound on caller-supplied `top_k`.
pub const MAX_TOP_K: usize = 50;

#[derive(Debug, Clone, Copy)]
pub struct RetrievalParams {
    pub candidate_k: usize,
    pub top_k: usize,
    pub mmr_lambda: f64,
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    texts: Arc<dyn ChunkTextStore>,
    fallback: TenantFallback,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        texts: Arc<dyn ChunkTextStore>,
        fallback: TenantFallback,
    ) -> Self {
        Self {
            embedder,
            vectors,
            texts,
            fallback,
        }
    }

    /// Up to `params.top_k` hits for `query`, all owned by `tenant`.
    pub async fn search(
        &self,
        tenant: &TenantId,
        query: &str,
        params: RetrievalParams,
    ) -> Result<Vec<ChunkHit>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::InvalidInput("query cannot be empty".into()));
        }
        if params.top_k == 0 || params.top_k > MAX_TOP_K {
            return Err(RagError::InvalidInput(format!(
                "top_k must be between 1 and {}",
                MAX_TOP_K
            )));
        }
        let candidate_k = params.candidate_k.max(params.top_k);

        let query_vec = embed_query(self.embedder.as_ref(), query)
            .await
            .stage(Stage::Embed)?;

        if !self.vectors.enforces_tenant_filter() {
            warn!(tenant = %tenant, "vector store does not filter by namespace; relying on result guard");
        }
        let raw = self
            .vectors
            .search(tenant, &query_vec, candidate_k)
            .await
            .stage(Stage::Search)?;
        let returned = raw.len();

        let mut raw = retain_tenant(raw, tenant, self.fallback);
        self.hydrate(tenant, &mut raw).await?;

        let mut hits = normalize(&raw);
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        let selected = select_diverse(hits, params.mmr_lambda, params.top_k);

        debug!(
            tenant = %tenant,
            returned,
            kept = raw.len(),
            selected = selected.len(),
            "retrieval complete"
        );
        Ok(selected)
    }

    /// Fill `full_text` from the chunk-text store, one load per document.
    /// Text whose checksum differs from the hit's metadata belongs to a
    /// different version of the document and is not attached.
    async fn hydrate(&self, tenant: &TenantId, raw: &mut [RawHit]) -> Result<()> {
        let mut cache: HashMap<String, HashMap<String, String>> = HashMap::new();
        for hit in raw.iter_mut() {
            if hit
                .metadata
                .get("full_text")
                .and_then(|v| v.as_str())
                .is_some_and(|s| !s.is_empty())
            {
                continue;
            }
            let (Some(doc_id), Some(chunk_id)) = (
                hit.metadata.get("doc_id").and_then(|v| v.as_str()),
                hit.metadata.get("chunk_id").and_then(|v| v.as_str()),
            ) else {
                continue;
            };
            let (doc_id, chunk_id) = (doc_id.to_string(), chunk_id.to_string());

            if !cache.contains_key(&doc_id) {
                let texts = self
                    .texts
                    .load_chunk_text(tenant, &doc_id)
                    .await
                    .stage(Stage::Storage)?;
                cache.insert(doc_id.clone(), texts);
            }
            let expected = hit.metadata.get("checksum").and_then(|v| v.as_str());
            if let Some(text) = cache.get(&doc_id).and_then(|m| m.get(&chunk_id)) {
                if expected == Some(crate::chunk::checksum(text).as_str()) {
                    hit.metadata
                        .insert("full_text".into(), text.clone().into());
                } else {
                    debug!(doc_id = %doc_id, chunk_id = %chunk_id, "stale chunk text skipped");
                }
            }
        }
        Ok(())
    }
}
