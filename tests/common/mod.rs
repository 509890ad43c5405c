//! Stub collaborators shared by the integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use grounded_rag::config::Config;
use grounded_rag::embedding::{EmbedTask, Embedder};
use grounded_rag::extract::FsExtractor;
use grounded_rag::generate::{Generator, SamplingConfig};
use grounded_rag::pipeline::{Components, RagPipeline};
use grounded_rag::models::{Chunk, IndexRecord, RawHit, TenantId};
use grounded_rag::store::{ChunkTextStore, InMemoryStore, VectorStore};

pub const DIMS: usize = 64;

/// Deterministic bag-of-words embedder: each lowercase alphanumeric token
/// is hashed (FNV-1a) into one of `DIMS` buckets.
pub struct HashEmbedder;

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-bow"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, texts: &[String], _task: EmbedTask) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| bag_of_words(t)).collect())
    }
}

fn bag_of_words(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let mut h: u64 = 0xcbf29ce484222325;
        for b in token.to_lowercase().bytes() {
            h ^= b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        v[(h % DIMS as u64) as usize] += 1.0;
    }
    v
}

/// Cites the first chunk section of every prompt it receives.
#[derive(Default)]
pub struct CitingGenerator {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Generator for CitingGenerator {
    async fn generate(&self, prompt: &str, _sampling: &SamplingConfig) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let field = |name: &str| {
            prompt
                .lines()
                .find_map(|l| l.strip_prefix(&format!("{}: ", name)))
                .unwrap_or_default()
                .to_string()
        };
        Ok(serde_json::json!({
            "answer": format!("According to {}, the answer is in the handbook.", field("doc_id")),
            "cited_chunks": [{
                "doc_id": field("doc_id"),
                "page": field("page"),
                "path": field("path"),
                "chunk_id": field("chunk_id"),
                "checksum": field("checksum"),
            }]
        })
        .to_string())
    }
    fn name(&self) -> &str {
        "citing"
    }
    fn model(&self) -> &str {
        "stub"
    }
}

/// Answers without ever citing anything.
#[derive(Default)]
pub struct UncitedGenerator {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Generator for UncitedGenerator {
    async fn generate(&self, _prompt: &str, _sampling: &SamplingConfig) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(r#"{"answer": "Trust me.", "cited_chunks": []}"#.to_string())
    }
    fn name(&self) -> &str {
        "uncited"
    }
    fn model(&self) -> &str {
        "stub"
    }
}

/// In-memory store whose writes can be switched to fail.
#[derive(Default)]
pub struct FailingStore {
    pub inner: InMemoryStore,
    pub fail_vectors: AtomicBool,
    pub fail_texts: AtomicBool,
}

#[async_trait]
impl VectorStore for FailingStore {
    async fn upsert(&self, records: &[IndexRecord]) -> Result<()> {
        if self.fail_vectors.load(Ordering::SeqCst) {
            anyhow::bail!("vector write refused");
        }
        self.inner.upsert(records).await
    }
    async fn replace_document(
        &self,
        tenant: &TenantId,
        doc_id: &str,
        records: &[IndexRecord],
    ) -> Result<usize> {
        if self.fail_vectors.load(Ordering::SeqCst) {
            anyhow::bail!("vector write refused");
        }
        self.inner.replace_document(tenant, doc_id, records).await
    }
    async fn search(&self, tenant: &TenantId, query: &[f32], limit: usize) -> Result<Vec<RawHit>> {
        self.inner.search(tenant, query, limit).await
    }
    async fn delete_document(&self, tenant: &TenantId, doc_id: &str) -> Result<usize> {
        self.inner.delete_document(tenant, doc_id).await
    }
}

#[async_trait]
impl ChunkTextStore for FailingStore {
    async fn persist_chunk_text(
        &self,
        tenant: &TenantId,
        doc_id: &str,
        chunks: &[Chunk],
    ) -> Result<()> {
        if self.fail_texts.load(Ordering::SeqCst) {
            anyhow::bail!("chunk text write refused");
        }
        self.inner.persist_chunk_text(tenant, doc_id, chunks).await
    }
    async fn load_chunk_text(
        &self,
        tenant: &TenantId,
        doc_id: &str,
    ) -> Result<HashMap<String, String>> {
        self.inner.load_chunk_text(tenant, doc_id).await
    }
}

pub fn test_config() -> Config {
    let mut cfg = Config::minimal();
    cfg.chunking.size = 120;
    cfg.chunking.overlap = 20;
    cfg.retrieval.candidate_k = 20;
    cfg.retrieval.top_k = 5;
    cfg
}

pub fn pipeline<S>(store: Arc<S>, generator: Arc<dyn Generator>) -> RagPipeline
where
    S: VectorStore + ChunkTextStore + 'static,
{
    RagPipeline::new(
        &test_config(),
        Components {
            extractor: Arc::new(FsExtractor),
            embedder: Arc::new(HashEmbedder),
            vectors: store.clone(),
            texts: store,
            generator,
        },
    )
}

pub fn memory_pipeline(generator: Arc<dyn Generator>) -> (Arc<InMemoryStore>, RagPipeline) {
    let store = Arc::new(InMemoryStore::new());
    let p = pipeline(store.clone(), generator);
    (store, p)
}

pub fn write_doc(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path.to_string_lossy().to_string()
}

pub const REFUND_POLICY: &str = "Refund policy. Guests who cancel at least 24 hours before \
check-in receive a full refund. Cancellations within 24 hours are charged one night. \
No-shows are charged the full stay.";

pub const CHECKIN_GUIDE: &str = "Check-in guide. Check-in starts at three in the afternoon. \
The key box code is sent by email on the morning of arrival. Quiet hours begin at ten at night.";
