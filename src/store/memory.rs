//! In-memory stores for tests and ephemeral runs.
//!
//! Uses `HashMap` behind `std::sync::RwLock`. Vector search is brute-force
//! cosine distance over every stored vector.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{Chunk, IndexRecord, RawHit, TenantId};

use super::{
    check_document_records, cosine_distance, sort_by_distance, ChunkTextStore, VectorStore,
};

/// `(tenant, datapoint id)`.
type VectorKey = (String, String);

struct StoredVector {
    doc_id: String,
    vector: Vec<f32>,
    metadata: serde_json::Map<String, serde_json::Value>,
}

/// Implements both [`VectorStore`] and [`ChunkTextStore`].
pub struct InMemoryStore {
    vectors: RwLock<HashMap<VectorKey, StoredVector>>,
    texts: RwLock<HashMap<(String, String), HashMap<String, String>>>,
    namespace_filter: bool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            vectors: RwLock::new(HashMap::new()),
            texts: RwLock::new(HashMap::new()),
            namespace_filter: true,
        }
    }

    /// A store whose search ignores the tenant namespace, like an index
    /// deployed without namespace restrictions.
    pub fn without_namespace_filter() -> Self {
        Self {
            namespace_filter: false,
            ..Self::new()
        }
    }

    /// Insert a record with arbitrary metadata, bypassing [`IndexRecord`].
    ///
    /// Lets tests reproduce records written by other indexers.
    pub fn insert_raw(
        &self,
        id: &str,
        tenant: &str,
        doc_id: &str,
        vector: Vec<f32>,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        self.write_vectors()?.insert(
            (tenant.to_string(), id.to_string()),
            StoredVector {
                doc_id: doc_id.to_string(),
                vector,
                metadata,
            },
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.vectors.read().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_vectors(&self) -> Result<RwLockReadGuard<'_, HashMap<VectorKey, StoredVector>>> {
        self.vectors.read().map_err(|_| anyhow!("vector store lock poisoned"))
    }

    fn write_vectors(&self) -> Result<RwLockWriteGuard<'_, HashMap<VectorKey, StoredVector>>> {
        self.vectors.write().map_err(|_| anyhow!("vector store lock poisoned"))
    }
}

fn stored(rec: &IndexRecord) -> (VectorKey, StoredVector) {
    (
        (rec.tenant.as_str().to_string(), rec.id.clone()),
        StoredVector {
            doc_id: rec.doc_id.clone(),
            vector: rec.vector.clone(),
            metadata: rec.metadata(),
        },
    )
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn upsert(&self, records: &[IndexRecord]) -> Result<()> {
        let mut vectors = self.write_vectors()?;
        vectors.extend(records.iter().map(stored));
        Ok(())
    }

    async fn replace_document(
        &self,
        tenant: &TenantId,
        doc_id: &str,
        records: &[IndexRecord],
    ) -> Result<usize> {
        check_document_records(tenant, doc_id, records)?;
        let mut vectors = self.write_vectors()?;
        let before = vectors.len();
        vectors.retain(|(t, _), sv| !(t == tenant.as_str() && sv.doc_id == doc_id));
        let removed = before - vectors.len();
        vectors.extend(records.iter().map(stored));
        Ok(removed)
    }

    async fn search(&self, tenant: &TenantId, query: &[f32], limit: usize) -> Result<Vec<RawHit>> {
        let vectors = self.read_vectors()?;
        let mut hits: Vec<RawHit> = vectors
            .iter()
            .filter(|((t, _), _)| !self.namespace_filter || t == tenant.as_str())
            .map(|((_, id), sv)| RawHit {
                id: id.clone(),
                distance: cosine_distance(query, &sv.vector),
                metadata: sv.metadata.clone(),
            })
            .collect();
        sort_by_distance(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete_document(&self, tenant: &TenantId, doc_id: &str) -> Result<usize> {
        let mut vectors = self.write_vectors()?;
        let before = vectors.len();
        vectors.retain(|(t, _), sv| !(t == tenant.as_str() && sv.doc_id == doc_id));
        Ok(before - vectors.len())
    }

    fn enforces_tenant_filter(&self) -> bool {
        self.namespace_filter
    }
}

#[async_trait]
impl ChunkTextStore for InMemoryStore {
    async fn persist_chunk_text(
        &self,
        tenant: &TenantId,
        doc_id: &str,
        chunks: &[Chunk],
    ) -> Result<()> {
        let texts = chunks
            .iter()
            .map(|c| (c.chunk_id.clone(), c.text.clone()))
            .collect();
        self.texts
            .write()
            .map_err(|_| anyhow!("chunk text lock poisoned"))?
            .insert((tenant.as_str().to_string(), doc_id.to_string()), texts);
        Ok(())
    }

    async fn load_chunk_text(
        &self,
        tenant: &TenantId,
        doc_id: &str,
    ) -> Result<HashMap<String, String>> {
        let texts = self
            .texts
            .read()
            .map_err(|_| anyhow!("chunk text lock poisoned"))?;
        Ok(texts
            .get(&(tenant.as_str().to_string(), doc_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}
