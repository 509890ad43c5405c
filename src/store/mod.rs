//! Storage seams: the vector index and the chunk-text store.
//!
//! Both are traits so the pipeline can run against SQLite on disk, an
//! in-memory store in tests, or a hosted index behind the same contract.
//!
//! | Trait | Method | Purpose |
//! |-------|--------|---------|
//! | [`VectorStore`] | [`upsert`](VectorStore::upsert) | Insert or replace records by `(tenant, id)` |
//! | | [`replace_document`](VectorStore::replace_document) | Atomically swap every record of one document |
//! | | [`search`](VectorStore::search) | Nearest neighbors within one tenant namespace |
//! | | [`delete_document`](VectorStore::delete_document) | Drop every record of one document |
//! | [`ChunkTextStore`] | [`persist_chunk_text`](ChunkTextStore::persist_chunk_text) | Replace a document's full chunk texts |
//! | | [`load_chunk_text`](ChunkTextStore::load_chunk_text) | `chunk_id → text` for one document |
//!
//! Records are keyed by tenant plus datapoint id, so two tenants can never
//! overwrite each other even when their composite ids collide.
//!
//! Search results report a cosine *distance* (`1 − cosine similarity`),
//! smaller is closer. Metadata is returned verbatim as written at upsert.

pub mod memory;
pub mod sqlite;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, IndexRecord, RawHit, TenantId};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, records: &[IndexRecord]) -> Result<()>;

    /// Remove every record of `(tenant, doc_id)` and insert `records` as
    /// one unit: on error the previous records are left in place.
    ///
    /// Every record must belong to `tenant` and `doc_id`. Returns the number
    /// of records removed.
    async fn replace_document(
        &self,
        tenant: &TenantId,
        doc_id: &str,
        records: &[IndexRecord],
    ) -> Result<usize>;

    /// Up to `limit` nearest records, closest first.
    async fn search(&self, tenant: &TenantId, query: &[f32], limit: usize) -> Result<Vec<RawHit>>;

    /// Returns the number of records removed.
    async fn delete_document(&self, tenant: &TenantId, doc_id: &str) -> Result<usize>;

    /// Whether [`search`](VectorStore::search) restricts results to the
    /// tenant namespace. Results are re-checked either way.
    fn enforces_tenant_filter(&self) -> bool {
        true
    }
}

#[async_trait]
pub trait ChunkTextStore: Send + Sync {
    async fn persist_chunk_text(&self, tenant: &TenantId, doc_id: &str, chunks: &[Chunk])
        -> Result<()>;

    async fn load_chunk_text(&self, tenant: &TenantId, doc_id: &str)
        -> Result<HashMap<String, String>>;
}

/// Reject records that do not belong to `(tenant, doc_id)`.
pub(crate) fn check_document_records(
    tenant: &TenantId,
    doc_id: &str,
    records: &[IndexRecord],
) -> Result<()> {
    if let Some(rec) = records
        .iter()
        .find(|r| &r.tenant != tenant || r.doc_id != doc_id)
    {
        anyhow::bail!(
            "record {} belongs to {}/{}, not {}/{}",
            rec.id,
            rec.tenant,
            rec.doc_id,
            tenant,
            doc_id
        );
    }
    Ok(())
}

/// Cosine distance in `[0.0, 2.0]`.
pub(crate) fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    1.0 - crate::embedding::cosine_similarity(a, b) as f64
}

/// Closest first.
pub(crate) fn sort_by_distance(hits: &mut [RawHit]) {
    hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
}
