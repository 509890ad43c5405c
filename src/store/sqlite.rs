//! SQLite-backed stores.
//!
//! Vectors live in `chunk_vectors` as little-endian `f32` BLOBs next to
//! their JSON metadata. Search loads the tenant's rows and ranks them by
//! brute-force cosine distance.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::models::{Chunk, IndexRecord, RawHit, TenantId};

use super::{
    check_document_records, cosine_distance, sort_by_distance, ChunkTextStore, VectorStore,
};

/// Implements both [`VectorStore`] and [`ChunkTextStore`] over one pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Wrap an existing pool. Tables must already exist.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `path` and run migrations.
    pub async fn open(path: &std::path::Path) -> Result<Self> {
        let pool = crate::db::connect(path).await?;
        crate::migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Number of indexed chunks for `tenant`.
    pub async fn count(&self, tenant: &TenantId) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors WHERE tenant_id = ?")
            .bind(tenant.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

async fn insert_vectors(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    records: &[IndexRecord],
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    for rec in records {
        let metadata_json = serde_json::to_string(&rec.metadata())?;
        sqlx::query(
            r#"
            INSERT INTO chunk_vectors (id, tenant_id, doc_id, chunk_id, metadata_json, dims, embedding, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(tenant_id, id) DO UPDATE SET
                doc_id = excluded.doc_id,
                chunk_id = excluded.chunk_id,
                metadata_json = excluded.metadata_json,
                dims = excluded.dims,
                embedding = excluded.embedding,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&rec.id)
        .bind(rec.tenant.as_str())
        .bind(&rec.doc_id)
        .bind(&rec.chunk.chunk_id)
        .bind(&metadata_json)
        .bind(rec.vector.len() as i64)
        .bind(vec_to_blob(&rec.vector))
        .bind(now)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn upsert(&self, records: &[IndexRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_vectors(&mut tx, records).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn replace_document(
        &self,
        tenant: &TenantId,
        doc_id: &str,
        records: &[IndexRecord],
    ) -> Result<usize> {
        check_document_records(tenant, doc_id, records)?;
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM chunk_vectors WHERE tenant_id = ? AND doc_id = ?")
            .bind(tenant.as_str())
            .bind(doc_id)
            .execute(&mut *tx)
            .await?
            .rows_affected() as usize;
        insert_vectors(&mut tx, records).await?;

        tx.commit().await?;
        Ok(removed)
    }

    async fn search(&self, tenant: &TenantId, query: &[f32], limit: usize) -> Result<Vec<RawHit>> {
        let rows = sqlx::query(
            "SELECT id, metadata_json, embedding FROM chunk_vectors WHERE tenant_id = ?",
        )
        .bind(tenant.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<RawHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let metadata_json: String = row.get("metadata_json");
                // A corrupt metadata column degrades to empty metadata;
                // the tenant guard then rejects the row.
                let metadata = serde_json::from_str::<serde_json::Value>(&metadata_json)
                    .ok()
                    .and_then(|v| v.as_object().cloned())
                    .unwrap_or_default();
                RawHit {
                    id: row.get("id"),
                    distance: cosine_distance(query, &blob_to_vec(&blob)),
                    metadata,
                }
            })
            .collect();

        sort_by_distance(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete_document(&self, tenant: &TenantId, doc_id: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM chunk_vectors WHERE tenant_id = ? AND doc_id = ?")
            .bind(tenant.as_str())
            .bind(doc_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}

#[async_trait]
impl ChunkTextStore for SqliteStore {
    async fn persist_chunk_text(
        &self,
        tenant: &TenantId,
        doc_id: &str,
        chunks: &[Chunk],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunk_texts WHERE tenant_id = ? AND doc_id = ?")
            .bind(tenant.as_str())
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunk_texts (tenant_id, doc_id, chunk_id, page, checksum, text) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(tenant.as_str())
            .bind(doc_id)
            .bind(&chunk.chunk_id)
            .bind(chunk.page as i64)
            .bind(&chunk.checksum)
            .bind(&chunk.text)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load_chunk_text(
        &self,
        tenant: &TenantId,
        doc_id: &str,
    ) -> Result<HashMap<String, String>> {
        let rows = sqlx::query(
            "SELECT chunk_id, text FROM chunk_texts WHERE tenant_id = ? AND doc_id = ?",
        )
        .bind(tenant.as_str())
        .bind(doc_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                (
                    row.get::<String, _>("chunk_id"),
                    row.get::<String, _>("text"),
                )
            })
            .collect())
    }
}
