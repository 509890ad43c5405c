//! Core data models used throughout the pipeline.
//!
//! These types represent the pages, chunks, hits, and citations that flow
//! through ingestion, retrieval, and grounded generation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// An isolation boundary. All ingested content and all queries carry one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Validate and wrap a tenant identifier. Surrounding whitespace is
    /// trimmed; an empty result is rejected.
    pub fn new(raw: impl AsRef<str>) -> Result<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(RagError::InvalidInput("tenant_id cannot be empty".into()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TenantId {
    type Error = RagError;

    fn try_from(value: String) -> Result<Self> {
        TenantId::new(value)
    }
}

impl From<TenantId> for String {
    fn from(value: TenantId) -> Self {
        value.0
    }
}

/// Text of one physical page, produced by the extraction collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub page_num: u32,
    pub text: String,
}

/// A fixed-size, checksummed substring of a page. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub text: String,
    pub page: u32,
    /// `sha256:<hex>` of `text`.
    pub checksum: String,
    /// First 200 characters of `text`.
    pub preview_text: String,
}

/// A candidate passage for one query. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkHit {
    pub chunk_id: String,
    pub doc_id: String,
    pub page: u32,
    pub path: String,
    pub checksum: String,
    pub preview_text: String,
    /// Relevance in `[0.0, 1.0]`.
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_text: Option<String>,
}

impl ChunkHit {
    /// The text handed to the generator: full text when known, else the preview.
    pub fn context_text(&self) -> &str {
        match &self.full_text {
            Some(t) if !t.is_empty() => t,
            _ => &self.preview_text,
        }
    }
}

/// A reference from an answer back to a supplied hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub doc_id: String,
    pub page: u32,
    pub path: String,
    pub chunk_id: String,
    pub checksum: String,
}

impl From<&ChunkHit> for Citation {
    fn from(hit: &ChunkHit) -> Self {
        Citation {
            doc_id: hit.doc_id.clone(),
            page: hit.page,
            path: hit.path.clone(),
            chunk_id: hit.chunk_id.clone(),
            checksum: hit.checksum.clone(),
        }
    }
}

/// Answer text plus its non-empty, validated citation list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedAnswer {
    pub answer: String,
    pub citations: Vec<Citation>,
}

/// Raw nearest-neighbor result as returned by a vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct RawHit {
    pub id: String,
    pub distance: f64,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// One vector upsert unit.
#[derive(Debug, Clone)]
pub struct IndexRecord {
    /// Composite datapoint id, see [`crate::tenant::composite_id`].
    pub id: String,
    pub tenant: TenantId,
    pub doc_id: String,
    pub path: String,
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

impl IndexRecord {
    /// Metadata stored alongside the vector. Always carries `tenant_id`.
    pub fn metadata(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut m = serde_json::Map::new();
        m.insert("tenant_id".into(), self.tenant.as_str().into());
        m.insert("doc_id".into(), self.doc_id.clone().into());
        m.insert("chunk_id".into(), self.chunk.chunk_id.clone().into());
        m.insert("page".into(), self.chunk.page.into());
        m.insert("path".into(), self.path.clone().into());
        m.insert("checksum".into(), self.chunk.checksum.clone().into());
        m.insert("preview_text".into(), self.chunk.preview_text.clone().into());
        m
    }
}

/// Outcome of ingesting one document.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub job_id: String,
    pub doc_id: String,
    pub chunks: usize,
    pub ingested_at: DateTime<Utc>,
}

/// Answer returned to callers of `ask`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub latency_ms: u64,
}
