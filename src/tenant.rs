//! Tenant isolation guard.
//!
//! Isolation is layered. The vector store is asked to restrict every search
//! to the caller's tenant namespace; independently, [`retain_tenant`] drops
//! any returned hit that does not provably belong to that tenant before it
//! reaches normalization. The second layer always runs, even when the store
//! reports that it enforces the namespace filter itself.
//!
//! Ownership is decided by the structured `tenant_id` metadata field that
//! every indexed record carries. Records written by older indexers may lack
//! it; for those, [`TenantFallback::IdPrefix`] derives ownership from the
//! composite datapoint id. That derivation is ambiguous whenever one tenant
//! id is a prefix of another joined by `_` (`acme` vs `acme_corp`), so it is
//! off unless explicitly configured.

use serde::Deserialize;
use tracing::warn;

use crate::models::{RawHit, TenantId};

/// Separator used in composite datapoint ids.
pub const ID_SEPARATOR: char = '_';

/// What to do with a hit that has no structured `tenant_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantFallback {
    /// Drop it.
    #[default]
    Reject,
    /// Keep it if its id starts with `"{tenant}_"`.
    IdPrefix,
}

/// Datapoint id for one chunk: `"{tenant}_{doc}_{chunk}"`.
pub fn composite_id(tenant: &TenantId, doc_id: &str, chunk_id: &str) -> String {
    format!(
        "{}{sep}{}{sep}{}",
        tenant.as_str(),
        doc_id,
        chunk_id,
        sep = ID_SEPARATOR
    )
}

/// Whether `hit` is attributable to `tenant` under `fallback`.
pub fn belongs_to(hit: &RawHit, tenant: &TenantId, fallback: TenantFallback) -> bool {
    match hit.metadata.get("tenant_id") {
        Some(value) => value.as_str() == Some(tenant.as_str()),
        None => match fallback {
            TenantFallback::Reject => false,
            TenantFallback::IdPrefix => hit
                .id
                .strip_prefix(tenant.as_str())
                .is_some_and(|rest| rest.starts_with(ID_SEPARATOR)),
        },
    }
}

/// Discard every hit not attributable to `tenant`.
pub fn retain_tenant(hits: Vec<RawHit>, tenant: &TenantId, fallback: TenantFallback) -> Vec<RawHit> {
    let before = hits.len();
    let kept: Vec<RawHit> = hits
        .into_iter()
        .filter(|h| belongs_to(h, tenant, fallback))
        .collect();
    let dropped = before - kept.len();
    if dropped > 0 {
        warn!(
            tenant = %tenant,
            dropped,
            "discarded search results outside the tenant scope"
        );
    }
    kept
}
