//! Raw nearest-neighbor results → uniform [`ChunkHit`]s.
//!
//! Distances become bounded relevance scores via `1 / (1 + d)`, so scores
//! from different queries are comparable and can feed MMR directly.
//! Missing or malformed metadata degrades to defaults (page 1, empty
//! strings) instead of failing the query.

use serde_json::{Map, Value};

use crate::models::{ChunkHit, RawHit};

/// Map every raw result to a [`ChunkHit`], preserving input order.
pub fn normalize(raw: &[RawHit]) -> Vec<ChunkHit> {
    raw.iter().map(normalize_one).collect()
}

pub fn normalize_one(raw: &RawHit) -> ChunkHit {
    let m = &raw.metadata;
    ChunkHit {
        chunk_id: str_field(m, "chunk_id"),
        doc_id: str_field(m, "doc_id"),
        page: page_field(m),
        path: str_field(m, "path"),
        checksum: str_field(m, "checksum"),
        preview_text: str_field(m, "preview_text"),
        score: distance_to_score(raw.distance),
        full_text: m
            .get("full_text")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    }
}

/// `1 / (1 + d)` for `d >= 0`, so the result is in `(0, 1]`.
///
/// Negative distances are clamped to zero (score 1.0). NaN maps to 0.0 so
/// a broken index entry sinks to the bottom instead of poisoning MMR.
pub fn distance_to_score(distance: f64) -> f64 {
    if distance.is_nan() {
        return 0.0;
    }
    1.0 / (1.0 + distance.max(0.0))
}

fn str_field(m: &Map<String, Value>, key: &str) -> String {
    match m.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn page_field(m: &Map<String, Value>) -> u32 {
    let page = match m.get("page") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    match page {
        Some(p) if (1..=u64::from(u32::MAX)).contains(&p) => p as u32,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(distance: f64, metadata: Value) -> RawHit {
        RawHit {
            id: "t_d_c-00000".into(),
            distance,
            metadata: metadata.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_score_formula() {
        assert!((distance_to_score(0.0) - 1.0).abs() < 1e-12);
        assert!((distance_to_score(1.0) - 0.5).abs() < 1e-12);
        assert!((distance_to_score(3.0) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_score_bounds() {
        for d in [0.0, 0.001, 0.5, 2.0, 1e9, f64::INFINITY, -4.0, f64::NAN] {
            let s = distance_to_score(d);
            assert!((0.0..=1.0).contains(&s), "score {} out of range for {}", s, d);
        }
        assert!(distance_to_score(1e9) > 0.0);
    }

    #[test]
    fn test_full_metadata() {
        let hit = normalize_one(&raw(
            1.0,
            json!({
                "doc_id": "doc-1",
                "chunk_id": "c-00004",
                "page": "7",
                "path": "file:///docs/a.pdf",
                "checksum": "sha256:ab",
                "preview_text": "preview",
                "full_text": "full text"
            }),
        ));
        assert_eq!(hit.doc_id, "doc-1");
        assert_eq!(hit.chunk_id, "c-00004");
        assert_eq!(hit.page, 7);
        assert_eq!(hit.path, "file:///docs/a.pdf");
        assert_eq!(hit.checksum, "sha256:ab");
        assert_eq!(hit.preview_text, "preview");
        assert_eq!(hit.full_text.as_deref(), Some("full text"));
        assert!((hit.score - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_missing_metadata_defaults() {
        let hit = normalize_one(&raw(0.0, json!({})));
        assert_eq!(hit.page, 1);
        assert_eq!(hit.doc_id, "");
        assert_eq!(hit.chunk_id, "");
        assert_eq!(hit.path, "");
        assert_eq!(hit.checksum, "");
        assert_eq!(hit.preview_text, "");
        assert!(hit.full_text.is_none());
    }

    #[test]
    fn test_bad_page_defaults_to_one() {
        assert_eq!(normalize_one(&raw(0.0, json!({"page": 0}))).page, 1);
        assert_eq!(normalize_one(&raw(0.0, json!({"page": "abc"}))).page, 1);
        assert_eq!(normalize_one(&raw(0.0, json!({"page": -3}))).page, 1);
        assert_eq!(normalize_one(&raw(0.0, json!({"page": 12}))).page, 12);
    }

    #[test]
    fn test_order_preserved() {
        let hits = normalize(&[
            raw(0.3, json!({"chunk_id": "a"})),
            raw(0.1, json!({"chunk_id": "b"})),
        ]);
        assert_eq!(hits[0].chunk_id, "a");
        assert_eq!(hits[1].chunk_id, "b");
    }
}
