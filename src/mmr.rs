//! Maximum Marginal Relevance diversification.
//!
//! Greedily picks a top-k subset that trades relevance against redundancy:
//!
//! ```text
//! mmr(c) = λ · relevance(c) − (1 − λ) · max_{s ∈ selected} similarity(c, s)
//! ```
//!
//! Similarity is the Jaccard index of the lowercase whitespace token sets
//! of the two previews. It only needs to catch near-duplicate passages, so
//! no embedding math is involved.

use std::collections::HashSet;

use crate::models::ChunkHit;

pub const DEFAULT_LAMBDA: f64 = 0.6;

/// Select up to `top_k` diverse hits.
///
/// `hits` must already be sorted by descending relevance: the first hit is
/// always selected first. When `hits.len() <= top_k` the input is returned
/// unchanged. Ties on the MMR score go to the earliest remaining candidate.
pub fn select_diverse(hits: Vec<ChunkHit>, lambda: f64, top_k: usize) -> Vec<ChunkHit> {
    if hits.len() <= top_k {
        return hits;
    }
    if top_k == 0 {
        return Vec::new();
    }

    let lambda = lambda.clamp(0.0, 1.0);
    let token_sets: Vec<HashSet<String>> = hits.iter().map(|h| tokens(&h.preview_text)).collect();

    let mut selected: Vec<usize> = vec![0];
    let mut remaining: Vec<usize> = (1..hits.len()).collect();

    while selected.len() < top_k && !remaining.is_empty() {
        let mut best_pos = 0usize;
        let mut best_score = f64::NEG_INFINITY;

        for (pos, &cand) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|&s| jaccard(&token_sets[cand], &token_sets[s]))
                .fold(0.0f64, f64::max);
            let score = lambda * hits[cand].score - (1.0 - lambda) * redundancy;
            // Strict comparison keeps the earliest candidate on ties.
            if score > best_score {
                best_score = score;
                best_pos = pos;
            }
        }

        selected.push(remaining.remove(best_pos));
    }

    let mut slots: Vec<Option<ChunkHit>> = hits.into_iter().map(Some).collect();
    selected
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect()
}

/// Jaccard similarity of the token sets of two texts, in `[0.0, 1.0]`.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    jaccard(&tokens(a), &tokens(b))
}

fn tokens(text: &str) -> HashSet<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(b).count();
    let union = a.len() + b.len() - inter;
    inter as f64 / union as f64
}
