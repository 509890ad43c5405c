//! Fixed-window text chunker.
//!
//! Splits page text into [`Chunk`]s of at most `size` characters, where
//! consecutive windows on the same page share `overlap` characters.
//! Sizes are measured in Unicode scalar values, never bytes, so windows
//! cannot split a multi-byte character.
//!
//! Each chunk receives a sequential id (`c-00000`, `c-00001`, …) from a
//! counter shared by every page of one document, plus a SHA-256 checksum
//! of its exact text. The checksum is later echoed back in citations as a
//! provenance token.
//!
//! # Algorithm
//!
//! 1. Pages with empty text produce nothing.
//! 2. A page no longer than `size` becomes a single chunk.
//! 3. Otherwise windows start at `0, step, 2·step, …` with
//!    `step = size - overlap`, and the last window is the first one that
//!    reaches the end of the page (it may be shorter than `size`).
//!
//! # Example
//!
//! ```rust
//! use grounded_rag::chunk::make_chunks;
//! use grounded_rag::models::PageText;
//!
//! let pages = vec![PageText { page_num: 1, text: "ABCDEFGHIJ".into() }];
//! let chunks = make_chunks(&pages, 4, 1).unwrap();
//! let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
//! assert_eq!(texts, ["ABCD", "DEFG", "GHIJ"]);
//! ```

use sha2::{Digest, Sha256};

use crate::error::{RagError, Result};
use crate::models::{Chunk, PageText};

pub const DEFAULT_CHUNK_SIZE: usize = 1400;
pub const DEFAULT_CHUNK_OVERLAP: usize = 160;
pub const PREVIEW_CHARS: usize = 200;

/// Split pages into overlapping chunks.
///
/// # Errors
///
/// Returns [`RagError::Config`] when `size` is zero or `overlap >= size`,
/// since the window would never advance.
pub fn make_chunks(pages: &[PageText], size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    validate_window(size, overlap)?;
    let step = size - overlap;

    let mut chunks = Vec::new();
    let mut counter = 0usize;

    for page in pages {
        if page.text.is_empty() {
            continue;
        }

        // Byte offset of every char, plus the end of the string.
        let mut bounds: Vec<usize> = page.text.char_indices().map(|(i, _)| i).collect();
        bounds.push(page.text.len());
        let char_len = bounds.len() - 1;

        let mut start = 0usize;
        loop {
            let end = (start + size).min(char_len);
            let piece = &page.text[bounds[start]..bounds[end]];
            chunks.push(make_chunk(counter, page.page_num, piece));
            counter += 1;

            if end >= char_len {
                break;
            }
            start += step;
        }
    }

    Ok(chunks)
}

/// Reject window settings that cannot make progress.
pub fn validate_window(size: usize, overlap: usize) -> Result<()> {
    if size == 0 {
        return Err(RagError::Config("chunk size must be > 0".into()));
    }
    if overlap >= size {
        return Err(RagError::Config(format!(
            "chunk overlap ({}) must be smaller than chunk size ({})",
            overlap, size
        )));
    }
    Ok(())
}

/// `sha256:<hex>` of the exact UTF-8 bytes of `text`.
pub fn checksum(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Fixed-width, sortable chunk identifier.
pub fn chunk_id(seq: usize) -> String {
    format!("c-{:05}", seq)
}

fn make_chunk(seq: usize, page: u32, text: &str) -> Chunk {
    Chunk {
        chunk_id: chunk_id(seq),
        text: text.to_string(),
        page,
        checksum: checksum(text),
        preview_text: text.chars().take(PREVIEW_CHARS).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(num: u32, text: &str) -> PageText {
        PageText {
            page_num: num,
            text: text.to_string(),
        }
    }

    /// Undo the overlap: first chunk whole, then each later chunk minus its
    /// leading `overlap` characters.
    fn reconstruct(chunks: &[&Chunk], overlap: usize) -> String {
        let mut out = String::new();
        for (i, c) in chunks.iter().enumerate() {
            if i == 0 {
                out.push_str(&c.text);
            } else {
                out.extend(c.text.chars().skip(overlap));
            }
        }
        out
    }

    #[test]
    fn test_window_example() {
        let chunks = make_chunks(&[page(1, "ABCDEFGHIJ")], 4, 1).unwrap();
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["ABCD", "DEFG", "GHIJ"]);
        for c in &chunks {
            assert_eq!(c.page, 1);
        }
        assert_ne!(chunks[0].checksum, chunks[1].checksum);
        assert_ne!(chunks[1].checksum, chunks[2].checksum);
        assert_ne!(chunks[0].checksum, chunks[2].checksum);
    }

    #[test]
    fn test_short_page_single_chunk() {
        let chunks = make_chunks(&[page(3, "short page")], 1400, 160).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "short page");
        assert_eq!(chunks[0].page, 3);
        assert_eq!(chunks[0].chunk_id, "c-00000");
    }

    #[test]
    fn test_page_exactly_size() {
        let chunks = make_chunks(&[page(1, "ABCD")], 4, 1).unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_empty_page_skipped() {
        let chunks = make_chunks(&[page(1, ""), page(2, "text")], 10, 2).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].page, 2);
        assert_eq!(chunks[0].chunk_id, "c-00000");
    }

    #[test]
    fn test_overlap_not_smaller_than_size_rejected() {
        let err = make_chunks(&[page(1, "abc")], 4, 4).unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
        let err = make_chunks(&[page(1, "abc")], 4, 9).unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
        let err = make_chunks(&[page(1, "abc")], 0, 0).unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
    }

    #[test]
    fn test_ids_shared_across_pages_and_increasing() {
        let pages = vec![
            page(1, &"a".repeat(25)),
            page(2, "tiny"),
            page(3, &"b".repeat(31)),
        ];
        let chunks = make_chunks(&pages, 10, 3).unwrap();
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_id, format!("c-{:05}", i));
        }
        for w in chunks.windows(2) {
            assert!(w[0].chunk_id < w[1].chunk_id);
        }
    }

    #[test]
    fn test_round_trip_per_page() {
        let text: String = (0..500).map(|i| format!("w{} ", i)).collect();
        let pages = vec![page(1, &text), page(2, "second page body")];
        let overlap = 17;
        let chunks = make_chunks(&pages, 120, overlap).unwrap();

        for p in &pages {
            let on_page: Vec<&Chunk> = chunks.iter().filter(|c| c.page == p.page_num).collect();
            assert_eq!(reconstruct(&on_page, overlap), p.text);
        }
    }

    #[test]
    fn test_checksums_recompute() {
        let chunks = make_chunks(&[page(1, &"xyz ".repeat(400))], 100, 10).unwrap();
        for c in &chunks {
            assert_eq!(c.checksum, checksum(&c.text));
            assert!(c.checksum.starts_with("sha256:"));
            assert_eq!(c.checksum.len(), "sha256:".len() + 64);
        }
    }

    #[test]
    fn test_multibyte_windows() {
        let text = "┌──────┐│ こんにちは世界 │└──────┘";
        let chunks = make_chunks(&[page(1, text)], 5, 2).unwrap();
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.chars().count() <= 5);
        }
        let refs: Vec<&Chunk> = chunks.iter().collect();
        assert_eq!(reconstruct(&refs, 2), text);
    }

    #[test]
    fn test_preview_truncated() {
        let chunks = make_chunks(&[page(1, &"é".repeat(300))], 1400, 160).unwrap();
        assert_eq!(chunks[0].preview_text.chars().count(), PREVIEW_CHARS);
    }

    #[test]
    fn test_deterministic() {
        let pages = vec![page(1, &"Alpha Beta Gamma ".repeat(50))];
        let a = make_chunks(&pages, 64, 8).unwrap();
        let b = make_chunks(&pages, 64, 8).unwrap();
        assert_eq!(a, b);
    }
}
