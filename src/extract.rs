//! Page text extraction from source documents.
//!
//! The [`Extractor`] seam turns a source URI into per-page text. The
//! bundled [`FsExtractor`] reads local files, given either as a plain path
//! or a `file://` URI:
//!
//! - PDFs (by `.pdf` extension or `%PDF-` magic) are split by page. Pages
//!   without text are skipped but keep their physical page number.
//! - Anything else must be UTF-8 text and becomes a single page 1.
//!
//! A document yielding no text at all is [`RagError::Unextractable`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{RagError, Result, Stage};
use crate::models::PageText;

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Ordered, non-empty list of pages with text.
    async fn extract_pages(&self, source_uri: &str) -> Result<Vec<PageText>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FsExtractor;

#[async_trait]
impl Extractor for FsExtractor {
    async fn extract_pages(&self, source_uri: &str) -> Result<Vec<PageText>> {
        let path = resolve_local_path(source_uri)?;

        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RagError::NotFound(path.display().to_string()));
            }
            Err(e) => return Err(RagError::upstream(Stage::Extract, e.into())),
        };

        let pages = if is_pdf(&path, &bytes) {
            tokio::task::spawn_blocking(move || pdf_pages(&bytes))
                .await
                .map_err(|e| RagError::Unextractable(format!("PDF extraction aborted: {}", e)))??
        } else {
            text_pages(bytes)
        };

        if pages.is_empty() {
            return Err(RagError::Unextractable(source_uri.to_string()));
        }
        debug!(source = source_uri, pages = pages.len(), "extracted pages");
        Ok(pages)
    }
}

/// Map a source URI to a local path. Only `file://` and bare paths are local.
pub fn resolve_local_path(source_uri: &str) -> Result<PathBuf> {
    let uri = source_uri.trim();
    if uri.is_empty() {
        return Err(RagError::InvalidInput("source uri cannot be empty".into()));
    }
    if let Some(rest) = uri.strip_prefix("file://") {
        if rest.is_empty() {
            return Err(RagError::InvalidInput(format!("malformed source uri: {}", uri)));
        }
        return Ok(PathBuf::from(rest));
    }
    if let Some((scheme, _)) = uri.split_once("://") {
        return Err(RagError::InvalidInput(format!(
            "unsupported source scheme '{}': {}",
            scheme, uri
        )));
    }
    Ok(PathBuf::from(uri))
}

fn is_pdf(path: &Path, bytes: &[u8]) -> bool {
    let by_ext = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
    by_ext || bytes.starts_with(b"%PDF-")
}

fn pdf_pages(bytes: &[u8]) -> Result<Vec<PageText>> {
    let raw = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| RagError::Unextractable(format!("PDF extraction failed: {}", e)))?;
    Ok(raw
        .into_iter()
        .enumerate()
        .filter_map(|(i, text)| {
            let text = text.trim();
            (!text.is_empty()).then(|| PageText {
                page_num: i as u32 + 1,
                text: text.to_string(),
            })
        })
        .collect())
}

fn text_pages(bytes: Vec<u8>) -> Vec<PageText> {
    match String::from_utf8(bytes) {
        Ok(text) if !text.trim().is_empty() => vec![PageText {
            page_num: 1,
            text: text.trim().to_string(),
        }],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn resolves_paths_and_file_uris() {
        assert_eq!(
            resolve_local_path("file:///tmp/a.txt").unwrap(),
            PathBuf::from("/tmp/a.txt")
        );
        assert_eq!(
            resolve_local_path(" docs/a.txt ").unwrap(),
            PathBuf::from("docs/a.txt")
        );
    }

    #[test]
    fn rejects_bad_uris() {
        assert!(matches!(resolve_local_path(""), Err(RagError::InvalidInput(_))));
        assert!(matches!(
            resolve_local_path("file://"),
            Err(RagError::InvalidInput(_))
        ));
        assert!(matches!(
            resolve_local_path("gs://bucket/a.pdf"),
            Err(RagError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn text_file_is_one_page() {
        let mut f = tempfile::Builder::new().suffix(".md").tempfile().unwrap();
        writeln!(f, "  # Handbook\n\nRefunds take 5 days.  ").unwrap();
        let pages = FsExtractor
            .extract_pages(f.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page_num, 1);
        assert!(pages[0].text.starts_with("# Handbook"));
        assert!(pages[0].text.ends_with("days."));
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let err = FsExtractor
            .extract_pages("file:///definitely/not/here.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::NotFound(_)));
    }

    #[tokio::test]
    async fn blank_and_binary_files_are_unextractable() {
        let blank = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(blank.path(), "   \n").unwrap();
        let err = FsExtractor
            .extract_pages(blank.path().to_str().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Unextractable(_)));

        let binary = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(binary.path(), [0xff, 0xfe, 0x00, 0x81]).unwrap();
        let err = FsExtractor
            .extract_pages(binary.path().to_str().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Unextractable(_)));
    }

    #[tokio::test]
    async fn corrupt_pdf_is_unextractable() {
        let mut f = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
        f.write_all(b"not a real pdf").unwrap();
        let err = FsExtractor
            .extract_pages(f.path().to_str().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Unextractable(_)));
    }
}
