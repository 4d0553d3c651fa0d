//! Plain-text extraction from Office documents.
//!
//! Both supported formats are zip containers of XML parts. [`OfficeExtractor`]
//! routes by [`DocumentKind`] to the docx or pptx reader; each reader scans
//! the relevant XML parts and returns UTF-8 text with light Markdown
//! structure (headings) preserved.
//!
//! Extraction is synchronous. Async callers go through [`extract_blocking`].

mod archive;
mod docx;
mod pptx;
mod xml;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use kbforge_shared::{DocumentKind, KbForgeError, Result};

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Turns a document on disk into plain text.
pub trait DocumentExtractor: Send + Sync {
    /// Extract the text of `path`, interpreting it as `extension`
    /// (`"docx"` / `".pptx"`, case-insensitive).
    fn extract(&self, path: &Path, extension: &str) -> Result<String>;
}

/// Built-in extractor for `.docx` and `.pptx`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfficeExtractor;

impl DocumentExtractor for OfficeExtractor {
    fn extract(&self, path: &Path, extension: &str) -> Result<String> {
        let kind = DocumentKind::from_extension(extension).ok_or_else(|| {
            KbForgeError::config(format!(
                "unsupported file format: {extension} (expected .docx or .pptx)"
            ))
        })?;

        let started = std::time::Instant::now();
        let text = match kind {
            DocumentKind::Docx => docx::extract(path),
            DocumentKind::Pptx => pptx::extract(path),
        }
        .map_err(|detail| {
            KbForgeError::parse(format!(
                "{} document could not be parsed: {detail}",
                kind.extension()
            ))
        })?;

        tracing::debug!(
            ?path,
            kind = kind.extension(),
            chars = text.chars().count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "extracted document text"
        );
        Ok(text)
    }
}

/// Run `extractor` on the blocking thread pool.
pub async fn extract_blocking(
    extractor: Arc<dyn DocumentExtractor>,
    path: PathBuf,
    extension: String,
) -> Result<String> {
    tokio::task::spawn_blocking(move || extractor.extract(&path, &extension))
        .await
        .map_err(|e| KbForgeError::Executor(format!("extraction task failed: {e}")))?
}

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_extension_is_config_error() {
        let err = OfficeExtractor
            .extract(Path::new("notes.pdf"), "pdf")
            .unwrap_err();
        assert!(matches!(err, KbForgeError::Config { .. }));
        assert!(err.to_string().contains("unsupported file format"));
    }

    #[test]
    fn non_zip_file_is_parse_error() {
        let dir = std::env::temp_dir().join(format!("kbforge-parsers-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("broken.docx");
        std::fs::write(&path, b"definitely not a zip").unwrap();

        let err = OfficeExtractor.extract(&path, "docx").unwrap_err();
        assert!(matches!(err, KbForgeError::Parse { .. }));
        assert!(err.to_string().contains("docx document could not be parsed"));
    }

    #[test]
    fn missing_file_is_parse_error() {
        let err = OfficeExtractor
            .extract(Path::new("/nonexistent/kbforge/deck.pptx"), ".PPTX")
            .unwrap_err();
        assert!(matches!(err, KbForgeError::Parse { .. }));
    }

    #[tokio::test]
    async fn extract_blocking_runs_extractor() {
        let path = fixtures::write_package(
            "memo.docx",
            &[(
                "word/document.xml",
                r#"<w:document><w:body><w:p><w:r><w:t>Hello</w:t></w:r></w:p></w:body></w:document>"#,
            )],
        );
        let text = extract_blocking(Arc::new(OfficeExtractor), path, "docx".into())
            .await
            .unwrap();
        assert_eq!(text, "Hello");
    }
}
