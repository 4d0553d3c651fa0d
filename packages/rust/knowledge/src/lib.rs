//! The knowledge base artifact: one Markdown file per deployment.
//!
//! A saved artifact starts with a generated header (a `---` metadata block,
//! the title, and an update banner closed by a `---` rule) followed by the
//! phrase content. Appending documents strips the header, merges the body
//! and writes a fresh header on save.

use std::path::{Path, PathBuf};

use chrono::Local;
use kbforge_shared::{KbForgeError, Result};
use tracing::{debug, info, instrument};

/// Opening of the metadata block that marks a generated header.
const HEADER_PREFIX: &str = "---\nmetadata:";

/// Number of `---` lines in a complete header: metadata open/close plus
/// the rule closing the banner.
const HEADER_RULES: usize = 3;

/// Where and how the artifact was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedArtifact {
    pub path: PathBuf,
    /// Character count of the content, excluding the generated header.
    pub content_size: usize,
}

#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    path: PathBuf,
    title: String,
}

impl KnowledgeBase {
    pub fn new(path: impl Into<PathBuf>, title: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            title: title.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current artifact contents, or an empty string if none has been saved.
    pub fn load(&self) -> Result<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(KbForgeError::io(&self.path, e)),
        }
    }

    /// Current artifact contents without the generated header.
    pub fn load_body(&self) -> Result<String> {
        let text = self.load()?;
        Ok(split_header(&text).1.to_string())
    }

    /// Write `content` as the new artifact, attributing it to `source`.
    ///
    /// Content that already starts with a `# ` heading is written verbatim.
    /// Content carrying a stale generated header has it replaced. Anything
    /// else gets a header prepended.
    #[instrument(skip_all, fields(path = %self.path.display(), source = %source))]
    pub fn save(&self, content: &str, source: &str) -> Result<SavedArtifact> {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let rendered = self.render(content, source, &timestamp);

        write_atomic(&self.path, &rendered)?;

        let saved = SavedArtifact {
            path: self.path.clone(),
            content_size: content.chars().count(),
        };
        info!(chars = saved.content_size, "knowledge base saved");
        Ok(saved)
    }

    fn render(&self, content: &str, source: &str, timestamp: &str) -> String {
        if content.starts_with("# ") {
            return content.to_string();
        }

        let body = match split_header(content) {
            (Some(_), body) => {
                debug!("replacing stale header");
                body
            }
            (None, body) => body,
        };
        format!("{}\n\n{body}", self.header(source, timestamp))
    }

    fn header(&self, source: &str, timestamp: &str) -> String {
        let title = &self.title;
        format!(
            "---
metadata:
  title: {title}
  last_updated: {timestamp}
  source: {source}
  format: Markdown knowledge base
---

# {title}

> Generated automatically from analyzed report documents.
>
> Last updated: {timestamp}
> Source document: {source}

---"
        )
    }
}

/// Split a generated header from the body.
///
/// Returns `(None, text)` when `text` does not start with a metadata block.
/// The body has its leading newlines removed.
pub fn split_header(text: &str) -> (Option<&str>, &str) {
    if !text.starts_with(HEADER_PREFIX) {
        return (None, text);
    }

    let mut rules = 0;
    let mut header_end = None;
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        offset += line.len();
        if line.trim_end() == "---" {
            rules += 1;
            // Metadata-only headers end at the second rule.
            header_end = Some(offset);
            if rules == HEADER_RULES {
                break;
            }
        }
    }

    match header_end {
        Some(end) if rules >= 2 => {
            let (header, body) = text.split_at(end);
            (Some(header.trim_end()), body.trim_start_matches(['\n', '\r']))
        }
        _ => (None, text),
    }
}

/// Write to `.name.tmp` beside the target, then rename over it.
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(|e| KbForgeError::io(&dir, e))?;

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| KbForgeError::config(format!("invalid output path: {}", path.display())))?;
    let temp = dir.join(format!(".{filename}.tmp"));

    std::fs::write(&temp, content).map_err(|e| KbForgeError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| KbForgeError::io(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kbforge-knowledge-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn kb(dir: &Path) -> KnowledgeBase {
        KnowledgeBase::new(dir.join("output").join("knowledge_base.md"), "Project Knowledge Base")
    }

    #[test]
    fn load_missing_is_empty() {
        let tmp = temp_dir();
        let kb = kb(&tmp);
        assert_eq!(kb.load().unwrap(), "");
        assert_eq!(kb.load_body().unwrap(), "");
    }

    #[test]
    fn save_prepends_header_and_creates_dir() {
        let tmp = temp_dir();
        let kb = kb(&tmp);
        let saved = kb.save("## Corporate Jargon\n\n- synergy\n", "report.docx").unwrap();

        assert_eq!(saved.path, kb.path());
        assert_eq!(saved.content_size, "## Corporate Jargon\n\n- synergy\n".chars().count());

        let text = std::fs::read_to_string(kb.path()).unwrap();
        assert!(text.starts_with("---\nmetadata:\n  title: Project Knowledge Base\n"));
        assert!(text.contains("  source: report.docx\n"));
        assert!(text.contains("\n# Project Knowledge Base\n"));
        assert!(text.ends_with("---\n\n## Corporate Jargon\n\n- synergy\n"));
        assert!(!tmp.join("output").join(".knowledge_base.md.tmp").exists());
    }

    #[test]
    fn save_then_load_body_roundtrips() {
        let tmp = temp_dir();
        let kb = kb(&tmp);
        let content = "## Abbreviations\n\n- KPI\n---\n## Policy Language\n\n- dual circulation\n";
        kb.save(content, "deck.pptx").unwrap();
        assert_eq!(kb.load_body().unwrap(), content);
    }

    #[test]
    fn content_with_top_heading_written_verbatim() {
        let tmp = temp_dir();
        let kb = kb(&tmp);
        let content = "# My Own Title\n\nBody\n";
        kb.save(content, "a.docx").unwrap();
        assert_eq!(kb.load().unwrap(), content);
    }

    #[test]
    fn stale_header_replaced_not_duplicated() {
        let kb = KnowledgeBase::new("unused.md", "KB");
        let first = kb.render("body text\n", "old.docx", "2026-01-01 00:00:00");
        let second = kb.render(&first, "new.pptx", "2026-02-01 00:00:00");

        assert_eq!(second.matches("metadata:").count(), 1);
        assert!(second.contains("source: new.pptx"));
        assert!(!second.contains("old.docx"));
        assert!(second.ends_with("---\n\nbody text\n"));
    }

    #[test]
    fn split_header_without_header() {
        let (header, body) = split_header("## Section\n---\ntext");
        assert!(header.is_none());
        assert_eq!(body, "## Section\n---\ntext");
    }

    #[test]
    fn split_header_metadata_only() {
        let text = "---\nmetadata:\n  title: X\n---\n\nBody";
        let (header, body) = split_header(text);
        assert_eq!(header, Some("---\nmetadata:\n  title: X\n---"));
        assert_eq!(body, "Body");
    }

    #[test]
    fn split_header_unterminated_is_body() {
        let text = "---\nmetadata:\n  title: X\n";
        assert_eq!(split_header(text), (None, text));
    }

    #[test]
    fn save_overwrites_previous_artifact() {
        let tmp = temp_dir();
        let kb = kb(&tmp);
        kb.save("first\n", "a.docx").unwrap();
        kb.save("second\n", "b.docx").unwrap();
        assert_eq!(kb.load_body().unwrap(), "second\n");
    }
}
