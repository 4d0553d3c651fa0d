//! WordprocessingML (`.docx`) reader.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::archive::{Package, PartResult};
use crate::xml::{attr, unescape};

const DOCUMENT_PART: &str = "word/document.xml";

/// Paragraphs, excluding self-closing `<w:p .../>` and `<w:pPr>`.
static PARAGRAPH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<w:p(?:\s[^>]*[^/>])?>(.*?)</w:p>").expect("valid regex")
});

static PROPS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<w:pPr>.*?</w:pPr>").expect("valid regex"));

static STYLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<w:pStyle\s[^>]*>").expect("valid regex"));

/// Text runs, tabs and breaks in document order.
static RUN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<w:t(?:\s[^>]*)?>(.*?)</w:t>|<w:(tab|br|cr)\b[^>]*/>").expect("valid regex")
});

static HEADING_STYLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^heading\s*([1-9])$").expect("valid regex"));

pub(crate) fn extract(path: &Path) -> PartResult<String> {
    let mut package = Package::open(path)?;
    let xml = package.require_part(DOCUMENT_PART)?;
    Ok(document_text(&xml))
}

fn document_text(xml: &str) -> String {
    PARAGRAPH_RE
        .captures_iter(xml)
        .filter_map(|caps| paragraph(&caps[1]))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render one paragraph body; `None` for paragraphs without text.
fn paragraph(body: &str) -> Option<String> {
    let level = PROPS_RE
        .find(body)
        .and_then(|props| STYLE_RE.find(props.as_str()))
        .and_then(|tag| attr(tag.as_str(), "w:val"))
        .and_then(heading_level);

    let content = PROPS_RE.replace(body, "");
    let mut text = String::new();
    for caps in RUN_RE.captures_iter(&content) {
        match (caps.get(1), caps.get(2).map(|m| m.as_str())) {
            (Some(run), _) => text.push_str(&unescape(run.as_str())),
            (None, Some("tab")) => text.push('\t'),
            (None, Some(_)) => text.push('\n'),
            (None, None) => {}
        }
    }

    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    Some(match level {
        Some(n) => format!("{} {text}", "#".repeat(n)),
        None => text.to_string(),
    })
}

fn heading_level(style: &str) -> Option<usize> {
    if style.eq_ignore_ascii_case("title") {
        return Some(1);
    }
    HEADING_STYLE_RE
        .captures(style)
        .and_then(|caps| caps[1].parse().ok())
}
