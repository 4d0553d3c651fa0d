//! PresentationML (`.pptx`) reader.
//!
//! Per slide: the title placeholder as a `#` heading, every other shape or
//! graphic frame with text in source order, then the speaker notes.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::archive::{Package, PartResult};
use crate::xml::{attr, unescape};

static SLIDE_PART_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ppt/slides/slide(\d+)\.xml$").expect("valid regex"));

/// Top-level text containers: shapes and graphic frames (tables).
static SHAPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<p:sp(?:\s[^>]*)?>(.*?)</p:sp>|<p:graphicFrame(?:\s[^>]*)?>(.*?)</p:graphicFrame>")
        .expect("valid regex")
});

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<p:ph(?:\s[^>]*)?/?>").expect("valid regex"));

/// DrawingML paragraphs, excluding self-closing `<a:p/>` and `<a:pPr>`.
static PARAGRAPH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<a:p(?:\s[^>]*[^/>])?>(.*?)</a:p>").expect("valid regex")
});

static RUN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<a:t(?:\s[^>]*)?>(.*?)</a:t>|<a:br\b[^>]*/>").expect("valid regex")
});

static RELATIONSHIP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<Relationship\s[^>]*>").expect("valid regex"));

const NOTES_REL_TYPE_SUFFIX: &str = "/notesSlide";

pub(crate) fn extract(path: &Path) -> PartResult<String> {
    let mut package = Package::open(path)?;

    let mut slides: Vec<(u32, String)> = package
        .part_names()
        .filter_map(|name| {
            let number = SLIDE_PART_RE.captures(name)?[1].parse().ok()?;
            Some((number, name.to_string()))
        })
        .collect();
    slides.sort_by_key(|(number, _)| *number);

    let mut blocks = Vec::new();
    for (number, part) in slides {
        let xml = package.require_part(&part)?;
        let notes = match notes_part(&mut package, number)? {
            Some(notes_part) => package
                .read_part(&notes_part)?
                .map(|xml| notes_text(&xml))
                .unwrap_or_default(),
            None => String::new(),
        };
        blocks.extend(slide_blocks(&xml, &notes));
    }

    Ok(blocks.join("\n\n"))
}

/// Render one slide into text blocks.
fn slide_blocks(slide_xml: &str, notes: &str) -> Vec<String> {
    let mut title = None;
    let mut texts = Vec::new();

    for caps in SHAPE_RE.captures_iter(slide_xml) {
        let (body, is_shape) = match (caps.get(1), caps.get(2)) {
            (Some(sp), _) => (sp.as_str(), true),
            (None, Some(frame)) => (frame.as_str(), false),
            (None, None) => continue,
        };

        let text = shape_text(body);
        if text.is_empty() {
            continue;
        }

        if is_shape && title.is_none() && is_title_placeholder(body) {
            title = Some(text);
        } else {
            texts.push(text);
        }
    }

    let mut blocks = Vec::with_capacity(texts.len() + 2);
    if let Some(title) = title {
        blocks.push(format!("# {title}"));
    }
    blocks.extend(texts);
    if !notes.is_empty() {
        blocks.push(format!("Notes: {notes}"));
    }
    blocks
}

fn placeholder_type(shape_body: &str) -> Option<&str> {
    PLACEHOLDER_RE
        .find(shape_body)
        .and_then(|tag| attr(tag.as_str(), "type"))
}

fn is_title_placeholder(shape_body: &str) -> bool {
    matches!(placeholder_type(shape_body), Some("title" | "ctrTitle"))
}

/// Paragraph texts of a shape joined by newlines, trimmed.
fn shape_text(body: &str) -> String {
    let paragraphs: Vec<String> = PARAGRAPH_RE
        .captures_iter(body)
        .map(|caps| {
            let mut line = String::new();
            for run in RUN_RE.captures_iter(&caps[1]) {
                match run.get(1) {
                    Some(text) => line.push_str(&unescape(text.as_str())),
                    None => line.push('\n'),
                }
            }
            line.trim().to_string()
        })
        .filter(|line| !line.is_empty())
        .collect();
    paragraphs.join("\n")
}

/// Speaker notes live in the body placeholder of the notes slide.
fn notes_text(notes_xml: &str) -> String {
    SHAPE_RE
        .captures_iter(notes_xml)
        .filter_map(|caps| caps.get(1))
        .map(|sp| sp.as_str())
        .filter(|body| placeholder_type(body) == Some("body"))
        .map(shape_text)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Locate the notes slide linked from `slide<number>.xml`, if any.
fn notes_part(package: &mut Package, number: u32) -> PartResult<Option<String>> {
    let rels_part = format!("ppt/slides/_rels/slide{number}.xml.rels");
    let Some(rels) = package.read_part(&rels_part)? else {
        return Ok(None);
    };

    Ok(RELATIONSHIP_RE
        .find_iter(&rels)
        .map(|m| m.as_str())
        .find(|tag| attr(tag, "Type").is_some_and(|t| t.ends_with(NOTES_REL_TYPE_SUFFIX)))
        .and_then(|tag| attr(tag, "Target"))
        .map(|target| resolve_target("ppt/slides", target)))
}

/// Resolve a relationship target relative to the directory of its source part.
fn resolve_target(base_dir: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }

    let mut segments: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}
