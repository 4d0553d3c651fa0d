//! Formatting passes for generated knowledge base Markdown.
//!
//! Each pass is a function `&str -> String` applied in sequence. Every pass
//! is idempotent and none undoes another, so the pipeline is idempotent too.

use std::sync::LazyLock;

use regex::Regex;

/// Run the full formatting pipeline on Markdown text.
pub(crate) fn run_pipeline(md: &str) -> String {
    let mut result = md.to_string();

    result = normalize_line_endings(&result);
    result = trim_trailing_whitespace(&result);
    result = collapse_blank_lines(&result);
    result = space_after_section_headings(&result);
    result = ensure_trailing_newline(&result);

    result
}

// ---------------------------------------------------------------------------
// Pass 1: Line endings
// ---------------------------------------------------------------------------

fn normalize_line_endings(md: &str) -> String {
    md.replace("\r\n", "\n").replace('\r', "\n")
}

// ---------------------------------------------------------------------------
// Pass 2: Trailing whitespace
// ---------------------------------------------------------------------------

/// Strip trailing whitespace from every line and surrounding whitespace
/// from the whole document.
fn trim_trailing_whitespace(md: &str) -> String {
    md.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

// ---------------------------------------------------------------------------
// Pass 3: Blank lines
// ---------------------------------------------------------------------------

/// Collapse runs of 2+ blank lines into exactly one.
fn collapse_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(md, "\n\n").to_string()
}

// ---------------------------------------------------------------------------
// Pass 4: Section heading spacing
// ---------------------------------------------------------------------------

/// Ensure a blank line after every `#` / `##` heading, unless the next line
/// is already blank or a `---` rule. Headings inside fenced code are left alone.
fn space_after_section_headings(md: &str) -> String {
    let lines: Vec<&str> = md.lines().collect();
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    let mut in_code_block = false;

    for (i, &line) in lines.iter().enumerate() {
        out.push(line);

        if line.trim_start().starts_with("```") {
            in_code_block = !in_code_block;
            continue;
        }
        if in_code_block || !is_section_heading(line) {
            continue;
        }

        if let Some(next) = lines.get(i + 1) {
            let next = next.trim();
            if !next.is_empty() && next != "---" {
                out.push("");
            }
        }
    }

    out.join("\n")
}

fn is_section_heading(line: &str) -> bool {
    line.starts_with("# ") || line.starts_with("## ")
}

// ---------------------------------------------------------------------------
// Pass 5: Trailing newline
// ---------------------------------------------------------------------------

/// Ensure the file ends with exactly one newline.
fn ensure_trailing_newline(md: &str) -> String {
    let trimmed = md.trim_end_matches('\n');
    format!("{trimmed}\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
