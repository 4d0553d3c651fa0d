//! Markdown normalization for the knowledge base artifact.
//!
//! LLM output is loosely formatted: stray trailing spaces, runs of blank
//! lines, headings glued to their first paragraph. [`format`] runs a fixed
//! set of cleanup passes so the saved artifact imports cleanly into
//! retrieval tools that chunk on headings and blank lines.

mod cleanup;

use tracing::{debug, instrument};

/// Normalize Markdown for storage.
///
/// 1. Trims surrounding whitespace and trailing whitespace on every line.
/// 2. Collapses runs of blank lines to a single blank line.
/// 3. Puts a blank line after each `#` / `##` heading unless one (or a
///    `---` rule) already follows.
/// 4. Ends the text with exactly one newline.
///
/// `format(&format(x)) == format(x)` for any input.
#[instrument(skip_all, fields(input_chars = md.len()))]
pub fn format(md: &str) -> String {
    let formatted = cleanup::run_pipeline(md);
    debug!(output_chars = formatted.len(), "markdown formatted");
    formatted
}
