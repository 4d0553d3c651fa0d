//! Prompt templates for phrase extraction and knowledge base merging.

/// Wrap an instruction and the document it applies to into one prompt.
pub(crate) fn with_document(instruction: &str, content: &str) -> String {
    if content.is_empty() {
        instruction.to_string()
    } else {
        format!("{instruction}\n\nDocument content:\n{content}")
    }
}

/// Instruction for extracting reusable phrases, grouped by `categories`.
pub(crate) fn extract_phrases(categories: &[String]) -> String {
    let category_list = categories
        .iter()
        .map(|c| format!("- {c}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are an experienced corporate document analyst who recognises professional vocabulary, official phrasing and industry terminology in business reports. Analyse the report below and extract its phrases and terms.

## Tasks
1. **Corporate jargon**: abstract, high-level buzzwords (e.g. empower, leverage, closed loop).
2. **Strategic vocabulary**: terms describing direction and architecture (e.g. top-level design, ecosystem building).
3. **Stacked industry terms**: compound professional expressions (e.g. end-to-end digital transformation).
4. **Policy language**: policy-oriented wording (e.g. high-quality development, supply-side reform).
5. **Phrase patterns**: reusable sentence structures and idioms.
6. **Usage context**: where each phrase is appropriate.

## Categories
{category_list}

## Output format (Markdown)
Follow this structure exactly for every category:

### [Category name]

#### Phrase 1
**Phrase**: [the exact phrase or term]
**Meaning**: [short explanation of what it means or why it is used]
**Context**: [when to use it, e.g. annual report, strategy meeting, press release]
**Example**: [an example sentence]

---

## Additional requirements
- Prioritise corporate jargon and strategic vocabulary.
- Include policy-oriented wording and trending business concepts.
- Only extract phrases that are genuinely reusable; skip meaningless fragments.
- Provide 3-5 items per category where the document supports it.
- Prefer frequent, professional, authoritative expressions.
- Answer in the language of the document."#
    )
}

/// Instruction for merging newly extracted phrases into an existing
/// knowledge base without duplicates.
pub(crate) fn merge_and_deduplicate(existing: &str, new_content: &str) -> String {
    format!(
        r#"You maintain a knowledge base of phrases and must merge new content into it.

## Tasks
1. Compare the existing knowledge base with the new content.
2. Identify duplicate or similar phrases and terms.
3. Keep the more complete and accurate version.
4. Add genuinely new phrases without repeating existing ones.
5. Preserve the existing category structure.

## Deduplication rules
- Identical: keep one.
- Same meaning, different wording: keep the more professional version and mention the variant in its explanation.
- Additional detail: fold it into the existing item.
- Entirely new: add it under the matching category.

## Existing knowledge base
{existing}

## New content
{new_content}

## Output
Return the complete merged knowledge base in Markdown with a clear structure."#
    )
}
