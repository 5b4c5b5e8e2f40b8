//! Prompts sent to the vision model.
//!
//! Callers can override the default via
//! [`crate::config::PipelineConfig::extraction_prompt`]; the constant here is
//! used only when no override is provided.

/// Default prompt for transcribing one page image.
///
/// The text is narrated verbatim afterwards, so the model must transcribe,
/// not summarise or format.
pub const DEFAULT_EXTRACTION_PROMPT: &str = r#"You are reading one page of a document so that it can be narrated aloud.

Follow these rules precisely:

1. Read the text on the page in its natural reading sequence.
2. Transcribe it exactly. Do not add, remove, translate or correct any words.
3. Ignore headers, footers, page numbers and decorative elements.
4. Keep paragraph breaks as blank lines. Do not use Markdown or any other markup.
5. If the page carries no readable text, output nothing.

Output ONLY the page text, with no commentary and no code fences."#;

/// The prompt to use given an optional override.
pub fn extraction_prompt(custom: Option<&str>) -> &str {
    custom
        .filter(|p| !p.trim().is_empty())
        .unwrap_or(DEFAULT_EXTRACTION_PROMPT)
}
