//! Prompt text and user-facing warnings.
//!
//! Centralising every prompt here keeps the summarisation call free of
//! string literals and lets tests inspect the exact text sent to the model.
//!
//! Callers can override the summary prompt via
//! [`crate::config::PipelineConfig::prompt_template`]; the constants here
//! are used only when no override is provided.

/// Default prompt wrapped around the (windowed) document text.
///
/// `{text}` is replaced with the text selected by
/// [`crate::pipeline::window`].
pub const DEFAULT_SUMMARY_PROMPT: &str =
    "Provide a summary with about two sentences for the following article: {text}\nSummary:";

/// Logged at WARNING when the abstract or conclusion heading is missing.
pub const MISSING_SECTION_WARNING: &str = "Uploaded PDF doesn't contain an abstract or conclusion paragraph. \
The document summarization pipeline will attempt a best effort at summarizing the PDF. \
Your results might vary in quality. For best results, use a single-column, academic paper \
that contains both a labeled 'Abstract' and 'Conclusion' section.";

/// Build the summarisation prompt from a template and the selected text.
pub fn summary_prompt(template: Option<&str>, text: &str) -> String {
    template
        .unwrap_or(DEFAULT_SUMMARY_PROMPT)
        .replace("{text}", text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prompt_wraps_text() {
        let p = summary_prompt(None, "Abstract: x\n\nConclusion: y");
        assert!(p.starts_with("Provide a summary with about two sentences"));
        assert!(p.contains("Abstract: x\n\nConclusion: y"));
        assert!(p.ends_with("Summary:"));
    }

    #[test]
    fn custom_template_is_used() {
        let p = summary_prompt(Some("TL;DR of {text}"), "paper");
        assert_eq!(p, "TL;DR of paper");
    }
}
