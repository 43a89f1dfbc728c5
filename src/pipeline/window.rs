//! Abstract/conclusion windowing for token-limited summarisation models.
//!
//! Academic papers put their densest summary material in two places: the
//! abstract and the conclusion. Rather than truncating the head of a long
//! document, the selector looks for those two headings and keeps a bounded
//! excerpt starting at each one.
//!
//! The heuristic is approximate and order-insensitive: each marker is
//! located independently, so a document whose conclusion heading precedes
//! its abstract heading is windowed without complaint. Matching is
//! case-insensitive and the excerpts are taken from the lower-cased text.
//! Budgets count `char`s, never bytes, so slicing can never split a
//! multi-byte character.

use crate::config::WindowConfig;
use crate::prompts::MISSING_SECTION_WARNING;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// The two excerpts selected from a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryWindow {
    pub abstract_excerpt: String,
    pub conclusion_excerpt: String,
    pub abstract_marker_found: bool,
    pub conclusion_marker_found: bool,
}

impl SummaryWindow {
    /// Render both excerpts as one prompt-ready block.
    pub fn to_prompt(&self) -> String {
        format!(
            "Abstract: {}\n\nConclusion: {}",
            self.abstract_excerpt, self.conclusion_excerpt
        )
    }
}

/// A [`select`] bound to a fixed [`WindowConfig`].
#[derive(Debug, Clone, Default)]
pub struct TextWindowSelector {
    config: WindowConfig,
}

impl TextWindowSelector {
    pub fn new(config: WindowConfig) -> Self {
        Self { config }
    }

    pub fn select(&self, full_text: &str) -> SummaryWindow {
        select(
            full_text,
            self.config.abstract_budget,
            self.config.conclusion_budget,
            &self.config.abstract_marker,
            &self.config.conclusion_marker,
        )
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }
}

/// Select the abstract and conclusion excerpts of `full_text`.
///
/// * Abstract marker at `a` → `text[a .. a + abstract_budget]`; absent →
///   `text[.. abstract_budget]`.
/// * Conclusion marker at `c` → `text[c ..]` capped to `conclusion_budget`;
///   absent → the last `conclusion_budget` characters.
///
/// A missing marker is logged at WARNING and reported through the
/// `*_marker_found` flags. It is never an error, and neither is empty text.
pub fn select(
    full_text: &str,
    abstract_budget: usize,
    conclusion_budget: usize,
    abstract_marker: &str,
    conclusion_marker: &str,
) -> SummaryWindow {
    let text = full_text.to_lowercase();

    let abstract_start = text.find(&abstract_marker.to_lowercase());
    if abstract_start.is_none() {
        warn!(marker = abstract_marker, "{}", MISSING_SECTION_WARNING);
    }
    let abstract_excerpt = take_chars(&text[abstract_start.unwrap_or(0)..], abstract_budget);

    let conclusion_start = text.find(&conclusion_marker.to_lowercase());
    let conclusion_excerpt = match conclusion_start {
        Some(c) => take_chars(&text[c..], conclusion_budget),
        None => {
            warn!(marker = conclusion_marker, "{}", MISSING_SECTION_WARNING);
            last_chars(&text, conclusion_budget)
        }
    };

    SummaryWindow {
        abstract_excerpt,
        conclusion_excerpt,
        abstract_marker_found: abstract_start.is_some(),
        conclusion_marker_found: conclusion_start.is_some(),
    }
}

fn take_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

fn last_chars(s: &str, n: usize) -> String {
    let len = s.chars().count();
    s.chars().skip(len.saturating_sub(n)).collect()
}
