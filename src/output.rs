//! Output types returned by [`crate::PipelineOrchestrator::run`].

use crate::error::InsertError;
use crate::orchestrator::PipelineState;
use crate::pipeline::persist::SummaryRecord;
use crate::pipeline::window::SummaryWindow;
use serde::{Deserialize, Serialize};

/// Text recovered from one trigger.
///
/// `full_text` may be empty: zero recognised characters is a valid result,
/// distinct from an OCR failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedDocument {
    pub full_text: String,
    pub source_event_id: String,
}

/// Model output together with the window it was generated from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummarizationResult {
    pub summary_text: String,
    pub source_window: SummaryWindow,
}

/// Per-stage wall-clock timings for one run, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub extract_duration_ms: u64,
    pub summarize_duration_ms: u64,
    pub persist_duration_ms: u64,
    pub total_duration_ms: u64,
    /// Characters of extracted text.
    pub extracted_chars: usize,
    /// Characters of the prompt sent to the model.
    pub prompt_chars: usize,
}

/// A run that reached `Persisted`.
///
/// `insert_errors` is non-empty when the table rejected the row or the
/// record failed validation; the summary is still valid in that case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    pub event_id: String,
    pub summary: SummarizationResult,
    pub record: SummaryRecord,
    pub insert_errors: Vec<InsertError>,
    pub stats: RunStats,
}

/// Terminal result of a run that did not fail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Persisted(RunOutput),
    /// Extraction produced no text; nothing was summarised or written.
    NoContent {
        event_id: String,
        source: String,
        stats: RunStats,
    },
}

impl RunOutcome {
    pub fn state(&self) -> PipelineState {
        match self {
            RunOutcome::Persisted(_) => PipelineState::Persisted,
            RunOutcome::NoContent { .. } => PipelineState::NoContent,
        }
    }

    pub fn event_id(&self) -> &str {
        match self {
            RunOutcome::Persisted(out) => &out.event_id,
            RunOutcome::NoContent { event_id, .. } => event_id,
        }
    }

    pub fn summary_text(&self) -> Option<&str> {
        match self {
            RunOutcome::Persisted(out) => Some(&out.summary.summary_text),
            RunOutcome::NoContent { .. } => None,
        }
    }

    pub fn insert_errors(&self) -> &[InsertError] {
        match self {
            RunOutcome::Persisted(out) => &out.insert_errors,
            RunOutcome::NoContent { .. } => &[],
        }
    }

    pub fn stats(&self) -> &RunStats {
        match self {
            RunOutcome::Persisted(out) => &out.stats,
            RunOutcome::NoContent { stats, .. } => stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_content_serialises_with_status_tag() {
        let outcome = RunOutcome::NoContent {
            event_id: "e1".into(),
            source: "gs://in/blank.pdf".into(),
            stats: RunStats::default(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "no_content");
        assert_eq!(json["event_id"], "e1");
        assert_eq!(outcome.state(), PipelineState::NoContent);
        assert!(outcome.summary_text().is_none());
        assert!(outcome.insert_errors().is_empty());
    }
}
