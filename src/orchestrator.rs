//! Per-trigger state machine.
//!
//! ```text
//! Received ──▶ Extracted ──▶ Windowed ──▶ Summarized ──▶ Persisted
//!    │             │             │             │
//!    │             └──▶ NoContent│             │
//!    └─────────────┴─────────────┴─────────────┴──▶ Failed
//! ```
//!
//! Each run is strictly sequential: every stage gates the next. The
//! orchestrator never retries; redelivery belongs to whatever delivered the
//! trigger. Independent runs share only the immutable configuration and the
//! `Arc`'d collaborator clients, so one orchestrator can serve many
//! concurrent triggers.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, RunError};
use crate::event::{object_stem, DocumentEvent, Trigger};
use crate::output::{ExtractedDocument, RunOutcome, RunOutput, RunStats, SummarizationResult};
use crate::pipeline::ocr::OcrStage;
use crate::pipeline::persist::{PersistenceStage, SummaryRecord};
use crate::pipeline::summarize::SummarizationStage;
use crate::pipeline::window::{SummaryWindow, TextWindowSelector};
use crate::progress::ProgressCallback;
use crate::prompts::summary_prompt;
use crate::services::{ObjectStore, ObjectUri, Services};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Received,
    Extracted,
    Windowed,
    Summarized,
    Persisted,
    /// Terminal: extraction produced no text.
    NoContent,
    /// Terminal: a stage failed.
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineState::Persisted | PipelineState::NoContent | PipelineState::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineState::Received => "received",
            PipelineState::Extracted => "extracted",
            PipelineState::Windowed => "windowed",
            PipelineState::Summarized => "summarized",
            PipelineState::Persisted => "persisted",
            PipelineState::NoContent => "no_content",
            PipelineState::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The step of a run that produced a [`RunError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// OCR submission, polling, or shard collection.
    Ocr,
    /// Writing the complete text or the summary to the output bucket.
    Upload,
    /// The text-model call.
    Summarize,
    /// The table write (transport failures only; row errors are data).
    Persist,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Ocr => "ocr",
            Stage::Upload => "upload",
            Stage::Summarize => "summarize",
            Stage::Persist => "persist",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object key of an uploaded artifact: `<stem>/<file>`.
const COMPLETE_TEXT_FILE: &str = "complete_text.txt";
const SUMMARY_FILE: &str = "summary.txt";

/// Drives triggers through OCR, windowing, summarization and persistence.
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    storage: Arc<dyn ObjectStore>,
    ocr: OcrStage,
    selector: TextWindowSelector,
    summarizer: SummarizationStage,
    persister: PersistenceStage,
}

/// Normalised view of a trigger once its text is known.
struct Source {
    bucket: String,
    filename: String,
    stem: String,
    timestamp: DateTime<Utc>,
}

impl PipelineOrchestrator {
    pub fn new(config: PipelineConfig, services: Services) -> Self {
        let ocr = OcrStage::new(services.ocr, Arc::clone(&services.storage))
            .with_batch_size(config.ocr_batch_size)
            .with_poll_interval(Duration::from_millis(config.ocr_poll_interval_ms))
            .with_shard_concurrency(config.shard_concurrency);
        Self {
            selector: TextWindowSelector::new(config.window.clone()),
            summarizer: SummarizationStage::new(services.generator),
            persister: PersistenceStage::new(services.table, config.table.clone()),
            storage: services.storage,
            ocr,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// OCR output prefix for one run:
    /// `gs://<output_bucket>/<ocr_prefix>/<source_bucket>/<object_name>/<event_id>/`.
    ///
    /// The full object name keeps `paper.pdf` and `paper/appendix.pdf` apart,
    /// the source bucket separates same-named uploads, and the event id
    /// separates redeliveries.
    pub fn ocr_output_location(&self, event: &DocumentEvent) -> ObjectUri {
        ObjectUri::new(
            &self.config.output_bucket,
            format!(
                "{}/{}/{}/{}/",
                self.config.ocr_prefix,
                event.source_bucket,
                event.object_name,
                event.event_id.replace('/', "_")
            ),
        )
    }

    /// Run one trigger to a terminal state.
    ///
    /// # Returns
    /// * `Ok(RunOutcome::Persisted)`: summary produced; row-level insert
    ///   errors, if any, are inside the output
    /// * `Ok(RunOutcome::NoContent)`: extraction found no text
    ///
    /// # Errors
    /// [`RunError`] naming the failing [`Stage`] and the last state reached.
    pub async fn run(&self, trigger: Trigger) -> Result<RunOutcome, RunError> {
        let mut run = RunTracker::start(
            trigger.event_id(),
            &trigger.source_label(),
            self.config.progress_callback.clone(),
        );
        let mut stats = RunStats::default();

        // ── Received → Extracted ─────────────────────────────────────────
        let extract_start = Instant::now();
        let (document, source) = match self.extract(trigger).await {
            Ok(v) => v,
            Err(e) => return Err(run.fail(Stage::Ocr, e)),
        };
        stats.extract_duration_ms = extract_start.elapsed().as_millis() as u64;
        stats.extracted_chars = document.full_text.chars().count();
        run.advance(PipelineState::Extracted);

        if document.full_text.trim().is_empty() {
            warn!(
                event_id = %run.event_id,
                source = %run.source,
                "No text extracted; nothing to summarize"
            );
            run.advance(PipelineState::NoContent);
            stats.total_duration_ms = run.elapsed_ms();
            return Ok(RunOutcome::NoContent {
                event_id: run.event_id.clone(),
                source: run.source.clone(),
                stats,
            });
        }

        // ── Extracted → Windowed ─────────────────────────────────────────
        let complete_text_uri = match self
            .upload_artifact(&source.stem, COMPLETE_TEXT_FILE, &document.full_text)
            .await
        {
            Ok(uri) => uri,
            Err(e) => return Err(run.fail(Stage::Upload, e)),
        };
        let (window, prompt_body) = self.window(&document.full_text, &run);
        run.advance(PipelineState::Windowed);

        // ── Windowed → Summarized ────────────────────────────────────────
        let prompt = summary_prompt(self.config.prompt_template.as_deref(), &prompt_body);
        stats.prompt_chars = prompt.chars().count();
        let summarize_start = Instant::now();
        let summary_text = match self.summarizer.summarize(&prompt, &self.config.decoding).await {
            Ok(text) => text,
            Err(e) => return Err(run.fail(Stage::Summarize, e)),
        };
        let summary_uri = match self
            .upload_artifact(&source.stem, SUMMARY_FILE, &summary_text)
            .await
        {
            Ok(uri) => uri,
            Err(e) => return Err(run.fail(Stage::Upload, e)),
        };
        stats.summarize_duration_ms = summarize_start.elapsed().as_millis() as u64;
        run.advance(PipelineState::Summarized);

        // ── Summarized → Persisted ───────────────────────────────────────
        let record = SummaryRecord {
            bucket: source.bucket,
            filename: source.filename,
            extracted_text: document.full_text,
            summary: summary_text.clone(),
            complete_text_uri,
            summary_uri,
            timestamp: Some(source.timestamp),
        };
        let persist_start = Instant::now();
        let insert_errors = match self.persister.persist(&record).await {
            Ok(errors) => errors,
            Err(e) => return Err(run.fail(Stage::Persist, e)),
        };
        stats.persist_duration_ms = persist_start.elapsed().as_millis() as u64;
        if !insert_errors.is_empty() {
            error!(
                event_id = %run.event_id,
                table = %self.persister.table(),
                count = insert_errors.len(),
                "Summary kept but the row was not written cleanly"
            );
            if let Some(ref cb) = run.callback {
                cb.on_insert_errors(&run.event_id, &insert_errors);
            }
        }
        run.advance(PipelineState::Persisted);
        stats.total_duration_ms = run.elapsed_ms();

        info!(
            event_id = %run.event_id,
            total_ms = stats.total_duration_ms,
            insert_errors = insert_errors.len(),
            "Run complete"
        );

        Ok(RunOutcome::Persisted(RunOutput {
            event_id: run.event_id.clone(),
            summary: SummarizationResult {
                summary_text,
                source_window: window,
            },
            record,
            insert_errors,
            stats,
        }))
    }

    async fn extract(&self, trigger: Trigger) -> Result<(ExtractedDocument, Source), PipelineError> {
        match trigger {
            Trigger::Storage(event) => {
                if self.config.output_bucket.is_empty() {
                    return Err(PipelineError::InvalidConfig(
                        "an output bucket is required to OCR uploaded documents".into(),
                    ));
                }
                let stem = event.stem().to_string();
                let full_text = self
                    .ocr
                    .extract(
                        &event.source_uri(),
                        &event.mime_type,
                        &self.ocr_output_location(&event),
                        Duration::from_secs(self.config.ocr_timeout_secs),
                    )
                    .await?;
                Ok((
                    ExtractedDocument {
                        full_text,
                        source_event_id: event.event_id,
                    },
                    Source {
                        bucket: event.source_bucket,
                        filename: event.object_name,
                        stem,
                        timestamp: event.time_uploaded,
                    },
                ))
            }
            Trigger::DirectText(direct) => Ok((
                ExtractedDocument {
                    full_text: direct.text,
                    source_event_id: direct.event_id,
                },
                Source {
                    bucket: String::new(),
                    stem: object_stem(&direct.name).to_string(),
                    filename: direct.name,
                    timestamp: direct.received_at,
                },
            )),
        }
    }

    /// Window selection, or the whole text when windowing is disabled.
    fn window(&self, full_text: &str, run: &RunTracker) -> (SummaryWindow, String) {
        if !self.config.windowing {
            return (SummaryWindow::default(), full_text.to_string());
        }
        let window = self.selector.select(full_text);
        if let Some(ref cb) = run.callback {
            let markers = self.selector.config();
            if !window.abstract_marker_found {
                cb.on_marker_missing(&run.event_id, &markers.abstract_marker);
            }
            if !window.conclusion_marker_found {
                cb.on_marker_missing(&run.event_id, &markers.conclusion_marker);
            }
        }
        let body = window.to_prompt();
        (window, body)
    }

    /// Upload `content` to `<output_bucket>/<stem>/<file>` and return its URI.
    /// With no output bucket configured nothing is uploaded and the URI is empty.
    async fn upload_artifact(&self, stem: &str, file: &str, content: &str) -> Result<String, PipelineError> {
        if self.config.output_bucket.is_empty() {
            return Ok(String::new());
        }
        let uri = ObjectUri::new(&self.config.output_bucket, format!("{stem}/{file}"));
        self.storage
            .upload(&uri.bucket, &uri.key, content)
            .await
            .map_err(|source| PipelineError::Storage {
                operation: "upload",
                uri: uri.to_string(),
                source,
            })?;
        Ok(uri.to_string())
    }
}

/// Current state of one run plus its observability hooks.
struct RunTracker {
    event_id: String,
    source: String,
    state: PipelineState,
    callback: Option<ProgressCallback>,
    started: Instant,
}

impl RunTracker {
    fn start(event_id: &str, source: &str, callback: Option<ProgressCallback>) -> Self {
        info!(event_id, source, state = %PipelineState::Received, "Run started");
        if let Some(ref cb) = callback {
            cb.on_run_start(event_id, source);
        }
        Self {
            event_id: event_id.to_string(),
            source: source.to_string(),
            state: PipelineState::Received,
            callback,
            started: Instant::now(),
        }
    }

    fn advance(&mut self, to: PipelineState) {
        let from = self.state;
        info!(
            event_id = %self.event_id,
            from = %from,
            to = %to,
            elapsed_ms = self.elapsed_ms(),
            "State transition"
        );
        if let Some(ref cb) = self.callback {
            cb.on_transition(&self.event_id, from, to);
        }
        self.state = to;
    }

    fn fail(mut self, stage: Stage, source: PipelineError) -> RunError {
        let state = self.state;
        error!(
            event_id = %self.event_id,
            stage = %stage,
            state = %state,
            "Run failed: {}",
            source
        );
        self.advance(PipelineState::Failed);
        RunError {
            event_id: self.event_id,
            stage,
            state,
            source,
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_snake_case() {
        assert_eq!(PipelineState::Received.to_string(), "received");
        assert_eq!(PipelineState::NoContent.to_string(), "no_content");
        assert_eq!(
            serde_json::to_value(PipelineState::NoContent).unwrap(),
            "no_content"
        );
    }

    #[test]
    fn stage_names() {
        assert_eq!(Stage::Ocr.to_string(), "ocr");
        assert_eq!(Stage::Persist.to_string(), "persist");
        assert_eq!(serde_json::to_value(Stage::Summarize).unwrap(), "summarize");
    }

    #[test]
    fn terminal_states() {
        assert!(PipelineState::Persisted.is_terminal());
        assert!(PipelineState::NoContent.is_terminal());
        assert!(PipelineState::Failed.is_terminal());
        assert!(!PipelineState::Windowed.is_terminal());
    }
}
