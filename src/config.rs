//! Configuration types for the summarisation pipeline.
//!
//! Every knob lives in [`PipelineConfig`], built once per process via
//! [`PipelineConfigBuilder`] and shared read-only across runs. Stage logic
//! never reads the environment; the CLI maps `env` fallbacks onto the
//! builder before the orchestrator is constructed.

use crate::error::PipelineError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fully qualified analytical table: `project.dataset.table`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl TableRef {
    pub fn new(
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
        table_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
            table_id: table_id.into(),
        }
    }

    /// True when any of the three identifiers is empty.
    pub fn is_incomplete(&self) -> bool {
        self.project_id.is_empty() || self.dataset_id.is_empty() || self.table_id.is_empty()
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}

/// Decoding parameters sent with every summarisation request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecodingParams {
    /// Sampling temperature. Default: 0.2.
    pub temperature: f32,
    /// Upper bound on generated tokens. Default: 256 (about two sentences
    /// with headroom).
    pub max_output_tokens: u32,
    /// Nucleus-sampling cumulative probability. Default: 0.95.
    pub top_p: f32,
    /// Number of highest-probability tokens considered. Default: 40.
    pub top_k: u32,
}

impl Default for DecodingParams {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_output_tokens: 256,
            top_p: 0.95,
            top_k: 40,
        }
    }
}

/// Budgets and markers for the abstract/conclusion heuristic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Characters kept from the abstract marker onward. Default: 1200
    /// (150 words at roughly 8 characters each).
    pub abstract_budget: usize,
    /// Characters kept from the conclusion marker onward. Default: 1600
    /// (200 words at roughly 8 characters each).
    pub conclusion_budget: usize,
    /// Default: `"abstract"`. Matched case-insensitively.
    pub abstract_marker: String,
    /// Default: `"conclusion"`. Matched case-insensitively.
    pub conclusion_marker: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            abstract_budget: 150 * 8,
            conclusion_budget: 200 * 8,
            abstract_marker: "abstract".to_string(),
            conclusion_marker: "conclusion".to_string(),
        }
    }
}

/// Configuration for one pipeline deployment.
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_docsum::{PipelineConfig, TableRef};
///
/// let config = PipelineConfig::builder()
///     .project_id("my-project")
///     .output_bucket("my-project-docsum")
///     .table(TableRef::new("my-project", "academic_papers", "summarizations"))
///     .ocr_timeout_secs(300)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Cloud project hosting the OCR and model endpoints.
    pub project_id: String,

    /// Region of the model endpoint. Default: `us-central1`.
    pub location: String,

    /// Generative model identifier. Default: `text-bison@001`.
    pub model_name: String,

    /// Bucket receiving OCR shards, the complete text and the summary.
    ///
    /// Required for storage triggers. Left empty, direct-text runs skip the
    /// artifact uploads and record empty URIs.
    pub output_bucket: String,

    /// Object prefix for OCR shards inside `output_bucket`. Default: `ocr`.
    ///
    /// Each run writes under its own sub-prefix
    /// (`ocr/<source_bucket>/<object_name>/<event_id>/`) and only reads the
    /// shard files directly beneath it.
    pub ocr_prefix: String,

    /// Pages per OCR output shard. Default: 2.
    pub ocr_batch_size: u32,

    /// Upper bound on waiting for the OCR operation. Default: 420.
    pub ocr_timeout_secs: u64,

    /// Delay between OCR operation polls in milliseconds. Default: 5000.
    pub ocr_poll_interval_ms: u64,

    /// Shards downloaded concurrently; output order is still listing order.
    /// Default: 4.
    pub shard_concurrency: usize,

    /// Apply the abstract/conclusion window before summarising. Default: true.
    pub windowing: bool,

    /// Window budgets and markers.
    pub window: WindowConfig,

    /// Decoding parameters for the summarisation call.
    pub decoding: DecodingParams,

    /// Prompt template with a `{text}` placeholder. If None, uses
    /// [`crate::prompts::DEFAULT_SUMMARY_PROMPT`].
    pub prompt_template: Option<String>,

    /// Destination table for summary records.
    pub table: TableRef,

    /// Per-request timeout for model calls in seconds. Default: 900.
    pub api_timeout_secs: u64,

    /// Transport retries inside the model client (HTTP 429/5xx). Default: 3.
    pub max_retries: u32,

    /// Initial backoff between transport retries in milliseconds. Default: 100.
    pub retry_backoff_ms: u64,

    /// Receives every state transition of every run.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            location: "us-central1".to_string(),
            model_name: "text-bison@001".to_string(),
            output_bucket: String::new(),
            ocr_prefix: "ocr".to_string(),
            ocr_batch_size: 2,
            ocr_timeout_secs: 420,
            ocr_poll_interval_ms: 5000,
            shard_concurrency: 4,
            windowing: true,
            window: WindowConfig::default(),
            decoding: DecodingParams::default(),
            prompt_template: None,
            table: TableRef::default(),
            api_timeout_secs: 900,
            max_retries: 3,
            retry_backoff_ms: 100,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("project_id", &self.project_id)
            .field("location", &self.location)
            .field("model_name", &self.model_name)
            .field("output_bucket", &self.output_bucket)
            .field("ocr_prefix", &self.ocr_prefix)
            .field("ocr_batch_size", &self.ocr_batch_size)
            .field("ocr_timeout_secs", &self.ocr_timeout_secs)
            .field("ocr_poll_interval_ms", &self.ocr_poll_interval_ms)
            .field("shard_concurrency", &self.shard_concurrency)
            .field("windowing", &self.windowing)
            .field("window", &self.window)
            .field("decoding", &self.decoding)
            .field("table", &self.table)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn project_id(mut self, project: impl Into<String>) -> Self {
        self.config.project_id = project.into();
        self
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.config.location = location.into();
        self
    }

    pub fn model_name(mut self, model: impl Into<String>) -> Self {
        self.config.model_name = model.into();
        self
    }

    pub fn output_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.config.output_bucket = bucket.into();
        self
    }

    pub fn ocr_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.ocr_prefix = prefix.into().trim_matches('/').to_string();
        self
    }

    pub fn ocr_batch_size(mut self, n: u32) -> Self {
        self.config.ocr_batch_size = n.clamp(1, 100);
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs;
        self
    }

    pub fn ocr_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.ocr_poll_interval_ms = ms;
        self
    }

    pub fn shard_concurrency(mut self, n: usize) -> Self {
        self.config.shard_concurrency = n.max(1);
        self
    }

    pub fn windowing(mut self, v: bool) -> Self {
        self.config.windowing = v;
        self
    }

    pub fn abstract_budget(mut self, chars: usize) -> Self {
        self.config.window.abstract_budget = chars;
        self
    }

    pub fn conclusion_budget(mut self, chars: usize) -> Self {
        self.config.window.conclusion_budget = chars;
        self
    }

    pub fn markers(mut self, abstract_marker: impl Into<String>, conclusion_marker: impl Into<String>) -> Self {
        self.config.window.abstract_marker = abstract_marker.into();
        self.config.window.conclusion_marker = conclusion_marker.into();
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.decoding.temperature = t.clamp(0.0, 1.0);
        self
    }

    pub fn max_output_tokens(mut self, n: u32) -> Self {
        self.config.decoding.max_output_tokens = n;
        self
    }

    pub fn top_p(mut self, p: f32) -> Self {
        self.config.decoding.top_p = p.clamp(0.0, 1.0);
        self
    }

    pub fn top_k(mut self, k: u32) -> Self {
        self.config.decoding.top_k = k.clamp(1, 40);
        self
    }

    pub fn prompt_template(mut self, template: impl Into<String>) -> Self {
        self.config.prompt_template = Some(template.into());
        self
    }

    pub fn table(mut self, table: TableRef) -> Self {
        self.config.table = table;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    ///
    /// An incomplete [`TableRef`] is accepted here on purpose: the
    /// persistence stage reports it as a validation error at write time
    /// without failing the run.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.ocr_timeout_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "OCR timeout must be ≥ 1 second".into(),
            ));
        }
        if c.ocr_poll_interval_ms == 0 {
            return Err(PipelineError::InvalidConfig(
                "OCR poll interval must be ≥ 1 ms".into(),
            ));
        }
        if c.ocr_prefix.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "OCR prefix must not be empty: shards would mix with uploaded artifacts".into(),
            ));
        }
        if c.window.abstract_marker.is_empty() || c.window.conclusion_marker.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "Window markers must not be empty".into(),
            ));
        }
        if let Some(ref template) = c.prompt_template {
            if !template.contains("{text}") {
                return Err(PipelineError::InvalidConfig(
                    "Prompt template must contain a {text} placeholder".into(),
                ));
            }
        }
        Ok(self.config)
    }
}
