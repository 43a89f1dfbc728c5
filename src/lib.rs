//! # edgequake-docsum
//!
//! Summarise uploaded PDF documents: OCR the file, pick the parts of the
//! text most likely to summarise it, ask a text model for a two-sentence
//! summary, and record the result in an analytical table.
//!
//! ## Why windowing?
//!
//! Text models accept a bounded prompt. Academic papers concentrate their
//! summary material in the abstract and the conclusion, so instead of
//! truncating the head of the document the pipeline sends a bounded excerpt
//! starting at each of those headings (see [`pipeline::window`]).
//!
//! ## Pipeline Overview
//!
//! ```text
//! trigger (storage upload | direct text)
//!  │
//!  ├─ 1. Extract    Vision asyncBatchAnnotate → JSON shards → full text
//!  ├─ 2. Window     abstract / conclusion excerpts (char budgets)
//!  ├─ 3. Summarize  Vertex AI text model, or any edgequake-llm provider
//!  └─ 4. Persist    one BigQuery row; row errors returned, not raised
//! ```
//!
//! Empty extracted text ends the run as [`RunOutcome::NoContent`] without
//! calling the model or the table.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_docsum::{PipelineConfig, PipelineOrchestrator, Services, TableRef, Trigger};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .project_id("my-project")
//!         .output_bucket("my-project-docsum")
//!         .table(TableRef::new("my-project", "academic_papers", "summarizations"))
//!         .build()?;
//!     let token = std::env::var("GOOGLE_ACCESS_TOKEN").ok();
//!     let services = Services::google(&config, token)?;
//!     let orchestrator = PipelineOrchestrator::new(config, services);
//!
//!     let trigger = Trigger::from_slice(br#"{
//!         "id": "7631145714375969",
//!         "bucket": "my-project-uploads",
//!         "name": "paper.pdf",
//!         "timeCreated": "2023-05-08T19:28:55.255Z"
//!     }"#)?;
//!     let outcome = orchestrator.run(trigger).await?;
//!     println!("{:?}", outcome.summary_text());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docsum` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-docsum = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod event;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod services;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{DecodingParams, PipelineConfig, PipelineConfigBuilder, TableRef, WindowConfig};
pub use error::{InsertError, InsertErrorKind, PipelineError, RunError, ServiceError};
pub use event::{DirectTextTrigger, DocumentEvent, Trigger};
pub use orchestrator::{PipelineOrchestrator, PipelineState, Stage};
pub use output::{ExtractedDocument, RunOutcome, RunOutput, RunStats, SummarizationResult};
pub use pipeline::persist::SummaryRecord;
pub use pipeline::window::{select, SummaryWindow, TextWindowSelector};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use services::{ObjectStore, OcrService, Services, TableSink, TextGenerator};
