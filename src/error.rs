//! Error types for the edgequake-docsum library.
//!
//! Three distinct shapes reflect three distinct failure modes:
//!
//! * [`PipelineError`]: **Fatal**. The run cannot proceed (bad trigger
//!   payload, OCR timeout, model call failed). Wrapped in [`RunError`] by the
//!   orchestrator so callers also learn which stage failed.
//!
//! * [`ServiceError`]: a collaborator (Cloud Storage, Vision, Vertex AI,
//!   BigQuery, an LLM provider) failed at the transport or protocol level.
//!   Always surfaced through a [`PipelineError`] variant naming the operation.
//!
//! * [`InsertError`]: **Non-fatal**. The analytical table refused the record
//!   or the record was never sent because it failed validation. Returned as
//!   data next to an otherwise successful summary.

use crate::orchestrator::{PipelineState, Stage};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// All fatal errors returned by the edgequake-docsum library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Upload timestamp was not ISO-8601 with a trailing `Z`.
    #[error("Timestamp '{value}' is not in the expected format: expected ISO-8601 ending in \"Z\"")]
    InvalidTimestamp { value: String },

    /// A required trigger field was absent or not a string.
    #[error("Trigger payload is missing required field '{field}'")]
    MissingField { field: &'static str },

    /// The trigger payload matched none of the supported shapes.
    #[error("Unrecognised trigger payload: {0}")]
    InvalidTrigger(String),

    /// A `gs://bucket/key` URI could not be parsed.
    #[error("Invalid storage URI '{uri}': expected gs://<bucket>/<object>")]
    InvalidUri { uri: String },

    // ── OCR errors ────────────────────────────────────────────────────────
    /// The OCR service rejected the request or reported a failed operation.
    #[error("OCR failed for '{source_uri}': {detail}")]
    OcrFailed { source_uri: String, detail: String },

    /// The OCR operation did not complete within the configured bound.
    #[error("OCR operation '{operation}' did not finish within {secs}s")]
    OcrTimeout { operation: String, secs: u64 },

    /// An OCR output shard was not the expected JSON shape.
    #[error("Malformed OCR shard '{shard}': {detail}")]
    MalformedShard { shard: String, detail: String },

    // ── Collaborator errors ───────────────────────────────────────────────
    /// Object storage upload/list/download failed.
    #[error("Storage {operation} failed for '{uri}': {source}")]
    Storage {
        operation: &'static str,
        uri: String,
        #[source]
        source: ServiceError,
    },

    /// The generative-text service call failed.
    #[error("Summarization failed: {0}")]
    Summarization(#[source] ServiceError),

    /// The analytical table could not be reached at all.
    #[error("Persistence to '{table}' failed: {source}")]
    Persistence {
        table: String,
        #[source]
        source: ServiceError,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// No LLM provider could be created for the `provider` generator.
    #[error("LLM provider '{provider}' is not configured: {hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A transport or protocol failure reported by an external collaborator.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// The request never produced an HTTP response (DNS, TLS, timeout…).
    #[error("request to {service} failed: {detail}")]
    Transport { service: &'static str, detail: String },

    /// The service answered with a non-success status.
    #[error("{service} returned HTTP {status}: {body}")]
    Http {
        service: &'static str,
        status: u16,
        body: String,
    },

    /// The response body did not have the documented shape.
    #[error("malformed response from {service}: {detail}")]
    InvalidResponse { service: &'static str, detail: String },

    /// The requested object does not exist.
    #[error("object not found: {0}")]
    NotFound(String),
}

impl ServiceError {
    /// Whether a caller-side retry might succeed (HTTP 429 / 5xx, transport).
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Transport { .. } => true,
            ServiceError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// A pipeline run that ended in the `Failed` state.
///
/// `stage` is the step that failed. `state` is the last state the run
/// reached before it, so a failed summary upload reports
/// [`Stage::Upload`] in [`PipelineState::Windowed`].
#[derive(Debug, Error)]
#[error("run '{event_id}' failed in {stage} (after {state}): {source}")]
pub struct RunError {
    pub event_id: String,
    pub stage: Stage,
    pub state: PipelineState,
    #[source]
    pub source: PipelineError,
}

/// Classification of an [`InsertError`], so callers can branch without
/// inspecting messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertErrorKind {
    /// Project, dataset, or table identifier was empty; nothing was sent.
    MissingIdentifier,
    /// Every record field was empty; nothing was sent.
    EmptyRecord,
    /// The table rejected the row (schema mismatch, bad value).
    InvalidRow,
    /// The row was valid but not inserted because another row in the
    /// request failed.
    Stopped,
    /// Any other row-level reason reported by the table service.
    Backend,
}

impl InsertErrorKind {
    /// Map a BigQuery `insertErrors[].errors[].reason` string.
    pub fn from_reason(reason: &str) -> Self {
        match reason {
            "invalid" => InsertErrorKind::InvalidRow,
            "stopped" => InsertErrorKind::Stopped,
            _ => InsertErrorKind::Backend,
        }
    }

    /// True for errors produced locally before any write was attempted.
    pub fn is_validation(self) -> bool {
        matches!(
            self,
            InsertErrorKind::MissingIdentifier | InsertErrorKind::EmptyRecord
        )
    }
}

/// A row-level persistence error, returned as data rather than raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertError {
    pub kind: InsertErrorKind,
    pub message: String,
    /// Column the error refers to, when the table service reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl InsertError {
    pub fn new(kind: InsertErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

impl fmt::Display for InsertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{:?} at '{}': {}", self.kind, loc, self.message),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for InsertError {}
