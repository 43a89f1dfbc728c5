//! Trigger boundary: raw JSON payload → [`Trigger`].
//!
//! Upload notifications arrive in more than one envelope (a bare storage
//! object resource, a CloudEvent wrapping one, or a hand-made request that
//! already carries extracted text). They are resolved here, once, so the
//! orchestrator only ever sees a normalised [`DocumentEvent`] or
//! pre-extracted text. Any parsing failure is an input-format error raised
//! before a run starts.

use crate::error::PipelineError;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// MIME type assumed when the notification does not carry one.
pub const DEFAULT_MIME_TYPE: &str = "application/pdf";

/// Event id used for direct-text triggers that do not supply one.
pub const DIRECT_TEXT_EVENT_ID: &str = "direct-text";

/// One upload to cloud storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentEvent {
    /// Opaque id used only to correlate log lines.
    pub event_id: String,
    pub source_bucket: String,
    pub object_name: String,
    pub mime_type: String,
    pub time_uploaded: DateTime<Utc>,
}

impl DocumentEvent {
    /// `gs://bucket/object` of the uploaded document.
    pub fn source_uri(&self) -> String {
        format!("gs://{}/{}", self.source_bucket, self.object_name)
    }

    /// Object name without its final extension (`papers/a.pdf` → `papers/a`).
    pub fn stem(&self) -> &str {
        object_stem(&self.object_name)
    }
}

/// A request carrying text that was extracted elsewhere; OCR is skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectTextTrigger {
    pub event_id: String,
    pub name: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

/// The two trigger shapes the orchestrator accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    Storage(DocumentEvent),
    DirectText(DirectTextTrigger),
}

impl Trigger {
    /// Parse a raw JSON request body.
    pub fn from_slice(body: &[u8]) -> Result<Self, PipelineError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| PipelineError::InvalidTrigger(format!("body is not JSON: {e}")))?;
        Self::from_json(&value)
    }

    /// Resolve a JSON payload into a trigger.
    ///
    /// Accepted shapes, checked in order:
    /// 1. CloudEvent envelope: `{id, type, data: {bucket, name, timeCreated, ...}}`
    /// 2. Storage object resource: `{id, bucket, name, timeCreated, contentType?}`
    /// 3. Direct text: `{name, text, id?}`
    pub fn from_json(value: &Value) -> Result<Self, PipelineError> {
        let obj = value
            .as_object()
            .ok_or_else(|| PipelineError::InvalidTrigger("payload is not a JSON object".into()))?;

        if let Some(data) = obj.get("data").filter(|d| d.get("bucket").is_some()) {
            let event_id = required_str(value, "id")?;
            return storage_event(event_id, data).map(Trigger::Storage);
        }

        if obj.contains_key("bucket") {
            let event_id = required_str(value, "id")?;
            return storage_event(event_id, value).map(Trigger::Storage);
        }

        if obj.contains_key("text") {
            let event_id = optional_str(value, "id").unwrap_or(DIRECT_TEXT_EVENT_ID);
            return Ok(Trigger::DirectText(DirectTextTrigger {
                event_id: event_id.to_string(),
                name: required_str(value, "name")?.to_string(),
                text: present_str(value, "text")?.to_string(),
                received_at: Utc::now(),
            }));
        }

        Err(PipelineError::InvalidTrigger(
            "expected a storage notification (bucket/name) or direct text (name/text)".into(),
        ))
    }

    pub fn event_id(&self) -> &str {
        match self {
            Trigger::Storage(e) => &e.event_id,
            Trigger::DirectText(t) => &t.event_id,
        }
    }

    /// Human-readable origin used in logs: the `gs://` URI or the name.
    pub fn source_label(&self) -> String {
        match self {
            Trigger::Storage(e) => e.source_uri(),
            Trigger::DirectText(t) => t.name.clone(),
        }
    }
}

fn storage_event(event_id: &str, data: &Value) -> Result<DocumentEvent, PipelineError> {
    Ok(DocumentEvent {
        event_id: event_id.to_string(),
        source_bucket: required_str(data, "bucket")?.to_string(),
        object_name: required_str(data, "name")?.to_string(),
        mime_type: optional_str(data, "contentType")
            .unwrap_or(DEFAULT_MIME_TYPE)
            .to_string(),
        time_uploaded: parse_zulu_timestamp(required_str(data, "timeCreated")?)?,
    })
}

fn required_str<'a>(value: &'a Value, field: &'static str) -> Result<&'a str, PipelineError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or(PipelineError::MissingField { field })
}

/// Like [`required_str`] but an empty string is a valid value.
fn present_str<'a>(value: &'a Value, field: &'static str) -> Result<&'a str, PipelineError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .ok_or(PipelineError::MissingField { field })
}

fn optional_str<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value.get(field).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Parse an ISO-8601 timestamp that must end in a literal `Z`.
///
/// `2023-05-08T19:28:55.255Z` parses; `2023-05-08T19:28:55+00:00` and
/// `2023-05-08T19:28:55` do not.
pub fn parse_zulu_timestamp(value: &str) -> Result<DateTime<Utc>, PipelineError> {
    let invalid = || PipelineError::InvalidTimestamp {
        value: value.to_string(),
    };

    let Some(naive_part) = value.strip_suffix('Z') else {
        return Err(invalid());
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    // Minute precision is valid ISO-8601 but not RFC 3339.
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(naive_part, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(invalid)
}

/// Strip the final extension from an object name, keeping its directory.
pub fn object_stem(name: &str) -> &str {
    let file_start = name.rfind('/').map(|i| i + 1).unwrap_or(0);
    match name[file_start..].rfind('.') {
        Some(0) | None => name,
        Some(dot) => &name[..file_start + dot],
    }
}
