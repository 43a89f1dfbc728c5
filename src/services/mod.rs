//! Collaborator interfaces and their concrete clients.
//!
//! The pipeline talks to the outside world through four narrow async traits.
//! Stages depend only on the traits; the Google Cloud REST clients in the
//! submodules are one implementation, in-process fakes in tests are another.
//!
//! | Trait | Google Cloud client | Other |
//! |-------|---------------------|-------|
//! | [`ObjectStore`]   | [`gcs::GcsObjectStore`]        | [`memory::MemoryObjectStore`] |
//! | [`OcrService`]    | [`vision::VisionOcrService`]   | |
//! | [`TextGenerator`] | [`vertex::VertexTextGenerator`] | [`provider::ProviderTextGenerator`] |
//! | [`TableSink`]     | [`bigquery::BigQueryTableSink`] | |
//!
//! Authentication is out of scope: clients accept an optional OAuth bearer
//! token obtained by the host (metadata server, `gcloud auth
//! print-access-token`, workload identity…).

pub mod bigquery;
pub mod gcs;
pub mod memory;
pub mod provider;
pub mod vertex;
pub mod vision;

use crate::config::{DecodingParams, PipelineConfig, TableRef};
use crate::error::{InsertError, PipelineError, ServiceError};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// A `gs://bucket/key` location. `key` may be empty (bucket root) or end
/// with `/` (a prefix).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectUri {
    pub bucket: String,
    pub key: String,
}

impl ObjectUri {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

static RE_GS_URI: Lazy<Regex> = Lazy::new(|| Regex::new(r"^gs://([^/]+)/(.*)$").unwrap());

impl FromStr for ObjectUri {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = RE_GS_URI
            .captures(s)
            .ok_or_else(|| PipelineError::InvalidUri { uri: s.to_string() })?;
        Ok(Self::new(&caps[1], &caps[2]))
    }
}

impl fmt::Display for ObjectUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gs://{}/{}", self.bucket, self.key)
    }
}

/// Cloud object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create or replace `key` in `bucket` with UTF-8 `content`.
    async fn upload(&self, bucket: &str, key: &str, content: &str) -> Result<(), ServiceError>;

    /// Every object name under `prefix`, in the store's listing order
    /// (lexicographic for Cloud Storage). Directory markers are included;
    /// callers filter them.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, ServiceError>;

    /// Raw bytes of one object.
    async fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ServiceError>;
}

/// One batch OCR submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrRequest {
    pub source_uri: String,
    pub mime_type: String,
    /// Prefix the service writes its JSON shards under; ends with `/`.
    pub output_uri_prefix: String,
    /// Pages per output shard.
    pub batch_size: u32,
}

/// State of a long-running OCR operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    Running,
    Done,
    Failed(String),
}

/// Asynchronous document OCR.
#[async_trait]
pub trait OcrService: Send + Sync {
    /// Start the operation; returns its name for polling.
    async fn submit(&self, request: &OcrRequest) -> Result<String, ServiceError>;

    /// Current state of a previously submitted operation.
    async fn poll(&self, operation: &str) -> Result<OperationStatus, ServiceError>;
}

/// Generative text model.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn predict(&self, prompt: &str, params: &DecodingParams) -> Result<String, ServiceError>;
}

/// Analytical table accepting JSON rows.
#[async_trait]
pub trait TableSink: Send + Sync {
    /// Insert one row. `Ok` carries row-level errors (empty on success);
    /// `Err` is reserved for transport failures.
    async fn insert_row(
        &self,
        table: &TableRef,
        row: Map<String, Value>,
    ) -> Result<Vec<InsertError>, ServiceError>;
}

/// The four collaborators a [`crate::PipelineOrchestrator`] needs.
#[derive(Clone)]
pub struct Services {
    pub storage: Arc<dyn ObjectStore>,
    pub ocr: Arc<dyn OcrService>,
    pub generator: Arc<dyn TextGenerator>,
    pub table: Arc<dyn TableSink>,
}

impl Services {
    /// Google Cloud clients for every collaborator, configured from
    /// `config` (project, location, model, timeouts, retries).
    pub fn google(config: &PipelineConfig, access_token: Option<String>) -> Result<Self, PipelineError> {
        let generator = vertex::VertexTextGenerator::new(
            &config.project_id,
            &config.location,
            &config.model_name,
            access_token.clone(),
        )?
        .with_timeout(Duration::from_secs(config.api_timeout_secs))?
        .with_retries(config.max_retries, config.retry_backoff_ms);

        Self::google_with_generator(access_token, Arc::new(generator))
    }

    /// Google Cloud storage, OCR and table clients around a caller-chosen
    /// summarisation backend (e.g. [`provider::ProviderTextGenerator`]).
    pub fn google_with_generator(
        access_token: Option<String>,
        generator: Arc<dyn TextGenerator>,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            storage: Arc::new(gcs::GcsObjectStore::new(access_token.clone())?),
            ocr: Arc::new(vision::VisionOcrService::new(access_token.clone())?),
            generator,
            table: Arc::new(bigquery::BigQueryTableSink::new(access_token)?),
        })
    }
}

/// Shared `reqwest` client construction for the REST collaborators.
pub(crate) fn http_client(
    service: &'static str,
    timeout: Option<Duration>,
) -> Result<reqwest::Client, PipelineError> {
    let mut builder = reqwest::Client::builder().user_agent(concat!(
        "edgequake-docsum/",
        env!("CARGO_PKG_VERSION")
    ));
    if let Some(t) = timeout {
        builder = builder.timeout(t);
    }
    builder
        .build()
        .map_err(|e| PipelineError::Internal(format!("failed to build {service} HTTP client: {e}")))
}

/// Parse a client base URL (production endpoint, emulator or mock server).
pub(crate) fn parse_base_url(base_url: &str) -> Result<Url, PipelineError> {
    let url = Url::parse(base_url)
        .map_err(|e| PipelineError::InvalidConfig(format!("invalid base URL '{base_url}': {e}")))?;
    if url.cannot_be_a_base() {
        return Err(PipelineError::InvalidConfig(format!(
            "base URL '{base_url}' cannot carry a path"
        )));
    }
    Ok(url)
}

/// Append percent-encoded path segments to `base`.
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// Attach the bearer token, if any.
pub(crate) fn authorize(req: reqwest::RequestBuilder, token: Option<&str>) -> reqwest::RequestBuilder {
    match token {
        Some(t) => req.bearer_auth(t),
        None => req,
    }
}

/// Turn a response into its body, mapping non-2xx statuses to
/// [`ServiceError::Http`] and 404 to [`ServiceError::NotFound`].
pub(crate) async fn check_status(
    service: &'static str,
    what: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ServiceError::NotFound(what.to_string()));
    }
    let body = response.text().await.unwrap_or_default();
    Err(ServiceError::Http {
        service,
        status: status.as_u16(),
        body,
    })
}

pub(crate) fn transport(service: &'static str, e: reqwest::Error) -> ServiceError {
    ServiceError::Transport {
        service,
        detail: e.to_string(),
    }
}

pub(crate) fn invalid_response(service: &'static str, detail: impl fmt::Display) -> ServiceError {
    ServiceError::InvalidResponse {
        service,
        detail: detail.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_uri_round_trips_through_display() {
        let uri: ObjectUri = "gs://out/ocr/paper/".parse().unwrap();
        assert_eq!(uri.bucket, "out");
        assert_eq!(uri.key, "ocr/paper/");
        assert_eq!(uri.to_string(), "gs://out/ocr/paper/");
    }

    #[test]
    fn object_uri_rejects_other_schemes() {
        for bad in ["s3://b/k", "gs://", "gs://bucket", "/tmp/file"] {
            assert!(bad.parse::<ObjectUri>().is_err(), "{bad} should fail");
        }
    }

    #[test]
    fn endpoint_encodes_each_segment() {
        let base = parse_base_url("http://127.0.0.1:9000/").unwrap();
        let url = endpoint(&base, &["storage", "v1", "b", "out", "o", "ocr/paper/output-1-to-2.json"]);
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:9000/storage/v1/b/out/o/ocr%2Fpaper%2Foutput-1-to-2.json"
        );
    }

    #[test]
    fn bucket_root_uri_has_empty_key() {
        let uri: ObjectUri = "gs://bucket/".parse().unwrap();
        assert_eq!(uri.key, "");
    }
}
