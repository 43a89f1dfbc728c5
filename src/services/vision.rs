//! Cloud Vision `files:asyncBatchAnnotate` client.
//!
//! Submission returns a long-running operation name; [`OcrService::poll`]
//! reads `GET /v1/{name}` and maps `done` / `error` onto
//! [`OperationStatus`]. The JSON shards themselves are written by Vision to
//! Cloud Storage and read back through an [`super::ObjectStore`].

use super::{
    authorize, check_status, endpoint, http_client, invalid_response, parse_base_url, transport,
    OcrRequest, OcrService, OperationStatus,
};
use crate::error::{PipelineError, ServiceError};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

const SERVICE: &str = "cloud-vision";
const DEFAULT_BASE_URL: &str = "https://vision.googleapis.com";

pub struct VisionOcrService {
    http: Client,
    base_url: Url,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Operation {
    name: Option<String>,
    #[serde(default)]
    done: bool,
    error: Option<OperationError>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

impl VisionOcrService {
    pub fn new(token: Option<String>) -> Result<Self, PipelineError> {
        Ok(Self {
            http: http_client(SERVICE, None)?,
            base_url: parse_base_url(DEFAULT_BASE_URL)?,
            token,
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, PipelineError> {
        self.base_url = parse_base_url(base_url)?;
        Ok(self)
    }
}

/// The `AsyncBatchAnnotateFilesRequest` body for one document.
fn request_body(request: &OcrRequest) -> Value {
    json!({
        "requests": [{
            "features": [{ "type": "DOCUMENT_TEXT_DETECTION" }],
            "inputConfig": {
                "gcsSource": { "uri": request.source_uri },
                "mimeType": request.mime_type,
            },
            "outputConfig": {
                "gcsDestination": { "uri": request.output_uri_prefix },
                "batchSize": request.batch_size,
            },
        }]
    })
}

#[async_trait]
impl OcrService for VisionOcrService {
    async fn submit(&self, request: &OcrRequest) -> Result<String, ServiceError> {
        let url = endpoint(&self.base_url, &["v1", "files:asyncBatchAnnotate"]);
        debug!(
            "Submitting OCR for {} → {}",
            request.source_uri, request.output_uri_prefix
        );

        let response = authorize(self.http.post(url), self.token.as_deref())
            .json(&request_body(request))
            .send()
            .await
            .map_err(|e| transport(SERVICE, e))?;
        let operation: Operation = check_status(SERVICE, &request.source_uri, response)
            .await?
            .json()
            .await
            .map_err(|e| invalid_response(SERVICE, e))?;

        operation
            .name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| invalid_response(SERVICE, "operation has no name"))
    }

    async fn poll(&self, operation: &str) -> Result<OperationStatus, ServiceError> {
        let mut segments = vec!["v1"];
        segments.extend(operation.split('/').filter(|s| !s.is_empty()));
        let url = endpoint(&self.base_url, &segments);

        let response = authorize(self.http.get(url), self.token.as_deref())
            .send()
            .await
            .map_err(|e| transport(SERVICE, e))?;
        let op: Operation = check_status(SERVICE, operation, response)
            .await?
            .json()
            .await
            .map_err(|e| invalid_response(SERVICE, e))?;

        Ok(match (op.done, op.error) {
            (_, Some(err)) => OperationStatus::Failed(format!("code {}: {}", err.code, err.message)),
            (true, None) => OperationStatus::Done,
            (false, None) => OperationStatus::Running,
        })
    }
}
