//! Vertex AI text model client (`…/publishers/google/models/{model}:predict`).
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 500 / 503 from the prediction endpoint are transient under
//! load. Retry `n` (1-based) waits `retry_backoff_ms * 2^(n-1)`, capped at
//! one minute: the default 100 ms base and 3 retries wait 100 ms, 200 ms,
//! then 400 ms.
//! Every other status fails immediately. This is transport policy of the
//! client; the summarization stage itself never retries.

use super::{
    authorize, check_status, endpoint, http_client, invalid_response, parse_base_url, transport,
    TextGenerator,
};
use crate::config::DecodingParams;
use crate::error::{PipelineError, ServiceError};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

const SERVICE: &str = "vertex-ai";
const RETRYABLE_STATUSES: [u16; 3] = [429, 500, 503];
const MAX_BACKOFF_MS: u64 = 60_000;

/// [`TextGenerator`] backed by a Vertex AI publisher text model.
pub struct VertexTextGenerator {
    http: Client,
    base_url: Url,
    project_id: String,
    location: String,
    model_name: String,
    token: Option<String>,
    max_retries: u32,
    retry_backoff_ms: u64,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    content: Option<String>,
}

impl VertexTextGenerator {
    /// Client for `model_name` in the regional endpoint of `location`.
    pub fn new(
        project_id: &str,
        location: &str,
        model_name: &str,
        token: Option<String>,
    ) -> Result<Self, PipelineError> {
        if project_id.is_empty() || location.is_empty() || model_name.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "Vertex AI needs a project, a location and a model name".into(),
            ));
        }
        Ok(Self {
            http: http_client(SERVICE, None)?,
            base_url: parse_base_url(&format!("https://{location}-aiplatform.googleapis.com"))?,
            project_id: project_id.to_string(),
            location: location.to_string(),
            model_name: model_name.to_string(),
            token,
            max_retries: 3,
            retry_backoff_ms: 100,
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, PipelineError> {
        self.base_url = parse_base_url(base_url)?;
        Ok(self)
    }

    /// Per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, PipelineError> {
        self.http = http_client(SERVICE, Some(timeout))?;
        Ok(self)
    }

    pub fn with_retries(mut self, max_retries: u32, retry_backoff_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff_ms = retry_backoff_ms;
        self
    }

    fn predict_url(&self) -> Url {
        let model = format!("{}:predict", self.model_name);
        endpoint(
            &self.base_url,
            &[
                "v1",
                "projects",
                &self.project_id,
                "locations",
                &self.location,
                "publishers",
                "google",
                "models",
                &model,
            ],
        )
    }

    async fn predict_once(&self, body: &Value) -> Result<String, ServiceError> {
        let response = authorize(self.http.post(self.predict_url()), self.token.as_deref())
            .json(body)
            .send()
            .await
            .map_err(|e| transport(SERVICE, e))?;
        let parsed: PredictResponse = check_status(SERVICE, &self.model_name, response)
            .await?
            .json()
            .await
            .map_err(|e| invalid_response(SERVICE, e))?;

        parsed
            .predictions
            .into_iter()
            .next()
            .and_then(|p| p.content)
            .ok_or_else(|| invalid_response(SERVICE, "response has no predictions[0].content"))
    }
}

/// The `:predict` body for one prompt.
fn request_body(prompt: &str, params: &DecodingParams) -> Value {
    json!({
        "instances": [{ "content": prompt }],
        "parameters": {
            "temperature": params.temperature,
            "maxOutputTokens": params.max_output_tokens,
            "topP": params.top_p,
            "topK": params.top_k,
        }
    })
}

/// Delay before retry `attempt` (1-based). Saturates instead of overflowing.
fn backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    let factor = 1u64
        .checked_shl(attempt.saturating_sub(1))
        .unwrap_or(u64::MAX);
    base_ms.saturating_mul(factor).min(MAX_BACKOFF_MS)
}

fn is_retryable(err: &ServiceError) -> bool {
    matches!(err, ServiceError::Http { status, .. } if RETRYABLE_STATUSES.contains(status))
}

#[async_trait]
impl TextGenerator for VertexTextGenerator {
    async fn predict(&self, prompt: &str, params: &DecodingParams) -> Result<String, ServiceError> {
        let body = request_body(prompt, params);
        let mut attempt = 0u32;

        loop {
            match self.predict_once(&body).await {
                Ok(text) => {
                    debug!(
                        "Vertex {}: {} chars in, {} chars out",
                        self.model_name,
                        prompt.chars().count(),
                        text.chars().count()
                    );
                    return Ok(text);
                }
                Err(e) if is_retryable(&e) && attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = backoff_ms(self.retry_backoff_ms, attempt);
                    warn!(
                        "Vertex {}: retry {}/{} after {}ms ({})",
                        self.model_name, attempt, self.max_retries, backoff, e
                    );
                    sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    const PREDICT_PATH: &str =
        "/v1/projects/proj/locations/us-central1/publishers/google/models/text-bison@001:predict";

    fn client(server: &MockServer, retries: u32) -> VertexTextGenerator {
        VertexTextGenerator::new("proj", "us-central1", "text-bison@001", Some("t".into()))
            .unwrap()
            .with_base_url(&server.base_url())
            .unwrap()
            .with_retries(retries, 1)
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        assert_eq!(backoff_ms(100, 1), 100);
        assert_eq!(backoff_ms(100, 2), 200);
        assert_eq!(backoff_ms(100, 3), 400);
        assert_eq!(backoff_ms(100, 64), MAX_BACKOFF_MS);
        assert_eq!(backoff_ms(100, 65), MAX_BACKOFF_MS);
        assert_eq!(backoff_ms(100, u32::MAX), MAX_BACKOFF_MS);
        assert_eq!(backoff_ms(0, 70), 0);
    }

    #[test]
    fn body_carries_decoding_params() {
        let body = request_body("Summarize", &DecodingParams::default());
        assert_eq!(body["instances"][0]["content"], "Summarize");
        assert_eq!(body["parameters"]["maxOutputTokens"], 256);
        assert_eq!(body["parameters"]["topK"], 40);
        let temp = body["parameters"]["temperature"].as_f64().unwrap();
        assert!((temp - 0.2).abs() < 1e-6);
    }

    #[test]
    fn regional_endpoint_is_derived_from_location() {
        let vertex = VertexTextGenerator::new("proj", "europe-west4", "text-bison@001", None).unwrap();
        assert_eq!(
            vertex.predict_url().as_str(),
            "https://europe-west4-aiplatform.googleapis.com/v1/projects/proj/locations/europe-west4/publishers/google/models/text-bison@001:predict"
        );
    }

    #[test]
    fn empty_identifiers_are_rejected() {
        assert!(VertexTextGenerator::new("", "us-central1", "m", None).is_err());
    }

    #[tokio::test]
    async fn predict_returns_first_prediction_verbatim() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path(PREDICT_PATH).body_contains("Summarize this");
                then.status(200).json_body(json!({
                    "predictions": [{ "content": "  Two sentences.  " }]
                }));
            })
            .await;

        let text = client(&server, 0)
            .predict("Summarize this", &DecodingParams::default())
            .await
            .expect("predict");
        mock.assert_async().await;
        assert_eq!(text, "  Two sentences.  ");
    }

    #[tokio::test]
    async fn retryable_status_is_retried_up_to_limit() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path(PREDICT_PATH);
                then.status(503).body("unavailable");
            })
            .await;

        let err = client(&server, 2)
            .predict("p", &DecodingParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Http { status: 503, .. }));
        mock.assert_hits_async(3).await;
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path(PREDICT_PATH);
                then.status(400).body("bad request");
            })
            .await;

        let err = client(&server, 3)
            .predict("p", &DecodingParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Http { status: 400, .. }));
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn empty_predictions_is_invalid_response() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(PREDICT_PATH);
                then.status(200).json_body(json!({ "predictions": [] }));
            })
            .await;

        let err = client(&server, 0)
            .predict("p", &DecodingParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidResponse { .. }));
    }
}
