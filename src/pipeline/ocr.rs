//! OCR stage: batch-annotate a stored document and gather its text.
//!
//! ## Flow
//!
//! ```text
//! submit ──▶ poll (bounded) ──▶ list shards ──▶ download ×N ──▶ concatenate
//! ```
//!
//! Vision writes one JSON shard per `batch_size` pages under the output
//! prefix. Shards are concatenated in listing order, which for Cloud Storage
//! is lexicographic: `output-1-to-2.json` sorts before `output-3-to-4.json`
//! but `output-11-to-12.json` sorts before `output-3-to-4.json`. Physical page
//! order is therefore only preserved for documents under ten shards.
//!
//! Only direct children of the output prefix named like Vision shards
//! (`output-<first>-to-<last>.json`) are read, so nothing another run wrote
//! beneath or beside the prefix can leak into this document's text.
//!
//! Shards are left in place after extraction.

use crate::error::PipelineError;
use crate::services::{ObjectStore, ObjectUri, OcrRequest, OcrService, OperationStatus};
use futures::stream::{self, StreamExt, TryStreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

static RE_SHARD_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^output-\d+-to-\d+\.json$").unwrap());

/// Submits documents for OCR and reassembles the sharded output.
pub struct OcrStage {
    ocr: Arc<dyn OcrService>,
    storage: Arc<dyn ObjectStore>,
    batch_size: u32,
    poll_interval: Duration,
    shard_concurrency: usize,
}

/// One output shard: `{responses: [{fullTextAnnotation: {text}}]}`.
#[derive(Debug, Deserialize)]
struct Shard {
    responses: Vec<ShardResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShardResponse {
    full_text_annotation: Option<TextAnnotation>,
}

#[derive(Debug, Deserialize)]
struct TextAnnotation {
    text: String,
}

impl OcrStage {
    pub fn new(ocr: Arc<dyn OcrService>, storage: Arc<dyn ObjectStore>) -> Self {
        Self {
            ocr,
            storage,
            batch_size: 2,
            poll_interval: Duration::from_secs(5),
            shard_concurrency: 4,
        }
    }

    pub fn with_batch_size(mut self, pages: u32) -> Self {
        self.batch_size = pages.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_shard_concurrency(mut self, n: usize) -> Self {
        self.shard_concurrency = n.max(1);
        self
    }

    /// Extract the full text of `source_uri`, writing shards under
    /// `output_location` and waiting at most `wait` for the operation.
    ///
    /// Returns the (possibly empty) concatenated text.
    ///
    /// # Errors
    /// * [`PipelineError::OcrFailed`]: submission rejected, poll failed, or
    ///   the operation reported an error
    /// * [`PipelineError::OcrTimeout`]: not done within `wait`
    /// * [`PipelineError::Storage`]: shard listing or download failed
    /// * [`PipelineError::MalformedShard`]: a shard was not the documented
    ///   JSON shape
    pub async fn extract(
        &self,
        source_uri: &str,
        mime_type: &str,
        output_location: &ObjectUri,
        wait: Duration,
    ) -> Result<String, PipelineError> {
        let request = OcrRequest {
            source_uri: source_uri.to_string(),
            mime_type: mime_type.to_string(),
            output_uri_prefix: output_location.to_string(),
            batch_size: self.batch_size,
        };

        let operation = self
            .ocr
            .submit(&request)
            .await
            .map_err(|e| PipelineError::OcrFailed {
                source_uri: source_uri.to_string(),
                detail: e.to_string(),
            })?;
        info!("OCR: waiting for operation {} to finish", operation);

        timeout(wait, self.wait_for(source_uri, &operation))
            .await
            .map_err(|_| PipelineError::OcrTimeout {
                operation: operation.clone(),
                secs: wait.as_secs(),
            })??;

        let shards = self.list_shards(output_location).await?;
        debug!("OCR: {} shards under {}", shards.len(), output_location);

        let bucket = output_location.bucket.as_str();
        let texts: Vec<String> = stream::iter(shards)
            .map(|key| async move {
                let bytes = self
                    .storage
                    .download(bucket, &key)
                    .await
                    .map_err(|source| PipelineError::Storage {
                        operation: "download",
                        uri: format!("gs://{bucket}/{key}"),
                        source,
                    })?;
                shard_text(&key, &bytes)
            })
            .buffered(self.shard_concurrency)
            .try_collect()
            .await?;

        Ok(texts.concat())
    }

    async fn wait_for(&self, source_uri: &str, operation: &str) -> Result<(), PipelineError> {
        loop {
            let status = self
                .ocr
                .poll(operation)
                .await
                .map_err(|e| PipelineError::OcrFailed {
                    source_uri: source_uri.to_string(),
                    detail: e.to_string(),
                })?;
            match status {
                OperationStatus::Done => return Ok(()),
                OperationStatus::Failed(detail) => {
                    return Err(PipelineError::OcrFailed {
                        source_uri: source_uri.to_string(),
                        detail,
                    })
                }
                OperationStatus::Running => sleep(self.poll_interval).await,
            }
        }
    }

    /// Shard objects directly under the output prefix. Directory markers,
    /// nested objects and foreign names are skipped.
    async fn list_shards(&self, location: &ObjectUri) -> Result<Vec<String>, PipelineError> {
        let names = self
            .storage
            .list(&location.bucket, &location.key)
            .await
            .map_err(|source| PipelineError::Storage {
                operation: "list",
                uri: location.to_string(),
                source,
            })?;
        Ok(names
            .into_iter()
            .filter(|n| is_shard_name(&location.key, n))
            .collect())
    }
}

/// `name` is a Vision shard sitting directly under `prefix`.
fn is_shard_name(prefix: &str, name: &str) -> bool {
    name.strip_prefix(prefix)
        .is_some_and(|rest| RE_SHARD_NAME.is_match(rest))
}

/// Text of the first response in one shard.
///
/// A shard that is not JSON, has no responses, or whose first response has
/// no `fullTextAnnotation` is fatal: partial documents are never summarised.
pub fn shard_text(shard: &str, bytes: &[u8]) -> Result<String, PipelineError> {
    let malformed = |detail: String| PipelineError::MalformedShard {
        shard: shard.to_string(),
        detail,
    };

    let parsed: Shard = serde_json::from_slice(bytes).map_err(|e| malformed(e.to_string()))?;
    let first = parsed
        .responses
        .into_iter()
        .next()
        .ok_or_else(|| malformed("no responses".into()))?;
    first
        .full_text_annotation
        .map(|a| a.text)
        .ok_or_else(|| malformed("first response has no fullTextAnnotation".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::services::memory::MemoryObjectStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reports `Running` for `running_polls` polls, then `final_status`.
    struct ScriptedOcr {
        running_polls: usize,
        final_status: OperationStatus,
        polls: AtomicUsize,
    }

    impl ScriptedOcr {
        fn new(running_polls: usize, final_status: OperationStatus) -> Self {
            Self {
                running_polls,
                final_status,
                polls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl OcrService for ScriptedOcr {
        async fn submit(&self, request: &OcrRequest) -> Result<String, ServiceError> {
            assert_eq!(request.batch_size, 2);
            Ok("operations/test".into())
        }

        async fn poll(&self, _operation: &str) -> Result<OperationStatus, ServiceError> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst);
            if n < self.running_polls {
                Ok(OperationStatus::Running)
            } else {
                Ok(self.final_status.clone())
            }
        }
    }

    fn shard(text: &str) -> String {
        serde_json::json!({ "responses": [{ "fullTextAnnotation": { "text": text } }] }).to_string()
    }

    fn location() -> ObjectUri {
        ObjectUri::new("out", "ocr/paper/")
    }

    fn stage(ocr: ScriptedOcr, store: Arc<MemoryObjectStore>) -> OcrStage {
        OcrStage::new(Arc::new(ocr), store).with_poll_interval(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn concatenates_shards_in_listing_order() {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert("out", "ocr/paper/", "");
        store.insert("out", "ocr/paper/output-3-to-4.json", shard("page three. "));
        store.insert("out", "ocr/paper/output-1-to-2.json", shard("page one. "));
        store.insert("out", "ocr/other/output-1-to-2.json", shard("not mine"));

        let text = stage(ScriptedOcr::new(2, OperationStatus::Done), store)
            .extract("gs://in/paper.pdf", "application/pdf", &location(), Duration::from_secs(5))
            .await
            .expect("extract");
        assert_eq!(text, "page one. page three. ");
    }

    #[tokio::test]
    async fn nested_and_foreign_objects_are_not_shards() {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert("out", "ocr/paper/output-1-to-2.json", shard("mine"));
        store.insert("out", "ocr/paper/appendix/output-1-to-2.json", shard("FOREIGN"));
        store.insert("out", "ocr/paper/notes.txt", "not a shard");

        let text = stage(ScriptedOcr::new(0, OperationStatus::Done), store)
            .extract("gs://in/paper.pdf", "application/pdf", &location(), Duration::from_secs(5))
            .await
            .expect("extract");
        assert_eq!(text, "mine");
    }

    #[test]
    fn shard_names_must_be_direct_children() {
        assert!(is_shard_name("ocr/p/", "ocr/p/output-1-to-2.json"));
        assert!(is_shard_name("ocr/p/", "ocr/p/output-11-to-12.json"));
        assert!(!is_shard_name("ocr/p/", "ocr/p/"));
        assert!(!is_shard_name("ocr/p/", "ocr/p/x/output-1-to-2.json"));
        assert!(!is_shard_name("ocr/p/", "ocr/q/output-1-to-2.json"));
        assert!(!is_shard_name("ocr/p/", "ocr/p/output-1-to-2.json.tmp"));
    }

    #[tokio::test]
    async fn no_shards_is_empty_text_not_error() {
        let store = Arc::new(MemoryObjectStore::new());
        let text = stage(ScriptedOcr::new(0, OperationStatus::Done), store)
            .extract("gs://in/blank.pdf", "application/pdf", &location(), Duration::from_secs(5))
            .await
            .expect("extract");
        assert!(text.is_empty());
    }

    #[tokio::test]
    async fn operation_error_is_ocr_failed() {
        let store = Arc::new(MemoryObjectStore::new());
        let err = stage(
            ScriptedOcr::new(1, OperationStatus::Failed("Bad PDF".into())),
            store,
        )
        .extract("gs://in/paper.pdf", "application/pdf", &location(), Duration::from_secs(5))
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::OcrFailed { ref detail, .. } if detail == "Bad PDF"));
    }

    #[tokio::test]
    async fn never_finishing_operation_times_out() {
        let store = Arc::new(MemoryObjectStore::new());
        let err = stage(ScriptedOcr::new(usize::MAX, OperationStatus::Done), store)
            .extract("gs://in/paper.pdf", "application/pdf", &location(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::OcrTimeout { ref operation, .. } if operation == "operations/test"));
    }

    #[tokio::test]
    async fn malformed_shard_is_fatal() {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert("out", "ocr/paper/output-1-to-2.json", shard("ok"));
        store.insert("out", "ocr/paper/output-3-to-4.json", "{\"responses\": [{}]}");

        let err = stage(ScriptedOcr::new(0, OperationStatus::Done), store)
            .extract("gs://in/paper.pdf", "application/pdf", &location(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MalformedShard { ref shard, .. } if shard.ends_with("output-3-to-4.json")));
    }

    #[test]
    fn shard_text_reads_first_response_only() {
        let body = r#"{"responses":[{"fullTextAnnotation":{"text":"first"}},{"fullTextAnnotation":{"text":"second"}}]}"#;
        assert_eq!(shard_text("s", body.as_bytes()).unwrap(), "first");
    }

    #[test]
    fn shard_text_rejects_non_json_and_empty_responses() {
        assert!(shard_text("s", b"not json").is_err());
        assert!(shard_text("s", b"{\"responses\": []}").is_err());
        assert!(shard_text("s", b"{}").is_err());
    }
}
