//! Cloud Storage JSON API client.

use super::{
    authorize, check_status, endpoint, http_client, invalid_response, parse_base_url, transport,
    ObjectStore,
};
use crate::error::{PipelineError, ServiceError};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::debug;

const SERVICE: &str = "cloud-storage";
const DEFAULT_BASE_URL: &str = "https://storage.googleapis.com";

/// [`ObjectStore`] backed by the Cloud Storage JSON API.
pub struct GcsObjectStore {
    http: Client,
    base_url: Url,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    items: Vec<ListItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListItem {
    name: String,
}

impl GcsObjectStore {
    pub fn new(token: Option<String>) -> Result<Self, PipelineError> {
        Ok(Self {
            http: http_client(SERVICE, None)?,
            base_url: parse_base_url(DEFAULT_BASE_URL)?,
            token,
        })
    }

    /// Point the client at an emulator or mock server.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, PipelineError> {
        self.base_url = parse_base_url(base_url)?;
        Ok(self)
    }

    fn url(&self, segments: &[&str]) -> Url {
        endpoint(&self.base_url, segments)
    }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    async fn upload(&self, bucket: &str, key: &str, content: &str) -> Result<(), ServiceError> {
        let mut url = self.url(&["upload", "storage", "v1", "b", bucket, "o"]);
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", key);

        debug!("Uploading {} bytes to gs://{}/{}", content.len(), bucket, key);
        let response = authorize(self.http.post(url), self.token.as_deref())
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(content.to_string())
            .send()
            .await
            .map_err(|e| transport(SERVICE, e))?;

        check_status(SERVICE, &format!("gs://{bucket}/{key}"), response).await?;
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, ServiceError> {
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = self.url(&["storage", "v1", "b", bucket, "o"]);
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("prefix", prefix);
                if let Some(ref token) = page_token {
                    query.append_pair("pageToken", token);
                }
            }

            let response = authorize(self.http.get(url), self.token.as_deref())
                .send()
                .await
                .map_err(|e| transport(SERVICE, e))?;
            let page: ListResponse = check_status(SERVICE, &format!("gs://{bucket}/{prefix}"), response)
                .await?
                .json()
                .await
                .map_err(|e| invalid_response(SERVICE, e))?;

            names.extend(page.items.into_iter().map(|item| item.name));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!("Listed {} objects under gs://{}/{}", names.len(), bucket, prefix);
        Ok(names)
    }

    async fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ServiceError> {
        let mut url = self.url(&["storage", "v1", "b", bucket, "o", key]);
        url.query_pairs_mut().append_pair("alt", "media");

        let response = authorize(self.http.get(url), self.token.as_deref())
            .send()
            .await
            .map_err(|e| transport(SERVICE, e))?;
        let bytes = check_status(SERVICE, &format!("gs://{bucket}/{key}"), response)
            .await?
            .bytes()
            .await
            .map_err(|e| transport(SERVICE, e))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{
        Method::{GET, POST},
        MockServer,
    };
    use serde_json::json;

    fn store(server: &MockServer) -> GcsObjectStore {
        GcsObjectStore::new(Some("test-token".into()))
            .unwrap()
            .with_base_url(&server.base_url())
            .unwrap()
    }

    #[tokio::test]
    async fn list_returns_names_in_listing_order() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/storage/v1/b/out/o")
                    .query_param("prefix", "ocr/paper/");
                then.status(200).json_body(json!({
                    "kind": "storage#objects",
                    "items": [
                        { "name": "ocr/paper/" },
                        { "name": "ocr/paper/output-1-to-2.json" },
                        { "name": "ocr/paper/output-3-to-4.json" }
                    ]
                }));
            })
            .await;

        let names = store(&server).list("out", "ocr/paper/").await.expect("list");

        mock.assert_async().await;
        assert_eq!(
            names,
            vec![
                "ocr/paper/",
                "ocr/paper/output-1-to-2.json",
                "ocr/paper/output-3-to-4.json"
            ]
        );
    }

    #[tokio::test]
    async fn list_of_empty_prefix_has_no_items_field() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/storage/v1/b/out/o");
                then.status(200).json_body(json!({ "kind": "storage#objects" }));
            })
            .await;

        let names = store(&server).list("out", "nothing/").await.expect("list");
        assert!(names.is_empty());
    }

    #[tokio::test]
    async fn upload_posts_media_with_object_name() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/upload/storage/v1/b/out/o")
                    .query_param("uploadType", "media")
                    .query_param("name", "paper/complete_text.txt")
                    .body("hello world");
                then.status(200).json_body(json!({ "name": "paper/complete_text.txt" }));
            })
            .await;

        store(&server)
            .upload("out", "paper/complete_text.txt", "hello world")
            .await
            .expect("upload");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn download_returns_bytes_and_maps_404() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path_contains("/storage/v1/b/out/o/")
                    .path_contains("present")
                    .query_param("alt", "media");
                then.status(200).body("{\"responses\":[]}");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path_contains("/storage/v1/b/out/o/")
                    .path_contains("missing");
                then.status(404).body("No such object");
            })
            .await;

        let gcs = store(&server);
        let bytes = gcs.download("out", "present.json").await.expect("download");
        assert_eq!(bytes, b"{\"responses\":[]}");

        let err = gcs.download("out", "missing.json").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn server_error_is_http_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/storage/v1/b/out/o");
                then.status(503).body("backend unavailable");
            })
            .await;

        let err = store(&server).list("out", "p/").await.unwrap_err();
        assert!(matches!(err, ServiceError::Http { status: 503, .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn rejects_non_base_url() {
        assert!(GcsObjectStore::new(None).unwrap().with_base_url("mailto:x@y").is_err());
    }
}
