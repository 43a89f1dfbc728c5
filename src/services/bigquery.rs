//! BigQuery streaming insert (`tabledata.insertAll`) client.

use super::{
    authorize, check_status, endpoint, http_client, invalid_response, parse_base_url, transport,
    TableSink,
};
use crate::config::TableRef;
use crate::error::{InsertError, InsertErrorKind, PipelineError, ServiceError};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;
use uuid::Uuid;

const SERVICE: &str = "bigquery";
const DEFAULT_BASE_URL: &str = "https://bigquery.googleapis.com";

pub struct BigQueryTableSink {
    http: Client,
    base_url: Url,
    token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<RowErrors>,
}

#[derive(Debug, Deserialize)]
struct RowErrors {
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    location: String,
    #[serde(default)]
    message: String,
}

impl From<ErrorProto> for InsertError {
    fn from(proto: ErrorProto) -> Self {
        let message = if proto.message.is_empty() {
            proto.reason.clone()
        } else {
            proto.message
        };
        let err = InsertError::new(InsertErrorKind::from_reason(&proto.reason), message);
        if proto.location.is_empty() {
            err
        } else {
            err.with_location(proto.location)
        }
    }
}

impl BigQueryTableSink {
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

/// One-row `insertAll` body. A fresh `insertId` per call gives best-effort
/// dedup of transport-level resends only; separate runs always add rows.
fn request_body(row: Map<String, Value>) -> Value {
    json!({
        "kind": "bigquery#tableDataInsertAllRequest",
        "rows": [{
            "insertId": Uuid::new_v4().to_string(),
            "json": row,
        }]
    })
}

#[async_trait]
impl TableSink for BigQueryTableSink {
    async fn insert_row(
        &self,
        table: &TableRef,
        row: Map<String, Value>,
    ) -> Result<Vec<InsertError>, ServiceError> {
        let url = endpoint(
            &self.base_url,
            &[
                "bigquery",
                "v2",
                "projects",
                &table.project_id,
                "datasets",
                &table.dataset_id,
                "tables",
                &table.table_id,
                "insertAll",
            ],
        );

        debug!("Inserting 1 row into {}", table);
        let response = authorize(self.http.post(url), self.token.as_deref())
            .json(&request_body(row))
            .send()
            .await
            .map_err(|e| transport(SERVICE, e))?;
        let parsed: InsertAllResponse = check_status(SERVICE, &table.to_string(), response)
            .await?
            .json()
            .await
            .map_err(|e| invalid_response(SERVICE, e))?;

        Ok(parsed
            .insert_errors
            .into_iter()
            .flat_map(|row| row.errors)
            .map(InsertError::from)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    const INSERT_PATH: &str = "/bigquery/v2/projects/p/datasets/d/tables/t/insertAll";

    fn sink(server: &MockServer) -> BigQueryTableSink {
        BigQueryTableSink::new(None)
            .unwrap()
            .with_base_url(&server.base_url())
            .unwrap()
    }

    fn row() -> Map<String, Value> {
        let mut row = Map::new();
        row.insert("bucket".into(), json!("in"));
        row.insert("summary".into(), json!("short"));
        row
    }

    #[test]
    fn body_has_one_row_with_insert_id() {
        let body = request_body(row());
        let rows = body["rows"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert!(Uuid::parse_str(rows[0]["insertId"].as_str().unwrap()).is_ok());
        assert_eq!(rows[0]["json"]["summary"], "short");
    }

    #[tokio::test]
    async fn clean_insert_returns_no_errors() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path(INSERT_PATH).body_contains("\"summary\":\"short\"");
                then.status(200)
                    .json_body(json!({ "kind": "bigquery#tableDataInsertAllResponse" }));
            })
            .await;

        let errors = sink(&server)
            .insert_row(&TableRef::new("p", "d", "t"), row())
            .await
            .expect("insert");
        mock.assert_async().await;
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn row_errors_are_returned_as_data() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(INSERT_PATH);
                then.status(200).json_body(json!({
                    "insertErrors": [{
                        "index": 0,
                        "errors": [{
                            "reason": "invalid",
                            "location": "summary",
                            "message": "no such field: summary."
                        }]
                    }]
                }));
            })
            .await;

        let errors = sink(&server)
            .insert_row(&TableRef::new("p", "d", "t"), row())
            .await
            .expect("insert");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, InsertErrorKind::InvalidRow);
        assert_eq!(errors[0].location.as_deref(), Some("summary"));
        assert!(errors[0].message.contains("no such field"));
    }

    #[tokio::test]
    async fn unreachable_table_is_service_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(INSERT_PATH);
                then.status(500).body("internal");
            })
            .await;

        let err = sink(&server)
            .insert_row(&TableRef::new("p", "d", "t"), row())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Http { status: 500, .. }));
    }
}
