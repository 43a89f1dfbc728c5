//! Persistence stage: write one summary row to the analytical table.
//!
//! Validation problems and row-level rejections come back as
//! [`InsertError`] values, never as `Err`. Only a table that cannot be
//! reached at all yields [`PipelineError::Persistence`].

use crate::config::TableRef;
use crate::error::{InsertError, InsertErrorKind, PipelineError};
use crate::services::TableSink;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error};

/// The row written for one summarised document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub bucket: String,
    pub filename: String,
    pub extracted_text: String,
    pub summary: String,
    pub complete_text_uri: String,
    pub summary_uri: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl SummaryRecord {
    /// True when every content field is empty and there is no timestamp.
    pub fn is_empty(&self) -> bool {
        self.bucket.is_empty()
            && self.filename.is_empty()
            && self.extracted_text.is_empty()
            && self.summary.is_empty()
            && self.complete_text_uri.is_empty()
            && self.summary_uri.is_empty()
            && self.timestamp.is_none()
    }

    /// Column map for the table. `timestamp` is ISO-8601 UTC, or `null`.
    pub fn to_row(&self) -> Map<String, Value> {
        let mut row = Map::new();
        row.insert("bucket".into(), Value::from(self.bucket.as_str()));
        row.insert("filename".into(), Value::from(self.filename.as_str()));
        row.insert("extracted_text".into(), Value::from(self.extracted_text.as_str()));
        row.insert("summary".into(), Value::from(self.summary.as_str()));
        row.insert("complete_text_uri".into(), Value::from(self.complete_text_uri.as_str()));
        row.insert("summary_uri".into(), Value::from(self.summary_uri.as_str()));
        row.insert(
            "timestamp".into(),
            self.timestamp
                .map(|t| Value::from(t.to_rfc3339_opts(SecondsFormat::Micros, true)))
                .unwrap_or(Value::Null),
        );
        row
    }
}

pub struct PersistenceStage {
    sink: Arc<dyn TableSink>,
    table: TableRef,
}

impl PersistenceStage {
    pub fn new(sink: Arc<dyn TableSink>, table: TableRef) -> Self {
        Self { sink, table }
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    /// Insert `record` as exactly one row.
    ///
    /// * incomplete table identifiers → one `MissingIdentifier` error, no call
    /// * empty record → one `EmptyRecord` error, no call
    /// * otherwise → the table's row errors verbatim (empty on success)
    pub async fn persist(&self, record: &SummaryRecord) -> Result<Vec<InsertError>, PipelineError> {
        if self.table.is_incomplete() {
            return Ok(vec![InsertError::new(
                InsertErrorKind::MissingIdentifier,
                "project_id, dataset_id, or table_id is missing",
            )]);
        }
        if record.is_empty() {
            return Ok(vec![InsertError::new(
                InsertErrorKind::EmptyRecord,
                "no row data provided for updating table",
            )]);
        }

        let errors = self
            .sink
            .insert_row(&self.table, record.to_row())
            .await
            .map_err(|source| PipelineError::Persistence {
                table: self.table.to_string(),
                source,
            })?;

        if errors.is_empty() {
            debug!("Wrote 1 row to {}", self.table);
        } else {
            for e in &errors {
                error!(table = %self.table, "Row insert error: {}", e);
            }
        }
        Ok(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        calls: AtomicUsize,
        reply: Vec<InsertError>,
    }

    impl CountingSink {
        fn replying(reply: Vec<InsertError>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                reply,
            })
        }
    }

    #[async_trait]
    impl TableSink for CountingSink {
        async fn insert_row(
            &self,
            _table: &TableRef,
            _row: Map<String, Value>,
        ) -> Result<Vec<InsertError>, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone())
        }
    }

    fn record() -> SummaryRecord {
        SummaryRecord {
            bucket: "in".into(),
            filename: "paper.pdf".into(),
            extracted_text: "text".into(),
            summary: "short".into(),
            complete_text_uri: "gs://out/paper/complete_text.txt".into(),
            summary_uri: "gs://out/paper/summary.txt".into(),
            timestamp: Some(Utc.with_ymd_and_hms(2023, 5, 8, 19, 28, 55).unwrap()),
        }
    }

    #[tokio::test]
    async fn any_missing_identifier_yields_one_error_and_no_call() {
        for table in [
            TableRef::new("", "d", "t"),
            TableRef::new("p", "", "t"),
            TableRef::new("p", "d", ""),
        ] {
            let sink = CountingSink::replying(vec![]);
            let errors = PersistenceStage::new(sink.clone(), table)
                .persist(&record())
                .await
                .unwrap();
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].kind, InsertErrorKind::MissingIdentifier);
            assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test]
    async fn empty_record_yields_one_error_and_no_call() {
        let sink = CountingSink::replying(vec![]);
        let errors = PersistenceStage::new(sink.clone(), TableRef::new("p", "d", "t"))
            .persist(&SummaryRecord::default())
            .await
            .unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, InsertErrorKind::EmptyRecord);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn timestamp_alone_makes_a_record_non_empty() {
        let sink = CountingSink::replying(vec![]);
        let only_time = SummaryRecord {
            timestamp: record().timestamp,
            ..Default::default()
        };
        let errors = PersistenceStage::new(sink.clone(), TableRef::new("p", "d", "t"))
            .persist(&only_time)
            .await
            .unwrap();
        assert!(errors.is_empty());
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn successful_insert_returns_empty_list() {
        let sink = CountingSink::replying(vec![]);
        let errors = PersistenceStage::new(sink.clone(), TableRef::new("p", "d", "t"))
            .persist(&record())
            .await
            .unwrap();
        assert!(errors.is_empty());
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn row_errors_are_returned_verbatim() {
        let rejected = InsertError::new(InsertErrorKind::InvalidRow, "no such field").with_location("summary");
        let sink = CountingSink::replying(vec![rejected.clone()]);
        let errors = PersistenceStage::new(sink, TableRef::new("p", "d", "t"))
            .persist(&record())
            .await
            .unwrap();
        assert_eq!(errors, vec![rejected]);
    }

    #[test]
    fn row_has_every_column_and_iso_timestamp() {
        let row = record().to_row();
        assert_eq!(row.len(), 7);
        assert_eq!(row["timestamp"], "2023-05-08T19:28:55.000000Z");
        assert_eq!(row["summary_uri"], "gs://out/paper/summary.txt");
        assert_eq!(SummaryRecord::default().to_row()["timestamp"], Value::Null);
    }
}
