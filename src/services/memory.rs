//! In-process [`ObjectStore`] with Cloud Storage listing semantics.
//!
//! Objects are kept in a `BTreeMap`, so `list` returns names in the same
//! lexicographic order Cloud Storage does. Useful for tests and for running
//! the direct-text path without a bucket.

use super::ObjectStore;
use crate::error::ServiceError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

type Objects = BTreeMap<(String, String), Vec<u8>>;

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<Objects>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object directly (e.g. OCR shards in tests).
    pub fn insert(&self, bucket: &str, key: &str, content: impl Into<Vec<u8>>) {
        self.lock()
            .insert((bucket.to_string(), key.to_string()), content.into());
    }

    /// UTF-8 content of an object, if present.
    pub fn get_text(&self, bucket: &str, key: &str) -> Option<String> {
        self.lock()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Objects> {
        self.objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(&self, bucket: &str, key: &str, content: &str) -> Result<(), ServiceError> {
        self.insert(bucket, key, content.as_bytes());
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, ServiceError> {
        Ok(self
            .lock()
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect())
    }

    async fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ServiceError> {
        self.lock()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("gs://{bucket}/{key}")))
    }
}
