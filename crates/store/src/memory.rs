use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{Store, StoreError};

/// An in-memory [`Store`], used by the core's tests so the end-to-end scenarios run
/// without touching a real filesystem. Append semantics (newline-joined records) match
/// [`crate::FsStore`] exactly, so tests can assert on the same encoded bytes.
#[derive(Default)]
pub struct MemStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Self {
        MemStore::default()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn append(&self, key: &str, record: &[u8]) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(key.to_string()).or_default();
        entry.extend_from_slice(record);
        entry.push(b'\n');
        Ok(())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn get_keys(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        let needle = format!("{prefix}_");
        Ok(self
            .entries
            .lock()
            .await
            .keys()
            .filter_map(|key| {
                key.strip_prefix(&needle)
                    .map(|secondary| (key.clone(), secondary.to_string()))
            })
            .collect())
    }

    async fn delete_keys(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}
