//! Persistence for the review-filter core: append-only lists plus overwrite snapshots,
//! behind a single [`Store`] trait so the core's recovery and mutation logic can be
//! exercised against an in-memory double in tests and a real filesystem in production.

mod fs;
mod memory;

pub use fs::FsStore;
pub use memory::MemStore;

use async_trait::async_trait;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("io error on key '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// The persistence operations the core depends on. `put` is crash-atomic
/// (write-temp-then-rename); `append` is durable after it returns (flushed and
/// fsynced before the write completes).
#[async_trait]
pub trait Store: Send + Sync {
    /// Appends one record to the list kept under `key`, one record per line.
    async fn append(&self, key: &str, record: &[u8]) -> Result<(), StoreError>;

    /// Atomically overwrites the snapshot kept under `key`.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Returns the snapshot or append-list contents stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Lists every key beginning with `prefix` followed by an underscore, returning
    /// each as `(full_key, secondary_key)` where `secondary_key` is the suffix after
    /// the prefix (e.g. a client id).
    async fn get_keys(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError>;

    /// Removes whatever is stored under `key`, list or snapshot alike. A no-op if the
    /// key doesn't exist.
    async fn delete_keys(&self, key: &str) -> Result<(), StoreError>;
}

/// The stable key prefixes used by the core. Cross-restart compatibility depends on
/// these never changing.
pub const BOOKS_PREFIX: &str = "BOOKS";
pub const EOFS_KEY: &str = "EOFS";
pub const REQUEUE_EOF_KEY: &str = "REQUEUE_EOF";

/// The per-client key under which a client's book list is appended.
pub fn books_key(client_id: u64) -> String {
    format!("{BOOKS_PREFIX}_{client_id}")
}

/// Parses the client id back out of a books key's secondary component.
pub fn parse_client_id(secondary_key: &str) -> Option<u64> {
    secondary_key.parse().ok()
}
