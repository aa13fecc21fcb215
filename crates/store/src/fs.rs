use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::{Store, StoreError};

/// A filesystem-backed [`Store`]: one file per key in `directory`. Overwrites go
/// through a `<key>.tmp-<uuid>` sibling file followed by a rename, so a reader never
/// observes a partially written snapshot. Appends open the file in append mode and
/// `sync_data` before returning, so a crash right after `append` resolves can never
/// lose the record.
///
/// `directory` must not be shared between workers: two shards writing into the same
/// directory would corrupt each other's `BOOKS`/`EOFS` keys.
pub struct FsStore {
    directory: PathBuf,
}

impl FsStore {
    /// Opens (creating if necessary) a store rooted at `directory`.
    pub async fn open(directory: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let directory = directory.into();
        tokio::fs::create_dir_all(&directory)
            .await
            .map_err(|source| io_err(&directory, source))?;
        Ok(FsStore { directory })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.directory.join(key)
    }
}

fn io_err(key: impl std::fmt::Display, source: std::io::Error) -> StoreError {
    StoreError::Io {
        key: key.to_string(),
        source,
    }
}

#[async_trait]
impl Store for FsStore {
    async fn append(&self, key: &str, record: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| io_err(key, source))?;
        file.write_all(record)
            .await
            .map_err(|source| io_err(key, source))?;
        file.write_all(b"\n")
            .await
            .map_err(|source| io_err(key, source))?;
        file.sync_data().await.map_err(|source| io_err(key, source))?;
        Ok(())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let tmp_path = self
            .directory
            .join(format!("{key}.tmp-{}", uuid::Uuid::new_v4()));

        let mut tmp = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|source| io_err(key, source))?;
        tmp.write_all(value)
            .await
            .map_err(|source| io_err(key, source))?;
        tmp.sync_all().await.map_err(|source| io_err(key, source))?;
        drop(tmp);

        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|source| io_err(key, source))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(io_err(key, source)),
        }
    }

    async fn get_keys(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        let needle = format!("{prefix}_");
        let mut entries = tokio::fs::read_dir(&self.directory)
            .await
            .map_err(|source| io_err(&self.directory.display(), source))?;

        let mut found = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| io_err(&self.directory.display(), source))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.ends_with(".tmp") || name.contains(".tmp-") {
                continue;
            }
            if let Some(secondary) = name.strip_prefix(&needle) {
                found.push((name.to_string(), secondary.to_string()));
            }
        }
        Ok(found)
    }

    async fn delete_keys(&self, key: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(io_err(key, source)),
        }
    }
}
