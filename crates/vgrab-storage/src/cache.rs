//! Local result cache.
//!
//! One JSON document per content key, written once after a successful run
//! and never expired. Lookups are purely local.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};
use vgrab_models::{CacheEntry, ContentKey};

use crate::error::{StorageError, StorageResult};

/// Cache seam used by the pipeline.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Entry for `key`, if one was stored.
    async fn lookup(&self, key: &ContentKey) -> StorageResult<Option<CacheEntry>>;

    /// Persist `entry` under its own key. Storing the same entry twice
    /// leaves the same state; the last writer wins.
    async fn store(&self, entry: &CacheEntry) -> StorageResult<()>;

    /// Delete the entry for `key`; returns whether one existed.
    async fn remove(&self, key: &ContentKey) -> StorageResult<bool>;
}

/// [`CacheStore`] keeping `{dir}/{key}.json` documents.
#[derive(Debug, Clone)]
pub struct FsCacheStore {
    dir: PathBuf,
}

impl FsCacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Document path for a key.
    pub fn entry_path(&self, key: &ContentKey) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

#[async_trait]
impl CacheStore for FsCacheStore {
    async fn lookup(&self, key: &ContentKey) -> StorageResult<Option<CacheEntry>> {
        let path = self.entry_path(key);

        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::cache(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        match serde_json::from_slice::<CacheEntry>(&data) {
            Ok(entry) if entry.key == *key => Ok(Some(entry)),
            Ok(entry) => {
                warn!(
                    key = %key,
                    stored_key = %entry.key,
                    "Cache entry key mismatch, treating as miss"
                );
                Ok(None)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Corrupt cache entry, treating as miss");
                Ok(None)
            }
        }
    }

    async fn store(&self, entry: &CacheEntry) -> StorageResult<()> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            StorageError::cache(format!("Failed to create {}: {}", self.dir.display(), e))
        })?;

        let path = self.entry_path(&entry.key);
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", entry.key, uuid::Uuid::new_v4().simple()));
        let data = serde_json::to_vec_pretty(entry)?;

        // Write then rename so readers never observe a partial document
        if let Err(e) = tokio::fs::write(&tmp, &data).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::cache(format!(
                "Failed to write {}: {}",
                tmp.display(),
                e
            )));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::cache(format!(
                "Failed to persist {}: {}",
                path.display(),
                e
            )));
        }

        debug!(key = %entry.key, path = %path.display(), "Cache entry stored");
        Ok(())
    }

    async fn remove(&self, key: &ContentKey) -> StorageResult<bool> {
        match tokio::fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::cache(format!(
                "Failed to remove cache entry {}: {}",
                key, e
            ))),
        }
    }
}
