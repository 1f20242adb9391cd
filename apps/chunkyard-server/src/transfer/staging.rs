//! Staging area
//!
//! Every upload gets its own directory `<staging>/<staging_id>/` holding an
//! `upload.json` manifest and the chunk files. The staging id is always
//! generated server side; the client's upload id only names the progress
//! topic. Nothing in the public namespace is touched until the upload has
//! been fully written.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use super::TransferError;
use crate::config::TransferMode;
use crate::storage::LocalStore;

/// Manifest file written into each staging directory
pub const MANIFEST_FILE: &str = "upload.json";

/// Metadata for an upload in flight
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadManifest {
    /// Names the staging directory
    pub staging_id: Uuid,
    /// Progress topic, possibly chosen by the client
    pub upload_id: Uuid,
    /// Original file name, kept as metadata only
    pub file_name: String,
    pub total_size: u64,
    pub chunk_size: usize,
    pub total_chunks: u64,
    pub mode: TransferMode,
    pub created_at: DateTime<Utc>,
}

/// Root of all per-upload staging directories
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
    store: LocalStore,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>, store: LocalStore) -> Self {
        Self {
            root: root.into(),
            store,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir_for(&self, staging_id: Uuid) -> PathBuf {
        self.root.join(staging_id.to_string())
    }

    /// Create the staging directory for `manifest` and record the manifest
    pub async fn open(&self, manifest: &UploadManifest) -> Result<PathBuf, TransferError> {
        let dir = self.dir_for(manifest.staging_id);
        self.store.create_dir_all(&dir).await?;

        let json = serde_json::to_vec_pretty(manifest)?;
        self.store.write_atomic(&dir.join(MANIFEST_FILE), &json).await?;

        Ok(dir)
    }

    /// Create an empty private directory under the staging root
    pub async fn reserve(&self) -> Result<PathBuf, TransferError> {
        let dir = self.dir_for(Uuid::new_v4());
        self.store.create_dir_all(&dir).await?;
        Ok(dir)
    }

    pub async fn read_manifest(&self, staging_id: Uuid) -> Result<UploadManifest, TransferError> {
        let path = self.dir_for(staging_id).join(MANIFEST_FILE);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| TransferError::io("read", &path, e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Remove the staging directory of `staging_id`
    pub async fn discard(&self, staging_id: Uuid) -> Result<(), TransferError> {
        self.store.remove_dir_all(&self.dir_for(staging_id)).await?;
        Ok(())
    }
}

/// Serializes publishing per public file name
#[derive(Clone, Default)]
pub struct PublishLocks {
    inner: Arc<parking_lot::Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

/// Held while a file name is being published
pub struct PublishGuard {
    guard: Option<OwnedMutexGuard<()>>,
    name: String,
    locks: PublishLocks,
}

impl PublishLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, name: &str) -> PublishGuard {
        let mutex = {
            let mut map = self.inner.lock();
            map.entry(name.to_string()).or_default().clone()
        };

        PublishGuard {
            guard: Some(mutex.lock_owned().await),
            name: name.to_string(),
            locks: self.clone(),
        }
    }

    /// Number of names with a live lock entry
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for PublishGuard {
    fn drop(&mut self) {
        self.guard.take();

        let mut map = self.locks.inner.lock();
        if let Some(mutex) = map.get(&self.name) {
            if Arc::strong_count(mutex) == 1 {
                map.remove(&self.name);
            }
        }
    }
}
