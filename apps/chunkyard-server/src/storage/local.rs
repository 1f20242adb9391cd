//! Local filesystem storage
//!
//! Thin async wrapper over `tokio::fs` that applies the retry policy to
//! every operation and reports failures as [`StorageError`].

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::{RetryPolicy, StorageError};

/// Filesystem access with retry-with-backoff
#[derive(Debug, Clone, Default)]
pub struct LocalStore {
    retry: RetryPolicy,
}

impl LocalStore {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    pub async fn create_dir_all(&self, dir: &Path) -> Result<(), StorageError> {
        self.retry
            .run("create directory", dir, || fs::create_dir_all(dir))
            .await
    }

    /// Write `data` to `path` so that readers never observe a partial file.
    ///
    /// The bytes go to a hidden sibling first, are synced, then renamed
    /// into place.
    pub async fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), StorageError> {
        let tmp = temp_sibling(path);
        let tmp_path = tmp.as_path();

        let written = self
            .retry
            .run("write", tmp_path, move || async move {
                let mut file = fs::File::create(tmp_path).await?;
                file.write_all(data).await?;
                file.sync_all().await
            })
            .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }

        if let Err(e) = self.rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }

        Ok(())
    }

    /// Names of the entries directly inside `dir`
    pub async fn list_names(&self, dir: &Path) -> Result<Vec<String>, StorageError> {
        self.retry
            .run("read directory", dir, move || async move {
                let mut names = Vec::new();
                let mut entries = fs::read_dir(dir).await?;
                while let Some(entry) = entries.next_entry().await? {
                    names.push(entry.file_name().to_string_lossy().into_owned());
                }
                Ok(names)
            })
            .await
    }

    pub async fn rename(&self, from: &Path, to: &Path) -> Result<(), StorageError> {
        self.retry.run("rename", from, || fs::rename(from, to)).await
    }

    pub async fn remove_file(&self, path: &Path) -> Result<(), StorageError> {
        self.retry.run("delete", path, || fs::remove_file(path)).await
    }

    pub async fn remove_dir_all(&self, dir: &Path) -> Result<(), StorageError> {
        self.retry
            .run("delete directory", dir, || fs::remove_dir_all(dir))
            .await
    }

    pub async fn open(&self, path: &Path) -> Result<fs::File, StorageError> {
        self.retry.run("open", path, || fs::File::open(path)).await
    }

    pub async fn create(&self, path: &Path) -> Result<fs::File, StorageError> {
        self.retry.run("create", path, || fs::File::create(path)).await
    }

    /// Size of a regular file, `None` if it does not exist or is not a file
    pub async fn file_len(&self, path: &Path) -> Result<Option<u64>, StorageError> {
        match fs::metadata(path).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io("stat", path, e)),
        }
    }

    /// Last modification time of `path`
    pub async fn modified(&self, path: &Path) -> Result<SystemTime, StorageError> {
        let meta = fs::metadata(path)
            .await
            .map_err(|e| StorageError::io("stat", path, e))?;
        meta.modified().map_err(|e| StorageError::io("stat", path, e))
    }

    pub async fn is_dir(&self, path: &Path) -> bool {
        fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
    }
}

/// Hidden temporary path next to `path`
fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()))
}
