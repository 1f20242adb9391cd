//! Store catalog
//!
//! Read-only view over the public storage directory.

use std::path::PathBuf;

use super::merger::{ChunkSet, Merger};
use super::naming::split_filename;
use super::{validate_file_name, TransferError};
use crate::config::TransferMode;
use crate::storage::LocalStore;

/// What a requested file name refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// A finished single file
    File { path: PathBuf, len: u64 },
    /// A published chunk set
    Chunks(ChunkSet),
}

#[derive(Debug, Clone)]
pub struct StoreCatalog {
    dir: PathBuf,
    staging_dir_name: String,
    mode: TransferMode,
    store: LocalStore,
    merger: Merger,
}

impl StoreCatalog {
    pub fn new(
        dir: impl Into<PathBuf>,
        staging_dir_name: impl Into<String>,
        mode: TransferMode,
        store: LocalStore,
    ) -> Self {
        Self {
            dir: dir.into(),
            staging_dir_name: staging_dir_name.into(),
            mode,
            merger: Merger::new(store.clone()),
            store,
        }
    }

    /// Entry names in the storage directory, finished files and chunk files
    /// alike. The staging directory is not an entry.
    pub async fn list(&self) -> Result<Vec<String>, TransferError> {
        let mut names: Vec<String> = self
            .store
            .list_names(&self.dir)
            .await?
            .into_iter()
            .filter(|name| *name != self.staging_dir_name)
            .collect();

        names.sort();
        Ok(names)
    }

    /// Resolve `file_name` to a finished file or a chunk set.
    ///
    /// Merged mode looks for the file first, chunked mode for the chunks;
    /// each falls back to the other.
    pub async fn resolve(&self, file_name: &str) -> Result<Resolved, TransferError> {
        validate_file_name(file_name, &self.staging_dir_name)
            .map_err(|_| TransferError::NotFound(file_name.to_string()))?;

        let resolved = match self.mode {
            TransferMode::Merged => match self.find_file(file_name).await? {
                Some(file) => Some(file),
                None => self.find_chunks(file_name).await?,
            },
            TransferMode::Chunked => match self.find_chunks(file_name).await? {
                Some(chunks) => Some(chunks),
                None => self.find_file(file_name).await?,
            },
        };

        resolved.ok_or_else(|| TransferError::NotFound(file_name.to_string()))
    }

    async fn find_file(&self, file_name: &str) -> Result<Option<Resolved>, TransferError> {
        let path = self.dir.join(file_name);
        Ok(self
            .store
            .file_len(&path)
            .await?
            .map(|len| Resolved::File { path, len }))
    }

    async fn find_chunks(&self, file_name: &str) -> Result<Option<Resolved>, TransferError> {
        let (base_name, extension) = split_filename(file_name);
        let set = self.merger.collect(&self.dir, base_name, extension).await?;
        Ok((!set.is_empty()).then_some(Resolved::Chunks(set)))
    }
}
