//! Merger
//!
//! Reassembles a chunk set in ascending index order, either into a file
//! (consuming the chunks) or as a byte stream (leaving them in place).

use std::io;
use std::path::{Path, PathBuf};

use axum::body::Bytes;
use futures::stream::{self, Stream, StreamExt};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use super::naming::{self, ChunkKey};
use super::TransferError;
use crate::storage::LocalStore;

/// Chunks of one logical file present in a directory, sorted by index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSet {
    pub dir: PathBuf,
    pub base_name: String,
    pub extension: String,
    indices: Vec<u64>,
}

impl ChunkSet {
    pub fn new(
        dir: impl Into<PathBuf>,
        base_name: impl Into<String>,
        extension: impl Into<String>,
        mut indices: Vec<u64>,
    ) -> Self {
        indices.sort_unstable();
        Self {
            dir: dir.into(),
            base_name: base_name.into(),
            extension: extension.into(),
            indices,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn indices(&self) -> &[u64] {
        &self.indices
    }

    pub fn keys(&self) -> impl Iterator<Item = ChunkKey> + '_ {
        self.indices
            .iter()
            .map(|&i| ChunkKey::new(self.base_name.as_str(), self.extension.as_str(), i))
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.keys().map(|k| self.dir.join(k.to_string())).collect()
    }

    /// First index of `1..=n` that is absent, if any
    pub fn first_gap(&self) -> Option<u64> {
        self.indices
            .iter()
            .copied()
            .zip(1u64..)
            .find(|&(actual, expected)| actual != expected)
            .map(|(_, expected)| expected)
    }
}

/// Outcome of a merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
    pub chunks: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Merger {
    store: LocalStore,
}

impl Merger {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Find the chunks of `(base_name, extension)` in `dir`
    pub async fn collect(
        &self,
        dir: &Path,
        base_name: &str,
        extension: &str,
    ) -> Result<ChunkSet, TransferError> {
        let names = self.store.list_names(dir).await?;
        let indices = names
            .iter()
            .filter_map(|name| naming::parse(name, base_name, extension))
            .collect();

        Ok(ChunkSet::new(dir, base_name, extension, indices))
    }

    /// Concatenate `set` into `dest` without touching the chunks.
    ///
    /// A failure leaves whatever was written to `dest` in place.
    pub async fn concatenate(&self, set: &ChunkSet, dest: &Path) -> Result<u64, TransferError> {
        check_complete(set)?;

        let mut output = self.store.create(dest).await?;
        let mut bytes = 0u64;

        for path in set.paths() {
            let mut chunk = self.store.open(&path).await?;
            bytes += tokio::io::copy(&mut chunk, &mut output)
                .await
                .map_err(|e| TransferError::io("append chunk", &path, e))?;
        }

        output
            .flush()
            .await
            .map_err(|e| TransferError::io("flush", dest, e))?;
        output
            .sync_all()
            .await
            .map_err(|e| TransferError::io("sync", dest, e))?;

        Ok(bytes)
    }

    /// Merge the chunks of `(base_name, extension)` in `dir` into `dest`,
    /// then delete them.
    pub async fn merge(
        &self,
        dir: &Path,
        base_name: &str,
        extension: &str,
        dest: &Path,
    ) -> Result<MergeReport, TransferError> {
        let set = self.collect(dir, base_name, extension).await?;
        if set.is_empty() {
            return Err(TransferError::NotFound(naming::key_for(base_name, extension, 1)));
        }

        let bytes = self.concatenate(&set, dest).await?;
        self.delete(&set).await?;

        tracing::debug!(
            dest = %dest.display(),
            chunks = set.len(),
            bytes,
            "Chunks merged"
        );

        Ok(MergeReport {
            chunks: set.len(),
            bytes,
        })
    }

    pub async fn delete(&self, set: &ChunkSet) -> Result<(), TransferError> {
        for path in set.paths() {
            self.store.remove_file(&path).await?;
        }
        Ok(())
    }

    /// Open every chunk of `set` up front.
    ///
    /// The handles pin the content present at this moment, so renames or
    /// deletions in the directory afterwards do not change what is read.
    pub async fn open_chunks(&self, set: &ChunkSet) -> Result<OpenedChunks, TransferError> {
        check_complete(set)?;

        let mut files = Vec::with_capacity(set.len());
        let mut total_len = 0;
        for path in set.paths() {
            let file = self.store.open(&path).await?;
            let meta = file
                .metadata()
                .await
                .map_err(|e| TransferError::io("stat", &path, e))?;
            total_len += meta.len();
            files.push(file);
        }

        Ok(OpenedChunks { files, total_len })
    }
}

/// Open handles to a complete chunk set, in index order
#[derive(Debug)]
pub struct OpenedChunks {
    files: Vec<fs::File>,
    total_len: u64,
}

impl OpenedChunks {
    pub fn total_len(&self) -> u64 {
        self.total_len
    }

    /// Read the chunks back to back
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        stream::iter(self.files).flat_map(ReaderStream::new)
    }
}

pub(super) fn check_complete(set: &ChunkSet) -> Result<(), TransferError> {
    match set.first_gap() {
        Some(index) => Err(TransferError::MissingChunk {
            file: format!("{}{}", set.base_name, set.extension),
            index,
        }),
        None => Ok(()),
    }
}
