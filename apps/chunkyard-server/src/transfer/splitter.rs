//! Splitter
//!
//! Cuts an uploaded buffer into fixed-size chunks and writes them one at a
//! time. Each write is awaited before the next starts, so after a crash the
//! chunks on disk are always a prefix `1..=n` of the plan.

use std::ops::Range;
use std::path::Path;

use uuid::Uuid;

use super::naming::ChunkKey;
use super::TransferError;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::storage::LocalStore;

/// Byte ranges of the chunks for a buffer of `len` bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    len: usize,
    chunk_size: usize,
}

impl ChunkPlan {
    pub fn new(len: usize, chunk_size: usize) -> Result<Self, TransferError> {
        if chunk_size == 0 {
            return Err(TransferError::ZeroChunkSize);
        }
        Ok(Self { len, chunk_size })
    }

    /// `ceil(len / chunk_size)`
    pub fn total_chunks(&self) -> u64 {
        self.len.div_ceil(self.chunk_size) as u64
    }

    /// `(index, range)` pairs with 1-based indices
    pub fn ranges(&self) -> impl Iterator<Item = (u64, Range<usize>)> + '_ {
        (0..self.len)
            .step_by(self.chunk_size)
            .enumerate()
            .map(|(i, start)| {
                let end = (start + self.chunk_size).min(self.len);
                (i as u64 + 1, start..end)
            })
    }
}

/// Writes chunk files for one upload
#[derive(Debug, Clone)]
pub struct Splitter {
    store: LocalStore,
    chunk_size: usize,
}

impl Splitter {
    pub fn new(store: LocalStore, chunk_size: usize) -> Self {
        Self { store, chunk_size }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Write `data` into `dir` as chunks of `(base_name, extension)`.
    ///
    /// Emits one progress event per chunk written. On failure the chunks
    /// already written are left in place.
    pub async fn split(
        &self,
        upload_id: Uuid,
        data: &[u8],
        dir: &Path,
        base_name: &str,
        extension: &str,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<ChunkKey>, TransferError> {
        let plan = ChunkPlan::new(data.len(), self.chunk_size)?;
        let total = plan.total_chunks();
        let mut written = Vec::with_capacity(total as usize);

        for (index, range) in plan.ranges() {
            let key = ChunkKey::new(base_name, extension, index);
            let path = dir.join(key.to_string());
            let len = range.len();

            self.store.write_atomic(&path, &data[range]).await?;

            tracing::debug!(
                upload_id = %upload_id,
                chunk = %key,
                index,
                total,
                bytes = len,
                "Chunk written"
            );

            written.push(key);
            sink.publish(ProgressEvent::new(upload_id, index, total));
        }

        Ok(written)
    }
}
