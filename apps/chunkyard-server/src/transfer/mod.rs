//! Chunked transfer pipeline
//!
//! Uploads are split into fixed-size chunk files inside a private staging
//! directory keyed by an opaque upload id, optionally merged back into a
//! single file, and only then published into the shared storage directory.
//!
//! Flow:
//! 1. `Received`: filename and size are validated
//! 2. `Chunking`: the splitter writes `<base>-chunk-<n><ext>` files into staging
//! 3. `Merging` (merged mode): the chunks are concatenated and deleted
//! 4. `Publishing`: the result is renamed into the public namespace
//!
//! Downloads resolve a name to either a finished file or a published chunk
//! set; chunk sets are streamed back to back without an intermediate file.

pub mod catalog;
pub mod coordinator;
pub mod merger;
pub mod naming;
pub mod splitter;
pub mod staging;
pub mod sweep;

pub use catalog::{Resolved, StoreCatalog};
pub use coordinator::{Download, TransferCoordinator, UploadPhase, UploadReceipt, UploadRequest};
pub use merger::{ChunkSet, MergeReport, Merger, OpenedChunks};
pub use naming::{key_for, parse, split_filename, ChunkKey};
pub use splitter::{ChunkPlan, Splitter};
pub use staging::{PublishLocks, StagingArea, UploadManifest};
pub use sweep::SweepReport;

use std::io;
use std::path::Path;

use crate::storage::StorageError;

/// Transfer error types
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("No file uploaded!")]
    NoFile,

    #[error("Invalid file name: {0:?}")]
    InvalidFileName(String),

    #[error("Uploaded file is empty")]
    EmptyFile,

    #[error("File too large: {size} bytes (max: {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Chunk size must be greater than zero")]
    ZeroChunkSize,

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Missing chunk {index} of {file}")]
    MissingChunk { file: String, index: u64 },

    #[error("Invalid upload manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl TransferError {
    pub fn io(op: &'static str, path: &Path, source: io::Error) -> Self {
        TransferError::Storage(StorageError::io(op, path, source))
    }

    /// Errors caused by the request rather than the server
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            TransferError::NoFile
                | TransferError::InvalidFileName(_)
                | TransferError::EmptyFile
                | TransferError::FileTooLarge { .. }
        )
    }
}

/// Check that `name` is a single, plain path component
pub fn validate_file_name(name: &str, reserved: &str) -> Result<(), TransferError> {
    let invalid = name.is_empty()
        || name.len() > 255
        || name == "."
        || name == ".."
        || name == reserved
        || name.contains(['/', '\\', '\0']);

    if invalid {
        return Err(TransferError::InvalidFileName(name.to_string()));
    }
    Ok(())
}
