//! Storage module for the local filesystem backend
//!
//! All filesystem access used by the transfer pipeline goes through
//! [`LocalStore`], which retries transient I/O failures with backoff.

mod local;
mod retry;

pub use local::LocalStore;
pub use retry::{is_transient, RetryPolicy};

use std::io;
use std::path::PathBuf;

/// Storage-specific errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to {op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        StorageError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// Whether the underlying cause is a missing file or directory
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::Io { source, .. } => source.kind() == io::ErrorKind::NotFound,
        }
    }
}
