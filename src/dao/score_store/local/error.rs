//! Error types shared by the file-backed local store.

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::dao::storage::StorageError;

/// Convenient result alias returning [`LocalStoreError`] failures.
pub type LocalResult<T> = Result<T, LocalStoreError>;

/// Failures that can occur while reading or writing the local score document.
#[derive(Debug, Error)]
pub enum LocalStoreError {
    /// The score document exists but could not be read.
    #[error("failed to read local score document `{}`", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The score document could not be written or swapped into place.
    #[error("failed to write local score document `{}`", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The score document is not valid JSON for the expected layout.
    #[error("failed to decode local score document `{}`", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// Serialising the in-memory document failed.
    #[error("failed to encode local score document")]
    Encode {
        #[source]
        source: serde_json::Error,
    },
    /// The directory holding the score document is missing.
    #[error("local score directory `{}` is not accessible", path.display())]
    DirectoryUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl From<LocalStoreError> for StorageError {
    fn from(err: LocalStoreError) -> Self {
        StorageError::unavailable(err.to_string(), err)
    }
}
