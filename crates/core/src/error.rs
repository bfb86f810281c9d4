//! Error types for the vault, the metadata store and the checkpoint service.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Result alias for archive engine operations.
pub type ArchiveResult<T> = std::result::Result<T, ArchiveError>;

/// Result alias for metadata store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result alias for service operations.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Failures raised while building, checking, extracting or removing archives.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The directory to archive does not exist.
    #[error("source directory {} does not exist", .0.display())]
    SourceNotFound(PathBuf),

    /// Writing the archive failed; the partial file has already been removed.
    #[error("failed to write archive {}", .path.display())]
    Write {
        /// Destination archive path.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// Reading the archive failed.
    #[error("failed to read archive {}", .path.display())]
    Read {
        /// Archive path being read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// The archive bytes no longer hash to the recorded digest.
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        /// Digest recorded at creation time.
        expected: String,
        /// Digest of the bytes currently on disk.
        actual: String,
    },

    /// No archive exists for the given reference.
    #[error("archive {} not found", .0.display())]
    NotFound(PathBuf),

    /// An entry (or an archive reference) would resolve outside its root.
    #[error("path {entry:?} escapes the extraction root")]
    PathTraversal {
        /// Offending entry name.
        entry: String,
    },

    /// Removing the archive file failed for a reason other than absence.
    #[error("failed to delete archive {}", .path.display())]
    Delete {
        /// Archive path being removed.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
}

/// Failures raised by the metadata store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The table file exists but cannot be decoded.
    #[error("metadata file {} is corrupt", .path.display())]
    CorruptMetadata {
        /// Table file path.
        path: PathBuf,
        /// Decoder failure.
        #[source]
        source: serde_json::Error,
    },

    /// Reading or writing a table file failed.
    #[error("metadata I/O failed for {}", .path.display())]
    Io {
        /// Table file path.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// Encoding a table failed.
    #[error("failed to serialize metadata")]
    Serialize(#[source] serde_json::Error),
}

/// Errors surfaced to collaborators of [`crate::service::CheckpointService`].
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("game name cannot be empty")]
    EmptyGameName,

    #[error("save path cannot be empty")]
    EmptySavePath,

    #[error("game ID cannot be empty")]
    EmptyGameId,

    #[error("game {0:?} already exists")]
    GameAlreadyExists(String),

    #[error("game {0:?} not found")]
    GameNotFound(String),

    #[error("checkpoint name cannot be empty")]
    EmptyCheckpointName,

    #[error("checkpoint {0:?} not found")]
    CheckpointNotFound(String),

    /// The stored archive failed its integrity check; nothing was extracted.
    #[error("checkpoint {checkpoint_id} verification failed")]
    VerificationFailed {
        checkpoint_id: String,
        #[source]
        source: ArchiveError,
    },

    #[error("failed to {context}")]
    Archive {
        context: &'static str,
        #[source]
        source: ArchiveError,
    },

    #[error("failed to {context}")]
    Store {
        context: &'static str,
        #[source]
        source: StoreError,
    },

    /// The checkpoint record was removed but its archive could not be.
    #[error("warning: checkpoint {checkpoint_id} removed but its archive was not deleted")]
    ArchiveCleanup {
        checkpoint_id: String,
        #[source]
        source: ArchiveError,
    },
}

impl ServiceError {
    /// Whether the error only reports a follow-up problem after the operation itself succeeded.
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::ArchiveCleanup { .. })
    }

    pub(crate) fn store(context: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| Self::Store { context, source }
    }

    pub(crate) fn archive(context: &'static str) -> impl FnOnce(ArchiveError) -> Self {
        move |source| Self::Archive { context, source }
    }
}
