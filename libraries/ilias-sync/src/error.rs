use ilias_core::{AuthError, SourceError};
use std::path::PathBuf;
use thiserror::Error;

/// Errors that end a sync run
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Sync root unreachable: {0}")]
    RootUnreachable(SourceError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid sync options: {0}")]
    InvalidOptions(String),

    #[error("Sync was cancelled")]
    Cancelled,
}

impl SyncError {
    /// Root listing failures caused by a rejected login are auth failures.
    pub fn root_unreachable(error: SourceError) -> Self {
        match error {
            SourceError::Auth(auth) => Self::Auth(auth),
            other => Self::RootUnreachable(other),
        }
    }

    pub fn is_invalid_credentials(&self) -> bool {
        matches!(self, Self::Auth(AuthError::InvalidCredentials))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// A folder that could not be expanded; its subtree is skipped
#[derive(Error, Debug)]
pub enum CrawlError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Crawl was cancelled")]
    Cancelled,
}

impl CrawlError {
    /// A rejected login ends the whole run, not just this folder.
    pub fn is_invalid_credentials(&self) -> bool {
        matches!(self, Self::Source(e) if e.is_invalid_credentials())
    }
}

/// A single file that could not be mirrored
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Size mismatch: expected {expected} bytes, received {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("Download was cancelled")]
    Cancelled,
}

impl DownloadError {
    /// Whether another attempt may succeed.
    ///
    /// A short body usually means the connection dropped mid-transfer.
    /// Local IO errors (disk full, permissions) are not retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Source(e) => e.is_transient(),
            Self::SizeMismatch { .. } => true,
            Self::Io(_) | Self::Cancelled => false,
        }
    }

    pub fn is_invalid_credentials(&self) -> bool {
        matches!(self, Self::Source(e) if e.is_invalid_credentials())
    }
}

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Failed to access manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Manifest {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize manifest: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Manifest {path} has unsupported version {version}")]
    UnsupportedVersion { path: PathBuf, version: u32 },
}
