//! Error types for userstore.

use thiserror::Error;

use crate::storage::{QuotaError, UploadError};

/// Common error type for userstore.
#[derive(Error, Debug)]
pub enum StoreError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Upload candidate rejected by the validator.
    #[error("upload rejected: {0}")]
    Upload(#[from] UploadError),

    /// Quota check denied the write.
    #[error("quota check failed: {0}")]
    Quota(#[from] QuotaError),

    /// Archive construction failed.
    ///
    /// Errors from the zip writer and the directory walker are converted
    /// into this variant with the offending path attached.
    #[error("export failed: {0}")]
    Export(String),

    /// A resolved path left the storage root once symlinks were followed.
    #[error("path escapes storage root: {0}")]
    PathEscape(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),
}

impl From<zip::result::ZipError> for StoreError {
    fn from(e: zip::result::ZipError) -> Self {
        StoreError::Export(e.to_string())
    }
}

impl From<walkdir::Error> for StoreError {
    fn from(e: walkdir::Error) -> Self {
        match e.path() {
            Some(path) => StoreError::Export(format!("{}: {e}", path.display())),
            None => StoreError::Export(e.to_string()),
        }
    }
}

/// Result type alias for userstore operations.
pub type Result<T> = std::result::Result<T, StoreError>;
