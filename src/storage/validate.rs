//! Upload validation.
//!
//! Checks run in a fixed order and the first failure wins:
//! 1. filename length in `1..=256` bytes
//! 2. lower-cased extension on the allow-list
//! 3. payload no larger than `max_file_bytes`
//!
//! Quota is checked separately by [`QuotaGuard`](super::QuotaGuard).

use thiserror::Error;

use super::MAX_FILENAME_LENGTH;
use crate::config::StorageConfig;

/// Why a filename was rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidNameReason {
    /// Filename is empty.
    #[error("please enter a filename")]
    Empty,

    /// Filename is longer than [`MAX_FILENAME_LENGTH`] bytes.
    #[error("filename is too long")]
    TooLong,
}

/// Upload validation errors.
///
/// All of these are meant to be shown to the uploader as-is.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// Filename is empty or too long.
    #[error("{0}")]
    InvalidName(InvalidNameReason),

    /// Extension is not on the allow-list. Carries the lower-cased extension.
    #[error("invalid file extension: {0}")]
    UnsupportedExtension(String),

    /// Payload exceeds the per-file cap.
    #[error("file too large: file was {size} bytes, max file size is {max}")]
    FileTooLarge { size: u64, max: u64 },
}

/// Extension of the final path element, lower-cased, including the dot.
///
/// Returns an empty string when the final element has no dot.
///
/// # Examples
///
/// ```
/// use userstore::storage::file_extension;
///
/// assert_eq!(file_extension("photo.PNG"), ".png");
/// assert_eq!(file_extension("archive.tar.gz"), ".gz");
/// assert_eq!(file_extension("dir.d/README"), "");
/// ```
pub fn file_extension(filename: &str) -> String {
    let name = filename.rsplit('/').next().unwrap_or(filename);
    match name.rfind('.') {
        Some(dot) => name[dot..].to_lowercase(),
        None => String::new(),
    }
}

/// Decide whether `filename` with `payload` may be accepted.
///
/// Pure: touches neither the filesystem nor the quota.
pub fn validate_upload(
    filename: &str,
    payload: &[u8],
    config: &StorageConfig,
) -> Result<(), UploadError> {
    if filename.is_empty() {
        return Err(UploadError::InvalidName(InvalidNameReason::Empty));
    }
    if filename.len() > MAX_FILENAME_LENGTH {
        return Err(UploadError::InvalidName(InvalidNameReason::TooLong));
    }

    let ext = file_extension(filename);
    if !config.allows_extension(&ext) {
        return Err(UploadError::UnsupportedExtension(ext));
    }

    let size = payload.len() as u64;
    if size > config.max_file_bytes {
        return Err(UploadError::FileTooLarge {
            size,
            max: config.max_file_bytes,
        });
    }

    Ok(())
}
