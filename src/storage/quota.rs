//! Per-user quota accounting.
//!
//! Usage is recomputed by walking the user's directory on every call. There
//! is no cache, so the answer is never stale, and each check costs one pass
//! over the user's files.

use std::path::Path;

use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::PathResolver;
use crate::config::StorageConfig;

/// Quota check failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuotaError {
    /// Accepting the new bytes would take the user past the cap.
    #[error("storage quota exceeded: {used} bytes used, {requested} requested, limit is {limit}")]
    Exceeded { used: u64, requested: u64, limit: u64 },

    /// The user's directory could not be walked.
    #[error("storage usage unavailable: {0}")]
    Unavailable(String),
}

/// Total size in bytes of every non-directory entry under `path`.
///
/// Symlinks are not followed; a link counts as its own (small) size.
/// Any walk error, including a missing `path`, is returned.
pub fn dir_size(path: &Path) -> Result<u64, walkdir::Error> {
    let mut size = 0u64;
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            size = size.saturating_add(entry.metadata()?.len());
        }
    }
    Ok(size)
}

/// Decides whether a user may store more bytes.
#[derive(Debug, Clone, Copy)]
pub struct QuotaGuard<'a> {
    config: &'a StorageConfig,
}

impl<'a> QuotaGuard<'a> {
    /// Create a guard for the given configuration.
    pub fn new(config: &'a StorageConfig) -> Self {
        Self { config }
    }

    /// Bytes currently stored by `username`.
    pub fn usage(&self, username: &str) -> Result<u64, QuotaError> {
        let user_dir = PathResolver::new(self.config).user_directory(username);
        let used = dir_size(&user_dir).map_err(|e| QuotaError::Unavailable(e.to_string()))?;
        debug!(username, used, "computed storage usage");
        Ok(used)
    }

    /// Check that `new_bytes` more fit under the cap.
    ///
    /// Returns the headroom left after the new bytes are added.
    pub fn check_space(&self, username: &str, new_bytes: u64) -> Result<u64, QuotaError> {
        let used = self.usage(username)?;
        let limit = self.config.max_user_bytes;
        match used.checked_add(new_bytes) {
            Some(total) if total <= limit => Ok(limit - total),
            _ => Err(QuotaError::Exceeded {
                used,
                requested: new_bytes,
                limit,
            }),
        }
    }

    /// Whether `new_bytes` more fit under the cap.
    ///
    /// Fails closed: if usage cannot be computed (unreadable or missing
    /// directory) the answer is `false`.
    pub fn has_space(&self, username: &str, new_bytes: u64) -> bool {
        match self.check_space(username, new_bytes) {
            Ok(_) => true,
            Err(QuotaError::Exceeded { .. }) => false,
            Err(e @ QuotaError::Unavailable(_)) => {
                warn!(username, error = %e, "denying write, usage unavailable");
                false
            }
        }
    }
}
