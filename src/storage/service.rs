//! User storage service.
//!
//! Ties the storage components together:
//! - Upload with validation, symlink-checked paths and quota
//! - Read, remove and list of a user's files
//! - Export of a user's directory as a zip archive

use std::fs;
use std::io::{self, Seek, Write};
use std::path::PathBuf;

use tracing::{info, warn};
use walkdir::WalkDir;

use super::archive::{ArchiveExporter, ExportSummary};
use super::path::PathResolver;
use super::quota::{QuotaError, QuotaGuard};
use super::validate::{validate_upload, InvalidNameReason, UploadError};
use crate::config::StorageConfig;
use crate::{Result, StoreError};

/// A file in a user's directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Path relative to the user's directory, `/`-separated.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
}

/// Storage service bound to one configuration.
#[derive(Debug, Clone)]
pub struct UserStorage {
    config: StorageConfig,
}

impl UserStorage {
    /// Create a new UserStorage.
    pub fn new(config: StorageConfig) -> Self {
        Self { config }
    }

    /// The configuration this service was built with.
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Path resolver for this configuration.
    pub fn resolver(&self) -> PathResolver<'_> {
        PathResolver::new(&self.config)
    }

    /// Quota guard for this configuration.
    pub fn quota(&self) -> QuotaGuard<'_> {
        QuotaGuard::new(&self.config)
    }

    /// Store an uploaded file.
    ///
    /// # Validation
    /// - Filename, extension and size via [`validate_upload`]
    /// - Target path must stay under the user's directory after symlink resolution
    /// - Target must not itself be a symlink
    /// - Quota: overwriting a file is only charged for the growth
    ///
    /// A user without a directory yet starts at zero usage instead of tripping
    /// the fail-closed quota check. The directory is only created once the
    /// quota allows the write, so a denied upload leaves nothing behind.
    ///
    /// # Returns
    /// The path the file was written to.
    pub fn store(&self, username: &str, filename: &str, payload: &[u8]) -> Result<PathBuf> {
        validate_upload(filename, payload, &self.config)?;

        let resolver = self.resolver();
        let user_dir = resolver.user_directory(username);
        let path = resolver.contained_file_path(username, filename)?;
        if path == user_dir {
            return Err(UploadError::InvalidName(InvalidNameReason::Empty).into());
        }

        let existing = match fs::symlink_metadata(&path) {
            Ok(m) if m.file_type().is_symlink() => {
                warn!(username, filename, "refusing to write through symlink");
                return Err(StoreError::PathEscape(path.display().to_string()));
            }
            Ok(m) if m.is_file() => m.len(),
            _ => 0,
        };
        let growth = (payload.len() as u64).saturating_sub(existing);

        if fs::symlink_metadata(&user_dir).is_ok() {
            self.quota().check_space(username, growth)?;
        } else if growth > self.config.max_user_bytes {
            return Err(QuotaError::Exceeded {
                used: 0,
                requested: growth,
                limit: self.config.max_user_bytes,
            }
            .into());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, payload)?;

        info!(username, filename, size = payload.len(), "stored file");
        Ok(path)
    }

    /// Read a stored file.
    pub fn read(&self, username: &str, filename: &str) -> Result<Vec<u8>> {
        let path = self.resolver().contained_file_path(username, filename)?;

        match fs::read(&path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(format!("file {username}/{filename}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a stored file.
    ///
    /// # Returns
    /// `true` if the file was removed, `false` if it didn't exist
    pub fn remove(&self, username: &str, filename: &str) -> Result<bool> {
        let path = self.resolver().contained_file_path(username, filename)?;

        match fs::remove_file(&path) {
            Ok(()) => {
                info!(username, filename, "removed file");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// List the regular files in a user's directory, in lexical walk order.
    ///
    /// A user without a directory has no files.
    pub fn list(&self, username: &str) -> Result<Vec<StoredFile>> {
        let resolver = self.resolver();
        let user_dir = resolver.user_directory(username);
        if !user_dir.is_dir() {
            return Ok(Vec::new());
        }
        resolver.ensure_contained(&user_dir)?;

        let mut files = Vec::new();
        for entry in WalkDir::new(&user_dir).follow_links(false).sort_by_file_name() {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(&user_dir).unwrap_or(entry.path());
            let path = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            let size = entry.metadata().map_err(io::Error::from)?.len();
            files.push(StoredFile { path, size });
        }
        Ok(files)
    }

    /// Bytes currently stored by `username`.
    pub fn usage(&self, username: &str) -> Result<u64> {
        Ok(self.quota().usage(username)?)
    }

    /// Export a user's directory as a zip archive into `sink`.
    ///
    /// A user without a directory exports an empty archive.
    pub fn export<W: Write + Seek>(&self, username: &str, sink: W) -> Result<ExportSummary> {
        let resolver = self.resolver();
        let user_dir = resolver.user_directory(username);
        resolver.ensure_contained(&user_dir)?;
        ArchiveExporter::new().export(&user_dir, sink)
    }
}
