//! Path confinement for user directories.
//!
//! Usernames and filenames are cleaned lexically before being joined onto the
//! storage root: the input is treated as if it were rooted, so `..` can never
//! climb above the point it is joined at and absolute paths lose their root.
//!
//! Lexical cleaning does not look at the filesystem. A symlink planted inside
//! a user directory can still point elsewhere; [`PathResolver::contained_file_path`]
//! (boundary: the user's directory) and [`PathResolver::ensure_contained`]
//! (boundary: the storage root) resolve symlinks and reject escapes for callers
//! that need that guarantee.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use crate::config::StorageConfig;
use crate::{Result, StoreError};

/// Maps usernames and filenames to paths under the storage root.
#[derive(Debug, Clone, Copy)]
pub struct PathResolver<'a> {
    config: &'a StorageConfig,
}

impl<'a> PathResolver<'a> {
    /// Create a resolver for the given configuration.
    pub fn new(config: &'a StorageConfig) -> Self {
        Self { config }
    }

    /// The configured storage root.
    pub fn root(&self) -> &Path {
        &self.config.root_directory
    }

    /// Directory owned by `username`.
    ///
    /// A username that cleans to nothing (`""`, `"."`, `"../.."`) resolves to
    /// the root itself; usernames are expected to be authenticated upstream.
    pub fn user_directory(&self, username: &str) -> PathBuf {
        let path = self.root().join(neutralize(username));
        debug!(username, path = %path.display(), "resolved user directory");
        path
    }

    /// Path of `filename` inside the directory owned by `username`.
    pub fn file_path(&self, username: &str, filename: &str) -> PathBuf {
        self.user_directory(username).join(neutralize(filename))
    }

    /// Like [`file_path`](Self::file_path), but also fails if symlinks along
    /// the existing part of the path lead outside the user's own directory.
    ///
    /// The user directory itself is checked against the storage root, and the
    /// file path against the user directory, so a link in `alice/` cannot
    /// reach into `bob/` either.
    pub fn contained_file_path(&self, username: &str, filename: &str) -> Result<PathBuf> {
        let user_dir = self.user_directory(username);
        let path = user_dir.join(neutralize(filename));
        self.ensure_contained(&user_dir)?;
        ensure_within(&path, &user_dir)?;
        Ok(path)
    }

    /// Check that `path` stays under the storage root once symlinks are resolved.
    ///
    /// The boundary is the whole root, not a single user's directory; use
    /// [`contained_file_path`](Self::contained_file_path) for per-user confinement.
    pub fn ensure_contained(&self, path: &Path) -> Result<()> {
        ensure_within(path, self.root())
    }
}

/// Check that `path` resolves under `boundary`.
///
/// Only the deepest existing ancestor of `path` is canonicalized; the
/// components below it do not exist yet and were already cleaned lexically.
/// A dangling symlink fails: writing through it would create its target
/// wherever it points.
fn ensure_within(path: &Path, boundary: &Path) -> Result<()> {
    let boundary = match boundary.canonicalize() {
        Ok(boundary) => boundary,
        // Nothing exists under a missing boundary, so nothing can be a symlink.
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let mut existing = path;
    let resolved = loop {
        match existing.canonicalize() {
            Ok(resolved) => break resolved,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if fs::symlink_metadata(existing).is_ok() {
                    warn!(path = %existing.display(), "dangling symlink in storage path");
                    return Err(StoreError::PathEscape(path.display().to_string()));
                }
                match existing.parent() {
                    Some(parent) => existing = parent,
                    None => return Ok(()),
                }
            }
            Err(e) => return Err(e.into()),
        }
    };

    if resolved.starts_with(&boundary) {
        Ok(())
    } else {
        warn!(
            path = %path.display(),
            resolved = %resolved.display(),
            boundary = %boundary.display(),
            "path escapes storage boundary"
        );
        Err(StoreError::PathEscape(path.display().to_string()))
    }
}

/// Clean `input` into a relative path with no `.`, `..`, root or prefix components.
///
/// `..` removes the previously kept component and is dropped when there is
/// nothing left to remove.
fn neutralize(input: &str) -> PathBuf {
    let mut parts: Vec<&OsStr> = Vec::new();
    for component in Path::new(input).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::ParentDir => {
                parts.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    parts.into_iter().collect()
}
