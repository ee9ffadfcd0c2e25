//! Per-user sandboxed storage.
//!
//! This module provides the pieces an upload/download front end calls into:
//! - Path confinement under `root_directory/<username>`
//! - Upload validation (name, extension, size)
//! - Quota accounting by full directory walk
//! - Zip export of a directory tree
//!
//! Typical upload flow: resolve the target with [`PathResolver`], approve the
//! payload with [`validate_upload`], confirm capacity with [`QuotaGuard`], then
//! write. [`UserStorage`] runs that sequence in one call.
//!
//! Nothing here locks a user's directory. Two concurrent uploads for the same
//! user can both pass the quota check before either lands, so the cap can be
//! overshot by up to one file per concurrent writer.

mod archive;
mod path;
mod quota;
mod service;
mod validate;

pub use archive::{ArchiveExporter, ExportSummary};
pub use path::PathResolver;
pub use quota::{dir_size, QuotaError, QuotaGuard};
pub use service::{StoredFile, UserStorage};
pub use validate::{file_extension, validate_upload, InvalidNameReason, UploadError};

/// Maximum length for an uploaded filename (in bytes).
pub const MAX_FILENAME_LENGTH: usize = 256;
