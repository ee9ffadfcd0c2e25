//! userstore - per-user sandboxed file storage.
//!
//! Confines paths to a user's private directory, enforces a per-user quota,
//! validates upload candidates and exports directory trees as zip archives.
//! Front ends (HTTP handlers, admin tools) call into [`storage`] with a
//! username, a filename and a payload, and supply a [`StorageConfig`].

pub mod config;
pub mod error;
pub mod logging;
pub mod storage;

pub use config::{Config, LoggingConfig, StorageConfig};
pub use error::{Result, StoreError};
pub use storage::{
    file_extension, validate_upload, ArchiveExporter, ExportSummary, InvalidNameReason,
    PathResolver, QuotaError, QuotaGuard, StoredFile, UploadError, UserStorage,
    MAX_FILENAME_LENGTH,
};
