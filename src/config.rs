//! Configuration module for userstore.

use serde::{Deserialize, Deserializer};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::{Result, StoreError};

/// Environment variable that overrides `storage.root_directory`.
pub const ROOT_DIRECTORY_ENV: &str = "USERSTORE_ROOT_DIRECTORY";

/// Per-user storage configuration.
///
/// Constructed once and passed by reference to every storage component.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one subdirectory per user.
    #[serde(default = "default_root_directory")]
    pub root_directory: PathBuf,
    /// Maximum total bytes a single user may store.
    #[serde(default = "default_max_user_bytes")]
    pub max_user_bytes: u64,
    /// Maximum size of a single uploaded file.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Accepted extensions, lowercase and dot-prefixed (e.g. `.png`).
    #[serde(
        default = "default_allowed_extensions",
        deserialize_with = "deserialize_extensions"
    )]
    pub allowed_extensions: BTreeSet<String>,
}

fn default_root_directory() -> PathBuf {
    PathBuf::from("data/files")
}

fn default_max_user_bytes() -> u64 {
    100 * 1024 * 1024 // 100MB
}

fn default_max_file_bytes() -> u64 {
    10 * 1024 * 1024 // 10MB
}

const DEFAULT_EXTENSIONS: &[&str] = &[
    ".gmi", ".txt", ".jpg", ".jpeg", ".gif", ".png", ".svg", ".webp", ".midi", ".json", ".csv",
    ".gemini", ".mp3", ".css", ".ttf", ".otf", ".woff2", ".html", ".htm",
];

fn default_allowed_extensions() -> BTreeSet<String> {
    DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}

fn normalize_extensions<I, S>(extensions: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    extensions
        .into_iter()
        .map(|e| e.as_ref().trim().to_lowercase())
        .collect()
}

fn deserialize_extensions<'de, D>(deserializer: D) -> std::result::Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<String>::deserialize(deserializer)?;
    Ok(normalize_extensions(raw))
}

impl StorageConfig {
    /// Create a configuration rooted at `root_directory` with default limits.
    pub fn new(root_directory: impl Into<PathBuf>) -> Self {
        Self {
            root_directory: root_directory.into(),
            ..Self::default()
        }
    }

    /// Set the per-user byte cap.
    pub fn with_max_user_bytes(mut self, max: u64) -> Self {
        self.max_user_bytes = max;
        self
    }

    /// Set the per-file byte cap.
    pub fn with_max_file_bytes(mut self, max: u64) -> Self {
        self.max_file_bytes = max;
        self
    }

    /// Replace the extension allow-list. Entries are lower-cased.
    pub fn with_allowed_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_extensions = normalize_extensions(extensions);
        self
    }

    /// Whether `ext` (dot-prefixed) is on the allow-list, ignoring case.
    pub fn allows_extension(&self, ext: &str) -> bool {
        self.allowed_extensions.contains(&ext.to_lowercase())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_directory: default_root_directory(),
            max_user_bytes: default_max_user_bytes(),
            max_file_bytes: default_max_file_bytes(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/userstore.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(StoreError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| StoreError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `USERSTORE_ROOT_DIRECTORY`: Override the storage root
    pub fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var(ROOT_DIRECTORY_ENV) {
            if !root.is_empty() {
                self.storage.root_directory = PathBuf::from(root);
            }
        }
    }

    /// Validate the configuration.
    ///
    /// Returns an error if:
    /// - The storage root is empty
    /// - Either byte cap is zero
    /// - A single file may exceed the per-user cap
    /// - An allowed extension is not dot-prefixed
    pub fn validate(&self) -> Result<()> {
        let storage = &self.storage;
        if storage.root_directory.as_os_str().is_empty() {
            return Err(StoreError::Config(
                "storage.root_directory must not be empty".to_string(),
            ));
        }
        if storage.max_user_bytes == 0 || storage.max_file_bytes == 0 {
            return Err(StoreError::Config(
                "storage byte limits must be greater than zero".to_string(),
            ));
        }
        if storage.max_file_bytes > storage.max_user_bytes {
            return Err(StoreError::Config(format!(
                "storage.max_file_bytes ({}) exceeds storage.max_user_bytes ({})",
                storage.max_file_bytes, storage.max_user_bytes
            )));
        }
        if let Some(ext) = storage
            .allowed_extensions
            .iter()
            .find(|e| !e.starts_with('.') || e.len() < 2)
        {
            return Err(StoreError::Config(format!(
                "allowed extension {ext:?} must look like \".png\""
            )));
        }
        Ok(())
    }
}
