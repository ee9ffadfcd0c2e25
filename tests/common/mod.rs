//! Test helpers for storage integration tests.

use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;

use tempfile::TempDir;
use userstore::StorageConfig;
use zip::ZipArchive;

/// Fresh storage root with small limits.
pub fn test_config() -> (TempDir, StorageConfig) {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let config = StorageConfig::new(temp.path())
        .with_max_user_bytes(1000)
        .with_max_file_bytes(200)
        .with_allowed_extensions([".png", ".txt", ".gmi"]);
    (temp, config)
}

/// Write `content` at `root/relative`, creating parents.
pub fn write_file(root: &Path, relative: &str, content: &[u8]) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent");
    }
    fs::write(path, content).expect("Failed to write file");
}

/// Entry names and contents (`None` for directories) in archive order.
pub fn read_archive(bytes: &[u8]) -> Vec<(String, Option<Vec<u8>>)> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).expect("Not a zip archive");
    (0..archive.len())
        .map(|i| {
            let mut entry = archive.by_index(i).expect("Missing entry");
            let name = entry.name().to_string();
            if entry.is_dir() {
                (name, None)
            } else {
                let mut content = Vec::new();
                entry.read_to_end(&mut content).expect("Unreadable entry");
                (name, Some(content))
            }
        })
        .collect()
}
