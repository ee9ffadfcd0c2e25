//! Zip export of a directory tree.
//!
//! A directory source produces an archive with a single top-level folder
//! named after the source (`alice/`, `alice/a.txt`, `alice/sub/`, ...). A file
//! source produces a single entry named after the file.
//!
//! Entries are written depth-first in lexical order per directory, without
//! reordering or deduplication. Directory entries end in `/` and carry no
//! content; file entries are compressed. Symlinks and special files are
//! skipped, never followed.

use std::fs::{self, File, Metadata};
use std::io::{self, Seek, Write};
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Datelike, Local, Timelike};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::{Result, StoreError};

/// Counts for a finished export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    /// Entries written (directories and files).
    pub entries: usize,
    /// File entries written.
    pub files: usize,
    /// Uncompressed bytes copied into file entries.
    pub bytes: u64,
}

/// Streams a directory tree into a zip archive.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveExporter {
    method: CompressionMethod,
}

impl Default for ArchiveExporter {
    fn default() -> Self {
        Self {
            method: CompressionMethod::Deflated,
        }
    }
}

impl ArchiveExporter {
    /// Create an exporter that deflates file entries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different compression method for file entries.
    pub fn with_method(mut self, method: CompressionMethod) -> Self {
        self.method = method;
        self
    }

    /// Write `source` into a zip archive on `sink`.
    ///
    /// The archive is always finalized before returning, so `sink` holds a
    /// readable archive even when an error cut the walk short; the entries
    /// written before the failure stay in it.
    ///
    /// A `source` that does not exist or cannot be statted is not an error:
    /// the sink receives an empty archive. Callers that must tell "nothing to
    /// export" apart from "exported" should check [`ExportSummary::entries`].
    pub fn export<W: Write + Seek>(&self, source: &Path, sink: W) -> Result<ExportSummary> {
        let mut archive = ZipWriter::new(sink);
        let walked = self.write_tree(source, &mut archive);
        let finished = archive.finish();

        match (walked, finished) {
            (Ok(summary), Ok(_)) => {
                info!(
                    source = %source.display(),
                    entries = summary.entries,
                    bytes = summary.bytes,
                    "export complete"
                );
                Ok(summary)
            }
            (Err(e), finished) => {
                if let Err(close_err) = finished {
                    warn!(error = %close_err, "could not finalize partial archive");
                }
                warn!(source = %source.display(), error = %e, "export aborted");
                Err(e)
            }
            (Ok(_), Err(e)) => Err(e.into()),
        }
    }

    fn write_tree<W: Write + Seek>(
        &self,
        source: &Path,
        archive: &mut ZipWriter<W>,
    ) -> Result<ExportSummary> {
        let mut summary = ExportSummary::default();

        let root = match fs::metadata(source) {
            Ok(root) => root,
            Err(e) => {
                warn!(
                    source = %source.display(),
                    error = %e,
                    "export source unavailable, writing empty archive"
                );
                return Ok(summary);
            }
        };
        let base = root.is_dir().then(|| base_name(source));

        for entry in WalkDir::new(source).follow_links(false).sort_by_file_name() {
            let entry = entry?;
            let file_type = entry.file_type();
            if !file_type.is_dir() && !file_type.is_file() {
                warn!(path = %entry.path().display(), "skipping symlink or special file");
                continue;
            }

            let metadata = entry.metadata()?;
            let mut name = entry_name(source, entry.path(), base.as_deref());
            let options = entry_options(&metadata);

            if file_type.is_dir() {
                name.push('/');
                debug!(entry = %name, "adding directory");
                archive.add_directory(name.as_str(), options)?;
            } else {
                debug!(entry = %name, size = metadata.len(), "adding file");
                let options = options
                    .compression_method(self.method)
                    .large_file(metadata.len() >= u64::from(u32::MAX));
                archive.start_file(name.as_str(), options)?;

                let mut file = File::open(entry.path()).map_err(|e| export_error(entry.path(), e))?;
                let copied = io::copy(&mut file, archive).map_err(|e| export_error(entry.path(), e))?;
                summary.files += 1;
                summary.bytes += copied;
            }
            summary.entries += 1;
        }

        Ok(summary)
    }
}

fn export_error(path: &Path, e: io::Error) -> StoreError {
    StoreError::Export(format!("{}: {e}", path.display()))
}

/// Name of the top-level folder for a directory source.
fn base_name(source: &Path) -> String {
    if let Some(name) = source.file_name() {
        return name.to_string_lossy().into_owned();
    }
    // "." and ".." have no file name of their own.
    source
        .canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "export".to_string())
}

/// Archive entry name for `path`, always `/`-separated.
fn entry_name(source: &Path, path: &Path, base: Option<&str>) -> String {
    match base {
        Some(base) => {
            let relative = path.strip_prefix(source).unwrap_or(path);
            let mut name = base.to_string();
            for component in relative.components() {
                name.push('/');
                name.push_str(&component.as_os_str().to_string_lossy());
            }
            name
        }
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    }
}

fn entry_options(metadata: &Metadata) -> SimpleFileOptions {
    let mut options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        options = options.unix_permissions(metadata.permissions().mode() & 0o7777);
    }

    if let Some(modified) = metadata.modified().ok().and_then(zip_timestamp) {
        options = options.last_modified_time(modified);
    }
    options
}

/// Convert a filesystem timestamp to a zip (MS-DOS, local time) timestamp.
///
/// Returns `None` outside the representable range (1980-2107).
fn zip_timestamp(time: SystemTime) -> Option<zip::DateTime> {
    let local: DateTime<Local> = time.into();
    zip::DateTime::from_date_and_time(
        u16::try_from(local.year()).ok()?,
        local.month() as u8,
        local.day() as u8,
        local.hour() as u8,
        local.minute() as u8,
        local.second() as u8,
    )
    .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};
    use std::time::{Duration, UNIX_EPOCH};
    use tempfile::TempDir;
    use zip::ZipArchive;

    fn build_tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("alice");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("a.txt"), "hi").unwrap();
        fs::write(root.join("sub").join("b.txt"), "bye").unwrap();
        temp
    }

    fn export_to_vec(exporter: &ArchiveExporter, source: &Path) -> (ExportSummary, Vec<u8>) {
        let mut buf = Cursor::new(Vec::new());
        let summary = exporter.export(source, &mut buf).unwrap();
        (summary, buf.into_inner())
    }

    fn entries(bytes: &[u8]) -> Vec<(String, Option<Vec<u8>>)> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut out = Vec::new();
        for i in 0..archive.len() {
            let mut file = archive.by_index(i).unwrap();
            let name = file.name().to_string();
            if file.is_dir() {
                out.push((name, None));
            } else {
                let mut content = Vec::new();
                file.read_to_end(&mut content).unwrap();
                out.push((name, Some(content)));
            }
        }
        out
    }

    #[test]
    fn test_export_directory_layout() {
        let temp = build_tree();
        let (summary, bytes) = export_to_vec(&ArchiveExporter::new(), &temp.path().join("alice"));

        assert_eq!(
            entries(&bytes),
            vec![
                ("alice/".to_string(), None),
                ("alice/a.txt".to_string(), Some(b"hi".to_vec())),
                ("alice/sub/".to_string(), None),
                ("alice/sub/b.txt".to_string(), Some(b"bye".to_vec())),
            ]
        );
        assert_eq!(
            summary,
            ExportSummary {
                entries: 4,
                files: 2,
                bytes: 5
            }
        );
    }

    #[test]
    fn test_export_files_are_deflated() {
        let temp = build_tree();
        let (_, bytes) = export_to_vec(&ArchiveExporter::new(), &temp.path().join("alice"));

        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let file = archive.by_name("alice/a.txt").unwrap();
        assert_eq!(file.compression(), CompressionMethod::Deflated);
    }

    #[test]
    fn test_export_with_stored_method() {
        let temp = build_tree();
        let exporter = ArchiveExporter::new().with_method(CompressionMethod::Stored);
        let (_, bytes) = export_to_vec(&exporter, &temp.path().join("alice"));

        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let file = archive.by_name("alice/sub/b.txt").unwrap();
        assert_eq!(file.compression(), CompressionMethod::Stored);
    }

    #[test]
    fn test_export_single_file_has_no_prefix() {
        let temp = build_tree();
        let source = temp.path().join("alice").join("sub").join("b.txt");
        let (summary, bytes) = export_to_vec(&ArchiveExporter::new(), &source);

        assert_eq!(entries(&bytes), vec![("b.txt".to_string(), Some(b"bye".to_vec()))]);
        assert_eq!(summary.files, 1);
    }

    #[test]
    fn test_export_missing_source_writes_empty_archive() {
        let temp = TempDir::new().unwrap();
        let (summary, bytes) = export_to_vec(&ArchiveExporter::new(), &temp.path().join("nobody"));

        assert_eq!(summary, ExportSummary::default());
        let archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 0);
    }

    #[test]
    fn test_export_empty_directory() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("empty");
        fs::create_dir(&source).unwrap();

        let (_, bytes) = export_to_vec(&ArchiveExporter::new(), &source);
        assert_eq!(entries(&bytes), vec![("empty/".to_string(), None)]);
    }

    #[test]
    fn test_export_trailing_slash_source() {
        let temp = build_tree();
        let source = format!("{}/", temp.path().join("alice").display());

        let (_, bytes) = export_to_vec(&ArchiveExporter::new(), Path::new(&source));
        let names: Vec<String> = entries(&bytes).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names[0], "alice/");
        assert!(names.contains(&"alice/sub/b.txt".to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn test_export_skips_symlinks() {
        let temp = build_tree();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret.txt"), "secret").unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("secret.txt"),
            temp.path().join("alice").join("leak.txt"),
        )
        .unwrap();

        let (summary, bytes) = export_to_vec(&ArchiveExporter::new(), &temp.path().join("alice"));
        let names: Vec<String> = entries(&bytes).into_iter().map(|(n, _)| n).collect();
        assert!(!names.contains(&"alice/leak.txt".to_string()));
        assert_eq!(summary.files, 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_export_keeps_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp = build_tree();
        let script = temp.path().join("alice").join("run.txt");
        fs::write(&script, "#!/bin/sh").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o750)).unwrap();

        let (_, bytes) = export_to_vec(&ArchiveExporter::new(), &temp.path().join("alice"));
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let file = archive.by_name("alice/run.txt").unwrap();
        assert_eq!(file.unix_mode().map(|m| m & 0o777), Some(0o750));
    }

    /// Sink that refuses writes past `limit` bytes.
    struct LimitedSink {
        inner: Cursor<Vec<u8>>,
        limit: usize,
    }

    impl Write for LimitedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.inner.get_ref().len() + buf.len() > self.limit {
                return Err(io::Error::new(io::ErrorKind::Other, "sink full"));
            }
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    impl Seek for LimitedSink {
        fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    #[test]
    fn test_export_surfaces_sink_errors() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("alice");
        fs::create_dir(&source).unwrap();
        // Incompressible content so the deflater cannot shrink it under the limit.
        let mut state = 0x2545_f491_u32;
        let noise: Vec<u8> = (0..256 * 1024)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect();
        fs::write(source.join("big.txt"), noise).unwrap();

        let sink = LimitedSink {
            inner: Cursor::new(Vec::new()),
            limit: 4096,
        };
        let result = ArchiveExporter::new().export(&source, sink);
        assert!(matches!(result, Err(StoreError::Export(_))), "{result:?}");
    }

    /// Sink that fails the first write carrying `marker`, then works again.
    struct TripwireSink {
        inner: Cursor<Vec<u8>>,
        marker: &'static [u8],
        tripped: bool,
    }

    impl Write for TripwireSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if !self.tripped && buf.windows(self.marker.len()).any(|w| w == self.marker) {
                self.tripped = true;
                return Err(io::Error::new(io::ErrorKind::Other, "write refused"));
            }
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    impl Seek for TripwireSink {
        fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    #[test]
    fn test_export_failure_leaves_finalized_partial_archive() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("alice");
        fs::create_dir_all(source.join("sub")).unwrap();
        fs::write(source.join("a.txt"), "hi").unwrap();
        fs::write(source.join("sub").join("b.txt"), "TRIPWIRE-CONTENT").unwrap();

        // Stored entries pass file bytes to the sink unchanged, so the copy of
        // b.txt is the write that fails.
        let mut sink = TripwireSink {
            inner: Cursor::new(Vec::new()),
            marker: b"TRIPWIRE",
            tripped: false,
        };
        let result = ArchiveExporter::new()
            .with_method(CompressionMethod::Stored)
            .export(&source, &mut sink);

        assert!(sink.tripped);
        assert!(matches!(result, Err(StoreError::Export(ref msg)) if msg.contains("b.txt")), "{result:?}");

        let bytes = sink.inner.into_inner();
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(&names[..3], ["alice/", "alice/a.txt", "alice/sub/"]);

        let mut content = String::new();
        archive
            .by_name("alice/a.txt")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "hi");
    }

    #[test]
    fn test_entry_name() {
        let source = Path::new("/data/alice");
        assert_eq!(entry_name(source, source, Some("alice")), "alice");
        assert_eq!(
            entry_name(source, &source.join("sub").join("b.txt"), Some("alice")),
            "alice/sub/b.txt"
        );
        assert_eq!(
            entry_name(Path::new("/data/a.txt"), Path::new("/data/a.txt"), None),
            "a.txt"
        );
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name(Path::new("/data/alice")), "alice");
        assert_eq!(base_name(Path::new("/data/alice/")), "alice");
    }

    #[test]
    fn test_zip_timestamp_range() {
        // 1970 predates the zip epoch.
        assert!(zip_timestamp(UNIX_EPOCH).is_none());

        let t = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        assert!(zip_timestamp(t).is_some());
    }
}
