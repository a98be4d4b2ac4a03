//! File handling for Lanshare.
//!
//! This module handles:
//! - Describing a user-picked file or image ([`FileSource`])
//! - Splitting payloads into fixed-size chunks and reassembling them
//! - Handing received payloads to a storage collaborator ([`FileSink`])
//! - Path sanitization for received file names

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::store::FileRecord;

/// Fallback MIME type for files with no recognizable extension.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// MIME type assumed for images whose extension says nothing useful.
pub const DEFAULT_IMAGE_MIME_TYPE: &str = "image/jpeg";

/// What kind of item the user picked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    /// Any document or binary
    #[default]
    File,
    /// A photo picked from the gallery or camera
    Image,
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => f.write_str("file"),
            Self::Image => f.write_str("image"),
        }
    }
}

/// A file offered for sending.
///
/// Only metadata is gathered up front; the bytes are read when the send
/// actually starts, so a read failure is reported before anything is
/// announced to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSource {
    /// Location on disk
    pub path: PathBuf,
    /// Display name sent to the peer
    pub name: String,
    /// Size in bytes at pick time
    pub size: u64,
    /// MIME type sent to the peer
    pub mime_type: String,
    /// File or image
    pub kind: FileKind,
}

impl FileSource {
    /// Describe a regular file. The MIME type is guessed from the extension.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not exist, is unreadable, or is a
    /// directory.
    pub fn file(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(path.as_ref(), FileKind::File)
    }

    /// Describe an image. Falls back to `image/jpeg` when the extension is
    /// not an image type.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not exist, is unreadable, or is a
    /// directory.
    pub fn image(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(path.as_ref(), FileKind::Image)
    }

    /// Describe a path as the given kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not exist, is unreadable, or is a
    /// directory.
    pub fn new(path: &Path, kind: FileKind) -> Result<Self> {
        let metadata = std::fs::metadata(path).map_err(|e| read_error(path, e))?;
        if metadata.is_dir() {
            return Err(Error::InvalidPath(format!(
                "{} is a directory",
                path.display()
            )));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::InvalidPath(path.display().to_string()))?;

        Ok(Self {
            path: path.to_path_buf(),
            name,
            size: metadata.len(),
            mime_type: guess_mime_type(path, kind),
            kind,
        })
    }

    /// Read the whole file.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound` or `PermissionDenied` for the common failures,
    /// `Io` otherwise.
    pub async fn read_bytes(&self) -> Result<Vec<u8>> {
        tokio::fs::read(&self.path)
            .await
            .map_err(|e| read_error(&self.path, e))
    }
}

fn read_error(path: &Path, err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::NotFound => Error::FileNotFound(path.display().to_string()),
        io::ErrorKind::PermissionDenied => Error::PermissionDenied(path.display().to_string()),
        _ => Error::Io(err),
    }
}

/// Guess the MIME type for a path of the given kind.
#[must_use]
pub fn guess_mime_type(path: &Path, kind: FileKind) -> String {
    let guess = mime_guess::from_path(path).first_raw();
    match kind {
        FileKind::File => guess.unwrap_or(DEFAULT_MIME_TYPE).to_string(),
        FileKind::Image => match guess {
            Some(mime) if mime.starts_with("image/") => mime.to_string(),
            _ => DEFAULT_IMAGE_MIME_TYPE.to_string(),
        },
    }
}

/// Number of chunks a payload of `size` bytes splits into.
#[must_use]
pub fn chunk_count(size: u64, chunk_size: usize) -> u64 {
    size.div_ceil(chunk_size.max(1) as u64)
}

/// Split a payload into in-order chunks of at most `chunk_size` bytes.
///
/// An empty payload yields no chunks.
#[must_use]
pub fn chunk_bytes(bytes: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
    bytes.chunks(chunk_size.max(1)).map(<[u8]>::to_vec).collect()
}

/// Concatenate chunks back into the original payload.
#[must_use]
pub fn reassemble(chunks: &[Vec<u8>]) -> Vec<u8> {
    chunks.concat()
}

/// Storage collaborator for received files.
///
/// Called once per completed inbound transfer with the reassembled payload.
/// Implementations may block; the peer driver calls them off the async
/// runtime.
pub trait FileSink: Send + Sync {
    /// Store a received payload and return where it ended up.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be stored.
    fn persist(&self, record: &FileRecord, payload: &[u8]) -> Result<PathBuf>;
}

/// Writes received files into one directory.
///
/// Names are reduced to their last path component and never overwrite an
/// existing file: `photo.jpg` becomes `photo (1).jpg`, `photo (2).jpg`, ...
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    /// Create a sink writing into `dir` (created on first use).
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Target directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl FileSink for DirectorySink {
    fn persist(&self, record: &FileRecord, payload: &[u8]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;

        let file_name = safe_file_name(&record.name)
            .unwrap_or_else(|| format!("received-{}", record.id));
        let path = sanitize_path(&self.dir, Path::new(&file_name))
            .ok_or_else(|| Error::InvalidPath(record.name.clone()))?;

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = path.extension().map(|e| e.to_string_lossy().into_owned());

        let mut candidate = path.clone();
        for attempt in 1u32.. {
            match OpenOptions::new().write(true).create_new(true).open(&candidate) {
                Ok(mut file) => {
                    fill_new_file(&mut file, &candidate, payload)?;
                    return Ok(candidate);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    let numbered = match &extension {
                        Some(ext) => format!("{stem} ({attempt}).{ext}"),
                        None => format!("{stem} ({attempt})"),
                    };
                    candidate = self.dir.join(numbered);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(Error::Internal("ran out of file name candidates".to_string()))
    }
}

/// Write and sync a freshly created file. A partial file is removed again.
fn fill_new_file(file: &mut File, path: &Path, payload: &[u8]) -> Result<()> {
    if let Err(e) = file.write_all(payload).and_then(|()| file.sync_all()) {
        if let Err(remove_err) = std::fs::remove_file(path) {
            tracing::warn!(path = %path.display(), "Failed to remove partial file: {remove_err}");
        }
        return Err(e.into());
    }
    Ok(())
}

/// Last normal component of a peer-supplied name, if any.
fn safe_file_name(name: &str) -> Option<String> {
    let normalized = name.replace('\\', "/");
    Path::new(&normalized)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .next_back()
        .filter(|n| !n.trim().is_empty())
}

/// Sanitize a file path to prevent directory traversal attacks.
///
/// Returns the joined path, or `None` if `relative` escapes `base`.
#[must_use]
pub fn sanitize_path(base: &Path, relative: &Path) -> Option<PathBuf> {
    if relative
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
    {
        return None;
    }

    let full_path = base.join(relative);
    full_path.starts_with(base).then_some(full_path)
}

/// Format a file size for display.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn record(name: &str) -> FileRecord {
        FileRecord::new(
            Uuid::new_v4(),
            name.to_string(),
            3,
            "text/plain".to_string(),
            1,
            FileKind::File,
        )
    }

    #[test]
    fn test_chunk_round_trip_law() {
        let mut rng = rand::thread_rng();
        for chunk_size in [1usize, 2, 7, 1024, 8 * 1024] {
            for size in [0usize, 1, chunk_size - 1, chunk_size, chunk_size + 1, 3 * chunk_size + 5] {
                let mut payload = vec![0u8; size];
                rng.fill_bytes(&mut payload);

                let chunks = chunk_bytes(&payload, chunk_size);
                assert_eq!(chunks.len() as u64, chunk_count(size as u64, chunk_size));
                assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= chunk_size));
                assert_eq!(reassemble(&chunks), payload, "size {size}, chunk {chunk_size}");
            }
        }
    }

    #[test]
    fn test_chunk_count_edges() {
        assert_eq!(chunk_count(0, 8192), 0);
        assert_eq!(chunk_count(1, 8192), 1);
        assert_eq!(chunk_count(8192, 8192), 1);
        assert_eq!(chunk_count(8193, 8192), 2);
        assert_eq!(chunk_count(20_000, 8192), 3);
    }

    #[test]
    fn test_guess_mime_type() {
        assert_eq!(guess_mime_type(Path::new("a.pdf"), FileKind::File), "application/pdf");
        assert_eq!(guess_mime_type(Path::new("noext"), FileKind::File), DEFAULT_MIME_TYPE);
        assert_eq!(guess_mime_type(Path::new("p.png"), FileKind::Image), "image/png");
        assert_eq!(guess_mime_type(Path::new("IMG_0001"), FileKind::Image), DEFAULT_IMAGE_MIME_TYPE);
    }

    #[tokio::test]
    async fn test_file_source_reads_metadata_and_bytes() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let path = temp_dir.path().join("notes.txt");
        std::fs::write(&path, b"hello world").unwrap();

        let source = FileSource::file(&path).expect("source");
        assert_eq!(source.name, "notes.txt");
        assert_eq!(source.size, 11);
        assert_eq!(source.mime_type, "text/plain");
        assert_eq!(source.kind, FileKind::File);
        assert_eq!(source.read_bytes().await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_file_source_missing_file() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let path = temp_dir.path().join("gone.bin");

        assert!(matches!(FileSource::file(&path), Err(Error::FileNotFound(_))));

        std::fs::write(&path, b"x").unwrap();
        let source = FileSource::image(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(source.read_bytes().await, Err(Error::FileNotFound(_))));
    }

    #[test]
    fn test_file_source_rejects_directory() {
        let temp_dir = TempDir::new().expect("create temp dir");
        assert!(matches!(
            FileSource::file(temp_dir.path()),
            Err(Error::InvalidPath(_))
        ));
    }

    #[test]
    fn test_directory_sink_writes_and_avoids_collisions() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let sink = DirectorySink::new(temp_dir.path().join("inbox"));

        let first = sink.persist(&record("a.txt"), b"one").unwrap();
        let second = sink.persist(&record("a.txt"), b"two").unwrap();
        let third = sink.persist(&record("a.txt"), b"three").unwrap();

        assert_eq!(first.file_name().unwrap(), "a.txt");
        assert_eq!(second.file_name().unwrap(), "a (1).txt");
        assert_eq!(third.file_name().unwrap(), "a (2).txt");
        assert_eq!(std::fs::read(&first).unwrap(), b"one");
        assert_eq!(std::fs::read(&second).unwrap(), b"two");
    }

    #[test]
    fn test_directory_sink_strips_traversal() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let sink = DirectorySink::new(temp_dir.path());

        let path = sink.persist(&record("../../etc/passwd"), b"x").unwrap();
        assert_eq!(path, temp_dir.path().join("passwd"));

        let path = sink.persist(&record("..\\..\\evil.exe"), b"x").unwrap();
        assert_eq!(path, temp_dir.path().join("evil.exe"));

        let path = sink.persist(&record(".."), b"x").unwrap();
        assert!(path.starts_with(temp_dir.path()));
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("received-"));
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_write_removes_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.bin");
        File::create(&path).unwrap();

        // A read-only handle makes the write fail after the file exists
        let mut file = OpenOptions::new().read(true).open(&path).unwrap();
        assert!(fill_new_file(&mut file, &path, b"payload").is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_sanitize_path() {
        let base = Path::new("/home/user/downloads");
        assert_eq!(
            sanitize_path(base, Path::new("file.txt")),
            Some(PathBuf::from("/home/user/downloads/file.txt"))
        );
        assert_eq!(sanitize_path(base, Path::new("../../../etc/passwd")), None);
        assert_eq!(sanitize_path(base, Path::new("/etc/passwd")), None);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(1024 * 1024), "1.0 MB");
        assert_eq!(format_size(1024 * 1024 * 1024), "1.0 GB");
    }
}
