//! Filesystem abstraction, grounded on the teacher's `disk_v2::io` module:
//! open/delete operations go through a small async trait so tests can swap
//! in an in-memory double instead of touching the real filesystem.

use std::{io, path::Path};

use async_trait::async_trait;
use tokio::fs::OpenOptions;

/// Generalized interface for opening and removing files.
#[async_trait]
pub trait Filesystem: Send + Sync + Clone + 'static {
    type File: tokio::io::AsyncRead + tokio::io::AsyncWrite + tokio::io::AsyncSeek + Send + Sync + Unpin;

    /// Opens a file for reading and writing, creating it if absent, without
    /// truncating existing contents. Used by `Buffered`/`Periodic` to obtain
    /// the channel-table handle (spec §4.1.b).
    async fn open_read_write(&self, path: &Path) -> io::Result<Self::File>;

    /// Opens a file for writing, truncating it if present, creating it if
    /// absent. Used by `PerWrite` (spec §4.1.a: "opens the file fresh").
    async fn open_write_truncate(&self, path: &Path) -> io::Result<Self::File>;

    /// Opens a file for reading only.
    async fn open_read(&self, path: &Path) -> io::Result<Self::File>;

    /// Removes a file. Not an error if the file does not exist.
    async fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Whether a file exists at `path`.
    async fn exists(&self, path: &Path) -> bool;

    /// Length of the file at `path` in bytes.
    async fn len(&self, path: &Path) -> io::Result<u64>;

    /// Lists file names directly under `dir`. Returns `Ok(None)` if `dir`
    /// does not exist (spec §4.3: "fail if listing yields null").
    async fn list_dir(&self, dir: &Path) -> io::Result<Option<Vec<String>>>;

    /// Creates `dir` and all missing parent directories.
    async fn create_dir_all(&self, dir: &Path) -> io::Result<()>;

    /// Forces a file's contents to stable storage (spec §4.1 `flush`).
    async fn sync_all(&self, file: &Self::File) -> io::Result<()>;

    /// Truncates a file to `len` bytes without closing it (spec §4.1.b
    /// Buffered `purge`: "truncates to length 0 ... rather than deleting").
    async fn set_len(&self, file: &Self::File, len: u64) -> io::Result<()>;
}

/// The real filesystem, backed by `tokio::fs`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProductionFilesystem;

#[async_trait]
impl Filesystem for ProductionFilesystem {
    type File = tokio::fs::File;

    async fn open_read_write(&self, path: &Path) -> io::Result<Self::File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .await
    }

    async fn open_write_truncate(&self, path: &Path) -> io::Result<Self::File> {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .await
    }

    async fn open_read(&self, path: &Path) -> io::Result<Self::File> {
        OpenOptions::new().read(true).open(path).await
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path).await.is_ok()
    }

    async fn len(&self, path: &Path) -> io::Result<u64> {
        Ok(tokio::fs::metadata(path).await?.len())
    }

    async fn list_dir(&self, dir: &Path) -> io::Result<Option<Vec<String>>> {
        let mut read_dir = match tokio::fs::read_dir(dir).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let mut names = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            if entry.file_type().await?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        Ok(Some(names))
    }

    async fn create_dir_all(&self, dir: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(dir).await
    }

    async fn sync_all(&self, file: &Self::File) -> io::Result<()> {
        file.sync_all().await
    }

    async fn set_len(&self, file: &Self::File, len: u64) -> io::Result<()> {
        file.set_len(len).await
    }
}
