//! `PerWrite` (spec §4.1.a): each write opens the file fresh, writes all
//! bytes, flushes, and closes. No durability state is retained between
//! calls, so this is the simplest of the three backends and the one spec §2
//! expects hosts to reach for under a low write-rate workload.

use std::path::Path;

use async_trait::async_trait;
use snafu::ResultExt;
use tokio::io::AsyncWriteExt;

use super::FileSync;
use crate::{
    error::{IoSnafu, LoaderIoError},
    io::Filesystem,
};

pub struct PerWrite<FS> {
    fs: FS,
}

impl<FS: Filesystem> PerWrite<FS> {
    pub fn new(fs: FS) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl<FS: Filesystem> FileSync for PerWrite<FS> {
    #[tracing::instrument(skip(self, bytes), level = "trace")]
    async fn write(&self, file: &Path, bytes: &[u8]) -> Result<(), LoaderIoError> {
        if bytes.is_empty() {
            return self
                .fs
                .remove_file(file)
                .await
                .context(IoSnafu { path: file.to_path_buf() });
        }

        let mut handle = self
            .fs
            .open_write_truncate(file)
            .await
            .context(IoSnafu { path: file.to_path_buf() })?;
        handle
            .write_all(bytes)
            .await
            .context(IoSnafu { path: file.to_path_buf() })?;
        handle.flush().await.context(IoSnafu { path: file.to_path_buf() })?;
        self.fs.sync_all(&handle).await.context(IoSnafu { path: file.to_path_buf() })?;
        // `handle` is dropped here, closing the file descriptor.
        Ok(())
    }

    /// No-op: `write` already flushed to the OS before returning (spec
    /// §4.1.a).
    async fn flush(&self, _file: &Path) -> Result<(), LoaderIoError> {
        Ok(())
    }

    async fn purge(&self, file: &Path) -> Result<(), LoaderIoError> {
        self.fs.remove_file(file).await.context(IoSnafu { path: file.to_path_buf() })
    }

    /// No-op: there is no retained state to quiesce (spec §4.1.a).
    async fn stop(&self) {}
}

#[cfg(test)]
mod tests {
    use temp_dir::TempDir;

    use super::*;
    use crate::io::ProductionFilesystem;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("7");
        let sync = PerWrite::new(ProductionFilesystem);

        sync.write(&path, b"hello").await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn empty_write_removes_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("7");
        let sync = PerWrite::new(ProductionFilesystem);

        sync.write(&path, b"hello").await.unwrap();
        sync.write(&path, b"").await.unwrap();

        assert!(tokio::fs::metadata(&path).await.is_err());
    }

    #[tokio::test]
    async fn empty_write_on_absent_file_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing");
        let sync = PerWrite::new(ProductionFilesystem);

        sync.write(&path, b"").await.unwrap();
    }
}
