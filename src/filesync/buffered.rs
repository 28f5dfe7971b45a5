//! `Buffered` (spec §4.1.b): keeps a table of open channels so that repeated
//! writes to the same bucket file don't pay the cost of opening and closing
//! a handle on every call. Durability is only guaranteed after an explicit
//! `flush`, a periodic tick (see [`super::Periodic`], which wraps this), or
//! `stop`.

use std::{io::SeekFrom, path::Path, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use snafu::ResultExt;
use tokio::{
    io::{AsyncSeekExt, AsyncWriteExt},
    sync::Mutex as AsyncMutex,
};

use super::FileSync;
use crate::{
    error::{IoSnafu, LoaderIoError},
    io::Filesystem,
};

/// The open-channel table (spec §3 "Open channel table"): at most one live
/// handle per path, held behind an `Arc` so the loser of an open race can be
/// dropped (and thus closed) independently of whoever currently holds the
/// table's reference.
pub(super) type ChannelTable<FS> = DashMap<PathBuf, Arc<AsyncMutex<<FS as Filesystem>::File>>>;

pub struct Buffered<FS: Filesystem> {
    fs: FS,
    pub(super) channels: Arc<ChannelTable<FS>>,
}

impl<FS: Filesystem> Clone for Buffered<FS> {
    fn clone(&self) -> Self {
        Self {
            fs: self.fs.clone(),
            channels: Arc::clone(&self.channels),
        }
    }
}

impl<FS: Filesystem> Buffered<FS> {
    pub fn new(fs: FS) -> Self {
        Self {
            fs,
            channels: Arc::new(DashMap::new()),
        }
    }

    /// Returns the number of channels currently held open. Exposed for
    /// tests asserting the "at most one channel per path" invariant (spec
    /// §8, invariant 3).
    #[cfg(test)]
    pub(super) fn open_channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Gives [`super::periodic::Periodic`]'s background ticker access to the
    /// same filesystem handle used for ordinary writes.
    pub(super) fn fs_ref(&self) -> &FS {
        &self.fs
    }

    /// Obtains the channel for `path`, opening (or re-opening, if the file
    /// was deleted out from under a cached channel) as needed.
    ///
    /// Two distinct races are handled here, per spec §5:
    /// - First-ever open of `path`: insert-if-absent: if another writer won
    ///   the race to insert first, our freshly opened handle is dropped
    ///   (closed) and we use the winner's.
    /// - Re-open after external deletion: atomic replace: our freshly
    ///   opened handle always becomes the table's new entry, and whatever
    ///   was there before is closed.
    pub(super) async fn channel_for(
        &self,
        path: &Path,
    ) -> Result<Arc<AsyncMutex<FS::File>>, LoaderIoError> {
        let existing = self.channels.get(path).map(|entry| Arc::clone(entry.value()));

        if let Some(channel) = &existing {
            if self.fs.exists(path).await {
                return Ok(Arc::clone(channel));
            }
        }

        let file = self
            .fs
            .open_read_write(path)
            .await
            .context(IoSnafu { path: path.to_path_buf() })?;
        let candidate = Arc::new(AsyncMutex::new(file));

        let winner = match existing {
            // The file existed in the table already but was missing on
            // disk: this is the external-deletion-recreate race. Always
            // install our freshly opened handle.
            Some(_) => {
                self.channels
                    .insert(path.to_path_buf(), Arc::clone(&candidate));
                candidate
            }
            // No entry existed when we started: this is the first-open
            // race. Insert-if-absent; if we lost, drop our candidate.
            None => match self.channels.entry(path.to_path_buf()) {
                Entry::Occupied(occupied) => Arc::clone(occupied.get()),
                Entry::Vacant(vacant) => {
                    vacant.insert(Arc::clone(&candidate));
                    candidate
                }
            },
        };

        Ok(winner)
    }
}

#[async_trait]
impl<FS: Filesystem> FileSync for Buffered<FS> {
    #[tracing::instrument(skip(self, bytes), level = "trace")]
    async fn write(&self, file: &Path, bytes: &[u8]) -> Result<(), LoaderIoError> {
        if bytes.is_empty() {
            // The uniform FileSync contract (spec §4.1) requires empty
            // writes to remove the file if present; the bucket store itself
            // never calls `write` with empty bytes (an empty bucket is
            // simply not written, spec §4.2), but the contract is upheld
            // here regardless of caller.
            self.channels.remove(file);
            return self
                .fs
                .remove_file(file)
                .await
                .context(IoSnafu { path: file.to_path_buf() });
        }

        let channel = self.channel_for(file).await?;
        let mut handle = channel.lock().await;
        handle
            .seek(SeekFrom::Start(0))
            .await
            .context(IoSnafu { path: file.to_path_buf() })?;
        handle
            .write_all(bytes)
            .await
            .context(IoSnafu { path: file.to_path_buf() })?;
        self.fs
            .set_len(&*handle, bytes.len() as u64)
            .await
            .context(IoSnafu { path: file.to_path_buf() })?;
        Ok(())
    }

    /// Forces the channel for `file`, if one is cached (spec §4.1.b:
    /// "metadata flush not required").
    async fn flush(&self, file: &Path) -> Result<(), LoaderIoError> {
        if let Some(entry) = self.channels.get(file) {
            let handle = entry.value().lock().await;
            self.fs
                .sync_all(&*handle)
                .await
                .context(IoSnafu { path: file.to_path_buf() })?;
        }
        Ok(())
    }

    /// Truncates to zero length and resets position, preserving the cached
    /// channel rather than deleting (spec §4.1.b's central subtlety: a
    /// delete under an open handle would leave the file looking present via
    /// the channel while actually unlinked).
    async fn purge(&self, file: &Path) -> Result<(), LoaderIoError> {
        if let Some(entry) = self.channels.get(file) {
            let mut handle = entry.value().lock().await;
            self.fs
                .set_len(&*handle, 0)
                .await
                .context(IoSnafu { path: file.to_path_buf() })?;
            handle
                .seek(SeekFrom::Start(0))
                .await
                .context(IoSnafu { path: file.to_path_buf() })?;
        } else {
            // No cached channel: nothing has an open handle to this file
            // that truncating-in-place would need to preserve, so a plain
            // delete is equally safe and avoids creating a channel purely
            // to immediately zero it.
            self.fs
                .remove_file(file)
                .await
                .context(IoSnafu { path: file.to_path_buf() })?;
        }
        Ok(())
    }

    /// Iterates all channels, forces with metadata, closes, and empties the
    /// table (spec §4.1.b).
    async fn stop(&self) {
        for entry in self.channels.iter() {
            let handle = entry.value().lock().await;
            if let Err(error) = self.fs.sync_all(&*handle).await {
                tracing::warn!(path = ?entry.key(), %error, "failed to flush channel during stop");
            }
        }
        self.channels.clear();
    }
}

#[cfg(test)]
mod tests {
    use temp_dir::TempDir;

    use super::*;
    use crate::io::ProductionFilesystem;

    #[tokio::test]
    async fn write_then_flush_is_durable_and_readable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("3");
        let sync = Buffered::new(ProductionFilesystem);

        sync.write(&path, b"v1").await.unwrap();
        sync.flush(&path).await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"v1");
    }

    #[tokio::test]
    async fn rewrite_after_purge_overwrites_cleanly() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("3");
        let sync = Buffered::new(ProductionFilesystem);

        sync.write(&path, b"value-one").await.unwrap();
        sync.purge(&path).await.unwrap();
        sync.write(&path, b"v2").await.unwrap();
        sync.flush(&path).await.unwrap();

        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"v2");
        assert_eq!(sync.open_channel_count(), 1);
    }

    #[tokio::test]
    async fn external_deletion_triggers_silent_recreate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("3");
        let sync = Buffered::new(ProductionFilesystem);

        sync.write(&path, b"k=v").await.unwrap();
        tokio::fs::remove_file(&path).await.unwrap();

        sync.write(&path, b"k=v2").await.unwrap();
        sync.flush(&path).await.unwrap();

        assert!(tokio::fs::metadata(&path).await.is_ok());
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"k=v2");
    }

    #[tokio::test]
    async fn purge_without_cached_channel_deletes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("3");
        tokio::fs::write(&path, b"stale").await.unwrap();
        let sync = Buffered::new(ProductionFilesystem);

        sync.purge(&path).await.unwrap();
        assert!(tokio::fs::metadata(&path).await.is_err());
    }
}
