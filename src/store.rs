//! The bucket file store (spec §4.2 "Bucket store operations", §4.4
//! "Lifecycle"). This is the crate's main entry point: it owns the root
//! directory, the selected [`FileSyncBackend`], the per-bucket write lock
//! table, and the channel/flush-error tables nested inside that backend.

use std::{path::Path, path::PathBuf, sync::Arc};

use dashmap::DashMap;
use snafu::ResultExt;
use tokio::{io::AsyncReadExt, sync::RwLock as AsyncRwLock};
use tokio_util::sync::CancellationToken;

use crate::{
    bucket::Bucket,
    config::{PurgeExecution, StoreConfig},
    error::{CreateRootSnafu, IoSnafu, LoaderIoError, ListRootSnafu, RootMissingAfterCreateSnafu, StoreError},
    filesync::{FileSync, FileSyncBackend},
    io::{Filesystem, ProductionFilesystem},
    marshal::{marshal_bucket, unmarshal_bucket, Marshaller},
    usage::{StoreUsage, UsageSnapshot},
};

/// What a [`loop_over_buckets`](BucketFileStore::loop_over_buckets) handler
/// returns to indicate whether the scan should continue (spec §4.2:
/// "`handler` returns \"stop\" to terminate early").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Stop,
}

/// A bucketed, file-system-backed cache store (spec §1–§6).
pub struct BucketFileStore<FS: Filesystem = ProductionFilesystem> {
    root: PathBuf,
    fs: FS,
    file_sync: Arc<FileSyncBackend<FS>>,
    locks: Arc<DashMap<String, Arc<AsyncRwLock<()>>>>,
    config: StoreConfig,
    usage: Arc<StoreUsage>,
}

impl<FS: Filesystem> Clone for BucketFileStore<FS> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            fs: self.fs.clone(),
            file_sync: Arc::clone(&self.file_sync),
            locks: Arc::clone(&self.locks),
            config: self.config.clone(),
            usage: Arc::clone(&self.usage),
        }
    }
}

impl<FS: Filesystem> BucketFileStore<FS> {
    /// Resolves the root directory, creates it, and selects the configured
    /// `FileSync` backend (spec §4.4).
    pub async fn start(config: StoreConfig, fs: FS) -> Result<Self, StoreError> {
        config.validate().map_err(StoreError::from)?;

        let root = config.resolve_root();
        fs.create_dir_all(&root)
            .await
            .context(CreateRootSnafu { path: root.clone() })
            .map_err(StoreError::from)?;

        if !fs.exists(&root).await {
            return Err(StoreError::from(
                RootMissingAfterCreateSnafu { path: root.clone() }.build(),
            ));
        }

        let file_sync = Arc::new(FileSyncBackend::from_mode(config.fsync_mode, fs.clone()));

        Ok(Self {
            root,
            fs,
            file_sync,
            locks: Arc::new(DashMap::new()),
            config,
            usage: Arc::new(StoreUsage::default()),
        })
    }

    /// Delegates to the selected `FileSync`'s `stop` (spec §4.4: "never
    /// skipped even on prior errors"). The super-store's own stop is the
    /// external `BucketBasedCacheStore` skeleton's responsibility, out of
    /// scope here.
    pub async fn stop(&self) {
        self.file_sync.stop().await;
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn usage(&self) -> UsageSnapshot {
        self.usage.snapshot()
    }

    pub fn supports_multi_threaded_purge(&self) -> bool {
        true
    }

    /// Exports every bucket file under the root in the wire format spec §4.3
    /// `toStream` describes.
    pub async fn to_stream<W: tokio::io::AsyncWrite + Unpin + Send>(
        &self,
        output: &mut W,
    ) -> Result<(), StoreError> {
        crate::stream_io::to_stream(&self.fs, &self.root, self.config.stream_buffer_size.get(), output)
            .await
            .map_err(StoreError::from)
    }

    /// Imports bucket files from the wire format spec §4.3 `fromStream`
    /// describes, writing them under the root.
    pub async fn from_stream<R: tokio::io::AsyncRead + Unpin + Send>(
        &self,
        input: &mut R,
    ) -> Result<(), StoreError> {
        crate::stream_io::from_stream(&self.fs, &self.root, self.config.stream_buffer_size.get(), input)
            .await
            .map_err(StoreError::from)
    }

    fn bucket_path(&self, bucket_id: &str) -> PathBuf {
        self.root.join(bucket_id)
    }

    async fn lock_bucket(&self, bucket_id: &str) -> tokio::sync::OwnedRwLockWriteGuard<()> {
        let lock = {
            let entry = self
                .locks
                .entry(bucket_id.to_string())
                .or_insert_with(|| Arc::new(AsyncRwLock::new(())));
            Arc::clone(entry.value())
        };
        lock.write_owned().await
    }

    /// Persists `bucket` (spec §4.2 `updateBucket`).
    ///
    /// If a file already exists at the bucket's path, it is purged first
    /// (failures logged, non-fatal: the write below overwrites regardless).
    /// An empty bucket is never written as a non-empty file; `write` is
    /// still invoked with an empty payload so that every `FileSync` backend
    /// applies its own empty-payload contract (spec §4.1: "Empty bytes must
    /// cause the file to be removed if present").
    ///
    /// `cancel` is checked once the per-bucket lock is held and again right
    /// before marshalling: a cancellation observed there aborts the update
    /// entirely rather than proceeding to write with a stale or partial
    /// byte buffer (spec §9 open question on the source's interruption
    /// handling during marshalling).
    #[tracing::instrument(skip(self, marshaller, bucket, cancel), fields(bucket_id = %bucket.bucket_id), level = "trace")]
    pub async fn update_bucket<M: Marshaller>(
        &self,
        marshaller: &M,
        bucket: Bucket,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        let path = self.bucket_path(&bucket.bucket_id);
        let _guard = self.lock_bucket(&bucket.bucket_id).await;

        if cancel.is_cancelled() {
            tracing::debug!(bucket_id = %bucket.bucket_id, "update_bucket cancelled before starting");
            return Ok(());
        }

        if self.fs.exists(&path).await {
            if let Err(error) = self.file_sync.purge(&path).await {
                tracing::warn!(
                    bucket_id = %bucket.bucket_id,
                    %error,
                    "failed to purge existing bucket file before update; the write below will overwrite it regardless"
                );
            }
        }

        if bucket.is_empty() {
            self.file_sync.write(&path, &[]).await.map_err(StoreError::from)?;
            self.usage.record_bucket_removed(0);
            return Ok(());
        }

        if cancel.is_cancelled() {
            tracing::debug!(bucket_id = %bucket.bucket_id, "update_bucket cancelled before marshalling");
            return Ok(());
        }

        let bytes = marshal_bucket(marshaller, &bucket).map_err(LoaderIoError::from)?;
        self.file_sync
            .write(&path, &bytes)
            .await
            .map_err(StoreError::from)?;
        self.usage.record_bucket_created();
        self.usage.record_bucket_written(bytes.len() as i64);
        Ok(())
    }

    /// Loads the bucket for `bucket_id` (spec §4.2 `loadBucket(hash)`).
    ///
    /// Cancellation is a soft signal (spec §4.2, §7): if `cancel` is already
    /// triggered, this returns `Ok(None)` rather than propagating an error.
    pub async fn load_bucket<M: Marshaller>(
        &self,
        bucket_id: &str,
        marshaller: &M,
        cancel: &CancellationToken,
    ) -> Result<Option<Bucket>, StoreError> {
        let path = self.bucket_path(bucket_id);
        self.load_bucket_file(&path, marshaller, cancel).await
    }

    /// Loads the bucket at `path` directly (spec §4.2 `loadBucket(file)`).
    ///
    /// A missing file or a zero-length file are both "no bucket" (spec §3,
    /// §4.2 edge case 1) — neither is an error.
    #[tracing::instrument(skip(self, marshaller, cancel), level = "trace")]
    pub async fn load_bucket_file<M: Marshaller>(
        &self,
        path: &Path,
        marshaller: &M,
        cancel: &CancellationToken,
    ) -> Result<Option<Bucket>, StoreError> {
        if cancel.is_cancelled() {
            tracing::debug!(?path, "load_bucket_file cancelled before starting");
            return Ok(None);
        }

        if !self.fs.exists(path).await {
            return Ok(None);
        }

        // The file may have unflushed buffered bytes (Buffered/Periodic).
        self.file_sync.flush(path).await.map_err(StoreError::from)?;

        let len = self
            .fs
            .len(path)
            .await
            .context(IoSnafu { path: path.to_path_buf() })
            .map_err(StoreError::from)?;
        if len == 0 {
            return Ok(None);
        }

        if cancel.is_cancelled() {
            tracing::debug!(?path, "load_bucket_file cancelled before read");
            return Ok(None);
        }

        let mut handle = self
            .fs
            .open_read(path)
            .await
            .context(IoSnafu { path: path.to_path_buf() })
            .map_err(StoreError::from)?;

        // `available()`-sized hint per spec §9: seed with the known length,
        // but keep reading to EOF rather than trusting it as exact.
        let mut buffer = Vec::with_capacity(len as usize);
        handle
            .read_to_end(&mut buffer)
            .await
            .context(IoSnafu { path: path.to_path_buf() })
            .map_err(StoreError::from)?;

        let mut bucket = unmarshal_bucket(marshaller, &buffer)
            .map_err(LoaderIoError::from)
            .map_err(StoreError::from)?;
        bucket.bucket_id = bucket_id_from_path(path);
        Ok(Some(bucket))
    }

    /// Deletes every file under the root (spec §4.2 `clear`). A missing
    /// root is a no-op; per-file delete failures are logged and the sweep
    /// continues.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let Some(names) = self
            .fs
            .list_dir(&self.root)
            .await
            .context(ListRootSnafu { path: self.root.clone() })
            .map_err(StoreError::from)?
        else {
            return Ok(());
        };

        for name in names {
            let path = self.root.join(&name);
            if let Err(error) = self.fs.remove_file(&path).await {
                tracing::warn!(?path, %error, "failed to delete bucket file during clear; continuing sweep");
            }
        }
        Ok(())
    }

    /// Enumerates the root and invokes `handler` with each loaded bucket
    /// (spec §4.2 `loopOverBuckets`). Cancellation halts the loop and
    /// returns `Ok(())` without visiting remaining files.
    pub async fn loop_over_buckets<M: Marshaller>(
        &self,
        marshaller: &M,
        cancel: &CancellationToken,
        mut handler: impl FnMut(Bucket) -> LoopControl,
    ) -> Result<(), StoreError> {
        let Some(names) = self
            .fs
            .list_dir(&self.root)
            .await
            .context(ListRootSnafu { path: self.root.clone() })
            .map_err(StoreError::from)?
        else {
            return Ok(());
        };

        for name in names {
            if cancel.is_cancelled() {
                tracing::debug!("loop_over_buckets cancelled");
                return Ok(());
            }

            let path = self.root.join(&name);
            match self.load_bucket_file(&path, marshaller, cancel).await {
                Ok(Some(bucket)) => {
                    if handler(bucket) == LoopControl::Stop {
                        break;
                    }
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(?path, %error, "failed to load bucket during loop_over_buckets; continuing");
                }
            }
        }
        Ok(())
    }

    /// Removes expired entries from every bucket (spec §4.2
    /// `purgeExpired`), either inline or on separately spawned tasks
    /// depending on [`PurgeExecution`] (spec §6 `multiThreadedPurge`).
    pub async fn purge_expired<M: Marshaller + 'static>(
        &self,
        marshaller: Arc<M>,
        now_millis: i64,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError>
    where
        FS: 'static,
    {
        let Some(names) = self
            .fs
            .list_dir(&self.root)
            .await
            .context(ListRootSnafu { path: self.root.clone() })
            .map_err(StoreError::from)?
        else {
            return Ok(());
        };

        match self.config.purge_execution {
            PurgeExecution::Sequential => {
                for name in names {
                    if cancel.is_cancelled() {
                        tracing::debug!("purge_expired cancelled");
                        return Ok(());
                    }
                    self.purge_one_bucket(&name, marshaller.as_ref(), now_millis, cancel).await;
                }
            }
            PurgeExecution::MultiThreaded => {
                let mut tasks = Vec::with_capacity(names.len());
                for name in names {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let store = self.clone();
                    let marshaller = Arc::clone(&marshaller);
                    let cancel = cancel.clone();
                    tasks.push(tokio::spawn(async move {
                        store.purge_one_bucket(&name, marshaller.as_ref(), now_millis, &cancel).await;
                    }));
                }
                for task in tasks {
                    if let Err(error) = task.await {
                        tracing::warn!(%error, "purge_expired worker task panicked");
                    }
                }
            }
        }
        Ok(())
    }

    async fn purge_one_bucket<M: Marshaller>(
        &self,
        name: &str,
        marshaller: &M,
        now_millis: i64,
        cancel: &CancellationToken,
    ) {
        if Bucket::parse_bucket_id(name).is_none() {
            // Spec §4.2 edge case 2: a bucket-id parse failure aborts only
            // this file's purge; other files continue.
            tracing::warn!(name, "skipping purge_expired for non-numeric bucket file name");
            return;
        }

        let path = self.root.join(name);
        let bucket = match self.load_bucket_file(&path, marshaller, cancel).await {
            Ok(Some(bucket)) => bucket,
            Ok(None) => return,
            Err(error) => {
                tracing::warn!(?path, %error, "failed to load bucket during purge_expired");
                return;
            }
        };

        let mut bucket = bucket;
        let removed = bucket.purge_expired_entries(now_millis);
        if removed == 0 {
            return;
        }

        if let Err(error) = self.update_bucket(marshaller, bucket, cancel).await {
            tracing::warn!(?path, %error, "failed to persist bucket after purge_expired");
        }
    }
}

fn bucket_id_from_path(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default()
        .to_string()
}
