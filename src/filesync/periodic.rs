//! `Periodic` (spec §4.1.c): wraps [`Buffered`] with a background task that
//! forces every open channel on a fixed interval, surfacing any force
//! failure to the next writer on that path rather than swallowing it.

use std::{path::Path, path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{buffered::Buffered, FileSync};
use crate::{error::LoaderIoError, io::Filesystem};

/// The flush-error table (spec §3 "Flush-error table"): the first I/O error
/// the background flusher observed on a path since the last successful
/// write. A present entry fails the next write on that path; the entry is
/// cleared whether that write succeeds or fails (spec §3 invariant).
type FlushErrorTable = DashMap<PathBuf, String>;

pub struct Periodic<FS: Filesystem> {
    buffered: Buffered<FS>,
    flush_errors: Arc<FlushErrorTable>,
    shutdown: CancellationToken,
    ticker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<FS: Filesystem> Periodic<FS> {
    pub fn new(fs: FS, interval: Duration) -> Self {
        let buffered = Buffered::new(fs);
        let flush_errors: Arc<FlushErrorTable> = Arc::new(DashMap::new());
        let shutdown = CancellationToken::new();

        let ticker = spawn_ticker(buffered.clone(), Arc::clone(&flush_errors), interval, shutdown.clone());

        Self {
            buffered,
            flush_errors,
            shutdown,
            ticker: std::sync::Mutex::new(Some(ticker)),
        }
    }

    /// Exposed for tests that want to inject a flush error without waiting
    /// for a real tick (spec §8, scenario 4).
    #[cfg(test)]
    pub(super) fn inject_flush_error(&self, path: &Path, message: impl Into<String>) {
        self.flush_errors.insert(path.to_path_buf(), message.into());
    }
}

/// Spawns the single background tick task. Kept as a free function (rather
/// than a method taking `&self`) so it does not need to hold any lock the
/// store's callers might also need, per spec §5: "it must not hold locks
/// that callers acquire".
fn spawn_ticker<FS: Filesystem>(
    buffered: Buffered<FS>,
    flush_errors: Arc<FlushErrorTable>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    force_all_channels(&buffered, &flush_errors).await;
                }
            }
        }
    })
}

async fn force_all_channels<FS: Filesystem>(buffered: &Buffered<FS>, flush_errors: &FlushErrorTable) {
    let paths: Vec<PathBuf> = buffered.channels.iter().map(|entry| entry.key().clone()).collect();
    for path in paths {
        let Some(channel) = buffered.channels.get(&path).map(|entry| Arc::clone(entry.value())) else {
            continue;
        };
        let handle = channel.lock().await;
        match buffered_sync(buffered, &handle).await {
            Ok(()) => {}
            Err(error) => {
                tracing::warn!(?path, %error, "periodic background force failed; deferring error to next writer");
                flush_errors.insert(path.clone(), error.to_string());
                drop(handle);
                buffered.channels.remove(&path);
            }
        }
    }
}

async fn buffered_sync<FS: Filesystem>(
    buffered: &Buffered<FS>,
    handle: &FS::File,
) -> std::io::Result<()> {
    buffered.fs_ref().sync_all(handle).await
}

#[async_trait]
impl<FS: Filesystem> FileSync for Periodic<FS> {
    #[tracing::instrument(skip(self, bytes), level = "trace")]
    async fn write(&self, file: &Path, bytes: &[u8]) -> Result<(), LoaderIoError> {
        if let Some((_, message)) = self.flush_errors.remove(file) {
            return Err(LoaderIoError::DeferredFlush {
                path: file.to_path_buf(),
                message,
            });
        }
        self.buffered.write(file, bytes).await
    }

    async fn flush(&self, file: &Path) -> Result<(), LoaderIoError> {
        self.buffered.flush(file).await
    }

    async fn purge(&self, file: &Path) -> Result<(), LoaderIoError> {
        self.buffered.purge(file).await
    }

    /// Shuts the scheduler down before delegating to `Buffered::stop` (spec
    /// §4.4: "never skipped even on prior errors").
    async fn stop(&self) {
        self.shutdown.cancel();
        let handle = self.ticker.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.buffered.stop().await;
    }
}

impl<FS: Filesystem> Drop for Periodic<FS> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
