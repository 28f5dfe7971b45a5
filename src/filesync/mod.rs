//! The `FileSync` contract (spec §4.1) and its three concrete strategies.
//!
//! Modeled, per spec §9's design note, "as a sum type with a uniform
//! operation set" rather than an inheritance hierarchy; `FileSyncBackend` is
//! the sum type, and it dispatches to whichever of [`PerWrite`],
//! [`Buffered`], or [`Periodic`] the store was configured with.

mod buffered;
mod periodic;
mod per_write;

pub use buffered::Buffered;
pub use periodic::Periodic;
pub use per_write::PerWrite;

use std::path::Path;

use async_trait::async_trait;

use crate::{
    config::FsyncMode,
    error::LoaderIoError,
    io::{Filesystem, ProductionFilesystem},
};

/// A uniform durability strategy (spec §4.1).
///
/// Callers of `write`/`purge` have already acquired the per-bucket write
/// lock (spec §4.1: "Callers have already acquired the per-bucket write
/// lock"); `flush` callers have verified the file exists.
#[async_trait]
pub trait FileSync: Send + Sync {
    /// Persists `bytes` as the new full content of `file`. Empty `bytes`
    /// removes the file if present (spec §4.1).
    async fn write(&self, file: &Path, bytes: &[u8]) -> Result<(), LoaderIoError>;

    /// Forces previously written bytes for `file` to stable storage.
    async fn flush(&self, file: &Path) -> Result<(), LoaderIoError>;

    /// Clears `file` (delete or zero-length truncate, strategy-dependent).
    async fn purge(&self, file: &Path) -> Result<(), LoaderIoError>;

    /// Quiesces the strategy: forces cached writes, releases owned handles,
    /// stops background work. Idempotent.
    async fn stop(&self);
}

/// The concrete backend selected by [`FsyncMode`] (spec §4.4: "Select the
/// FileSync back-end from the configured fsync mode").
pub enum FileSyncBackend<FS: Filesystem = ProductionFilesystem> {
    PerWrite(PerWrite<FS>),
    Buffered(Buffered<FS>),
    Periodic(Periodic<FS>),
}

impl<FS: Filesystem> FileSyncBackend<FS> {
    pub fn from_mode(mode: FsyncMode, fs: FS) -> Self {
        match mode {
            FsyncMode::PerWrite => FileSyncBackend::PerWrite(PerWrite::new(fs)),
            FsyncMode::Default => FileSyncBackend::Buffered(Buffered::new(fs)),
            FsyncMode::Periodic { interval } => {
                FileSyncBackend::Periodic(Periodic::new(fs, interval))
            }
        }
    }
}

#[async_trait]
impl<FS: Filesystem> FileSync for FileSyncBackend<FS> {
    async fn write(&self, file: &Path, bytes: &[u8]) -> Result<(), LoaderIoError> {
        match self {
            FileSyncBackend::PerWrite(inner) => inner.write(file, bytes).await,
            FileSyncBackend::Buffered(inner) => inner.write(file, bytes).await,
            FileSyncBackend::Periodic(inner) => inner.write(file, bytes).await,
        }
    }

    async fn flush(&self, file: &Path) -> Result<(), LoaderIoError> {
        match self {
            FileSyncBackend::PerWrite(inner) => inner.flush(file).await,
            FileSyncBackend::Buffered(inner) => inner.flush(file).await,
            FileSyncBackend::Periodic(inner) => inner.flush(file).await,
        }
    }

    async fn purge(&self, file: &Path) -> Result<(), LoaderIoError> {
        match self {
            FileSyncBackend::PerWrite(inner) => inner.purge(file).await,
            FileSyncBackend::Buffered(inner) => inner.purge(file).await,
            FileSyncBackend::Periodic(inner) => inner.purge(file).await,
        }
    }

    async fn stop(&self) {
        match self {
            FileSyncBackend::PerWrite(inner) => inner.stop().await,
            FileSyncBackend::Buffered(inner) => inner.stop().await,
            FileSyncBackend::Periodic(inner) => inner.stop().await,
        }
    }
}
