//! Error types for the bucket file store.
//!
//! Mirrors the teacher crate's convention of one `#[derive(Snafu)]` enum per
//! fallible component, with a top-level enum aggregating them for the store's
//! public API. Cancellation is deliberately *not* a variant here: per spec
//! §7/§9 it is a soft signal observed via [`crate::cancel::Cancelled`] and
//! returned as an early/empty result, never as an error.

use std::{io, path::PathBuf};

use snafu::Snafu;

/// Error raised by [`crate::store::BucketFileStore::start`] when the
/// configured root directory cannot be created or does not end up existing.
#[derive(Debug, Snafu)]
pub enum ConfigurationError {
    #[snafu(display("failed to create cache root directory {:?}: {}", path, source))]
    CreateRoot { path: PathBuf, source: io::Error },

    #[snafu(display(
        "cache root directory {:?} does not exist after creation was attempted",
        path
    ))]
    RootMissingAfterCreate { path: PathBuf },

    #[snafu(display("fsync_mode is periodic but fsync_interval is zero"))]
    InvalidFsyncInterval,
}

/// Error raised by the injected [`crate::marshal::Marshaller`] bridge.
///
/// Kept distinct from [`LoaderIoError`] so that callers can tell a corrupt or
/// unreadable bucket payload apart from an I/O failure on the underlying
/// file, exactly as spec §7 distinguishes `LoaderIOError` from marshalling
/// failures.
#[derive(Debug, Snafu)]
#[snafu(display("failed to {} bucket payload: {}", operation, source))]
pub struct MarshalError {
    pub operation: &'static str,
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

/// Error raised by any I/O-bound operation: read, write, list, or stream
/// transfer. Wraps the underlying cause the way the teacher's `WriterError`
/// wraps `io::Error` via an `Io { source }` variant.
#[derive(Debug, Snafu)]
pub enum LoaderIoError {
    #[snafu(display("I/O error on {:?}: {}", path, source))]
    Io { path: PathBuf, source: io::Error },

    #[snafu(display("failed to list cache root {:?}: {}", path, source))]
    ListRoot { path: PathBuf, source: io::Error },

    #[snafu(display("bucket id {:?} is not a valid decimal integer", raw))]
    InvalidBucketId { raw: String },

    #[snafu(display("{}", source))]
    Marshal { source: MarshalError },

    #[snafu(display(
        "deferred flush error on {:?}: background force failed earlier: {}",
        path,
        message
    ))]
    DeferredFlush { path: PathBuf, message: String },
}

impl From<MarshalError> for LoaderIoError {
    fn from(source: MarshalError) -> Self {
        LoaderIoError::Marshal { source }
    }
}

/// Aggregate error type returned by [`crate::store::BucketFileStore`]'s
/// public, directly-propagating operations (`update_bucket`, `load_bucket`,
/// `to_stream`, `from_stream`). Sweep operations (`clear`, `purge_expired`,
/// `loop_over_buckets`) do not return per-file errors of this type — those
/// are logged and the sweep continues, per spec §7's propagation policy.
#[derive(Debug, Snafu)]
pub enum StoreError {
    #[snafu(display("{}", source))]
    Configuration { source: ConfigurationError },

    #[snafu(display("{}", source))]
    Io { source: LoaderIoError },
}

impl From<ConfigurationError> for StoreError {
    fn from(source: ConfigurationError) -> Self {
        StoreError::Configuration { source }
    }
}

impl From<LoaderIoError> for StoreError {
    fn from(source: LoaderIoError) -> Self {
        StoreError::Io { source }
    }
}

impl From<io::Error> for LoaderIoError {
    fn from(source: io::Error) -> Self {
        LoaderIoError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}
