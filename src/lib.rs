//! A bucketed, file-system-backed cache store: a persistent backing tier for
//! an in-memory cache that maps opaque keys to opaque values, grouping
//! entries by a hash-derived bucket id and persisting each bucket as a single
//! file under a per-cache directory.
//!
//! [`store::BucketFileStore`] is the entry point. It is generic over
//! [`io::Filesystem`] so tests (and, in principle, alternate backing stores)
//! can swap out real disk I/O; [`io::ProductionFilesystem`] is the default
//! used outside tests.

pub mod bucket;
pub mod config;
pub mod error;
pub mod filesync;
pub mod io;
pub mod marshal;
pub mod store;
pub mod stream_io;
pub mod usage;

pub use bucket::{Bucket, BucketEntry, Key};
pub use config::{FsyncMode, PurgeExecution, StoreConfig};
pub use error::{ConfigurationError, LoaderIoError, MarshalError, StoreError};
pub use filesync::{Buffered, FileSync, FileSyncBackend, PerWrite, Periodic};
pub use io::{Filesystem, ProductionFilesystem};
pub use marshal::Marshaller;
pub use store::{BucketFileStore, LoopControl};
pub use usage::{StoreUsage, UsageSnapshot};
