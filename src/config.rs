//! Store configuration (spec §6 "Configuration knobs consumed").
//!
//! Follows the same shape as the teacher's `BufferType`: a tagged
//! configuration enum for the fsync backend, deserialized with a custom
//! `Visitor` so that a field invalid for the selected variant (e.g.
//! `fsync_interval` under `PerWrite`) is rejected at config-parse time rather
//! than silently ignored.

use std::{
    fmt,
    num::NonZeroUsize,
    time::Duration,
};

use serde::{de, Deserialize, Deserializer, Serialize};

use crate::error::ConfigurationError;

/// Default relative directory used when `location` is empty or whitespace
/// (spec §4.4, §3).
pub fn default_root_dir_name() -> &'static str {
    "FileCacheStore"
}

/// Default stream buffer size (spec §6), chosen in line with the teacher's
/// `DEFAULT_WRITE_BUFFER_SIZE` rationale: large enough to amortize syscalls,
/// small enough not to dominate memory for many concurrent transfers.
pub const DEFAULT_STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// Default periodic fsync interval (spec §6 `fsyncInterval`), chosen the same
/// way the teacher picks `DEFAULT_FLUSH_INTERVAL`: long enough to amortize
/// `fsync` cost, short enough to bound the data-loss window for non-critical
/// workloads.
pub const DEFAULT_FSYNC_INTERVAL: Duration = Duration::from_millis(500);

/// Which [`crate::filesync::FileSync`] backend to use (spec §6 `fsyncMode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FsyncMode {
    /// Alias for `Buffered`, the default (spec §6: "DEFAULT=Buffered").
    Default,
    PerWrite,
    Periodic { interval: Duration },
}

impl Default for FsyncMode {
    fn default() -> Self {
        FsyncMode::Default
    }
}

const ALL_FIELDS: [&str; 2] = ["mode", "fsync_interval"];

struct FsyncModeVisitor;

impl FsyncModeVisitor {
    fn visit_map_impl<'de, A>(mut map: A) -> Result<FsyncMode, A::Error>
    where
        A: de::MapAccess<'de>,
    {
        let mut mode: Option<String> = None;
        let mut interval_ms: Option<u64> = None;
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "mode" => {
                    if mode.is_some() {
                        return Err(de::Error::duplicate_field("mode"));
                    }
                    mode = Some(map.next_value()?);
                }
                "fsync_interval" => {
                    if interval_ms.is_some() {
                        return Err(de::Error::duplicate_field("fsync_interval"));
                    }
                    interval_ms = Some(map.next_value()?);
                }
                other => return Err(de::Error::unknown_field(other, &ALL_FIELDS)),
            }
        }
        let mode = mode.unwrap_or_else(|| "default".to_string());
        match mode.as_str() {
            "default" => {
                if interval_ms.is_some() {
                    return Err(de::Error::unknown_field("fsync_interval", &["mode"]));
                }
                Ok(FsyncMode::Default)
            }
            "per_write" => {
                if interval_ms.is_some() {
                    return Err(de::Error::unknown_field("fsync_interval", &["mode"]));
                }
                Ok(FsyncMode::PerWrite)
            }
            "periodic" => Ok(FsyncMode::Periodic {
                interval: Duration::from_millis(
                    interval_ms.unwrap_or(DEFAULT_FSYNC_INTERVAL.as_millis() as u64),
                ),
            }),
            other => Err(de::Error::unknown_variant(
                other,
                &["default", "per_write", "periodic"],
            )),
        }
    }
}

impl<'de> de::Visitor<'de> for FsyncModeVisitor {
    type Value = FsyncMode;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("enum FsyncMode")
    }

    fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
    where
        A: de::MapAccess<'de>,
    {
        Self::visit_map_impl(map)
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match value {
            "default" => Ok(FsyncMode::Default),
            "per_write" => Ok(FsyncMode::PerWrite),
            "periodic" => Ok(FsyncMode::Periodic {
                interval: DEFAULT_FSYNC_INTERVAL,
            }),
            other => Err(de::Error::unknown_variant(
                other,
                &["default", "per_write", "periodic"],
            )),
        }
    }
}

impl<'de> Deserialize<'de> for FsyncMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(FsyncModeVisitor)
    }
}

/// Whether multi-threaded purge is enabled, and, if so, a handle to the
/// executor that will run per-bucket purge tasks (spec §6
/// `multiThreadedPurge`, §2 "Purge scheduler integration").
#[derive(Clone)]
pub enum PurgeExecution {
    /// Run `purge_expired` sequentially on the calling task.
    Sequential,
    /// Hand each bucket's purge work to `tokio::task::spawn` and await the
    /// join set. The "worker pool" spec §3/§5 describe is, in this crate,
    /// Tokio's own task scheduler — an externally supplied executor in the
    /// sense that it is the ambient Tokio runtime, not a pool this crate
    /// owns or sizes itself.
    MultiThreaded,
}

impl Default for PurgeExecution {
    fn default() -> Self {
        PurgeExecution::Sequential
    }
}

/// Configuration consumed by [`crate::store::BucketFileStore::start`] (spec
/// §6).
#[derive(Clone)]
pub struct StoreConfig {
    /// Base location; empty/whitespace maps to [`default_root_dir_name`].
    pub location: Option<String>,
    /// Name of this cache; root becomes `{location}/{cache_name}`.
    pub cache_name: String,
    /// Chunk size used by bulk stream transfer (spec §4.3).
    pub stream_buffer_size: NonZeroUsize,
    /// Durability backend selection.
    pub fsync_mode: FsyncMode,
    /// Purge execution strategy.
    pub purge_execution: PurgeExecution,
}

impl StoreConfig {
    pub fn new(cache_name: impl Into<String>) -> Self {
        Self {
            location: None,
            cache_name: cache_name.into(),
            stream_buffer_size: NonZeroUsize::new(DEFAULT_STREAM_BUFFER_SIZE).unwrap(),
            fsync_mode: FsyncMode::default(),
            purge_execution: PurgeExecution::default(),
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_fsync_mode(mut self, fsync_mode: FsyncMode) -> Self {
        self.fsync_mode = fsync_mode;
        self
    }

    pub fn with_multi_threaded_purge(mut self, enabled: bool) -> Self {
        self.purge_execution = if enabled {
            PurgeExecution::MultiThreaded
        } else {
            PurgeExecution::Sequential
        };
        self
    }

    /// Resolves the configured location to a concrete root directory path
    /// (spec §4.4): `{configuredLocation or default}/{cacheName}`.
    pub fn resolve_root(&self) -> std::path::PathBuf {
        let base = match &self.location {
            Some(location) if !location.trim().is_empty() => location.as_str(),
            _ => default_root_dir_name(),
        };
        std::path::Path::new(base).join(&self.cache_name)
    }

    /// Validates knobs that can't be rejected at the type level (spec §4.4).
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if let FsyncMode::Periodic { interval } = self.fsync_mode {
            if interval.is_zero() {
                return Err(ConfigurationError::InvalidFsyncInterval);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_root_defaults_when_location_blank() {
        let config = StoreConfig::new("c");
        assert_eq!(config.resolve_root(), std::path::Path::new("FileCacheStore/c"));

        let config = StoreConfig::new("c").with_location("   ");
        assert_eq!(config.resolve_root(), std::path::Path::new("FileCacheStore/c"));
    }

    #[test]
    fn resolve_root_uses_configured_location() {
        let config = StoreConfig::new("c").with_location("/var/cache");
        assert_eq!(config.resolve_root(), std::path::Path::new("/var/cache/c"));
    }

    #[test]
    fn validate_rejects_zero_periodic_interval() {
        let config = StoreConfig::new("c").with_fsync_mode(FsyncMode::Periodic {
            interval: Duration::ZERO,
        });
        assert!(config.validate().is_err());
    }
}
