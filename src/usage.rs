//! A small in-process usage snapshot (SPEC_FULL.md §3), grounded on the
//! teacher's `buffer_usage_data` module: plain `AtomicI64` counters updated
//! on the write/purge path, exposed as an immutable snapshot rather than
//! wired to an external metrics sink (this crate has no external consumer in
//! scope to report to).

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct StoreUsage {
    bucket_count: AtomicUsize,
    approx_total_bytes: AtomicI64,
}

/// Read-only view of [`StoreUsage`] at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageSnapshot {
    pub bucket_count: usize,
    pub approx_total_bytes: i64,
}

impl StoreUsage {
    pub fn record_bucket_written(&self, byte_delta: i64) {
        self.approx_total_bytes.fetch_add(byte_delta, Ordering::Relaxed);
    }

    pub fn record_bucket_created(&self) {
        self.bucket_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bucket_removed(&self, byte_delta: i64) {
        self.bucket_count.fetch_sub(1, Ordering::Relaxed);
        self.approx_total_bytes.fetch_sub(byte_delta, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            bucket_count: self.bucket_count.load(Ordering::Relaxed),
            approx_total_bytes: self.approx_total_bytes.load(Ordering::Relaxed),
        }
    }
}
