//! The bucket data model (spec §3).

use std::collections::BTreeMap;

/// An opaque key as stored in a bucket's entry map. The store never
/// interprets key bytes beyond hashing them upstream to pick a bucket id;
/// that hashing is the host `BucketBasedCacheStore`'s job, out of scope here.
pub type Key = Vec<u8>;

/// A single key's value plus the expiry metadata the host's Expiry Policy
/// attaches to it (spec §3, "Expiry Policy carried inside bucket entries").
/// This crate does not implement an expiry policy; it only stores and acts on
/// the millisecond timestamp the host computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketEntry {
    /// Opaque value bytes.
    pub value: Vec<u8>,
    /// Absolute expiry time in epoch milliseconds, if this entry expires.
    pub expires_at_millis: Option<i64>,
}

impl BucketEntry {
    pub fn new(value: Vec<u8>) -> Self {
        Self {
            value,
            expires_at_millis: None,
        }
    }

    pub fn with_expiry(value: Vec<u8>, expires_at_millis: i64) -> Self {
        Self {
            value,
            expires_at_millis: Some(expires_at_millis),
        }
    }

    /// Whether this entry is expired as of `now_millis`. Mirrors the bucket
    /// computing expiry itself, per spec §4.2 ("the bucket computes this").
    pub fn is_expired(&self, now_millis: i64) -> bool {
        self.expires_at_millis
            .map_or(false, |expires_at| expires_at <= now_millis)
    }
}

/// A collection of key/value entries sharing a bucket id (spec §3).
///
/// Invariant upheld by this type alone: `bucket_id` is always the decimal
/// string form of a non-negative integer when it came from (or will be
/// written to) disk; [`Bucket::with_entries`] does not enforce this because
/// buckets constructed purely in memory (e.g. by a marshaller mid-decode)
/// have not yet been associated with a file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bucket {
    pub bucket_id: String,
    pub entries: BTreeMap<Key, BucketEntry>,
}

impl Bucket {
    pub fn new(bucket_id: impl Into<String>) -> Self {
        Self {
            bucket_id: bucket_id.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn with_entries(bucket_id: impl Into<String>, entries: BTreeMap<Key, BucketEntry>) -> Self {
        Self {
            bucket_id: bucket_id.into(),
            entries,
        }
    }

    /// An empty bucket is never persisted as a non-empty file (spec §3).
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every entry expired as of `now_millis`, returning how many
    /// were removed. Used by [`crate::store::BucketFileStore::purge_expired`]
    /// to decide whether the per-bucket write lock needs to be taken at all
    /// (spec §4.2: "acquire the per-bucket write lock if anything was
    /// removed").
    pub fn purge_expired_entries(&mut self, now_millis: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now_millis));
        before - self.entries.len()
    }

    /// Parses a bucket id from a file name, per spec §6 ("bucketId is the
    /// decimal string of a non-negative integer"). Used by `purge_expired`
    /// (spec §4.2, edge case 2) to skip non-numeric file names rather than
    /// aborting the whole sweep.
    pub fn parse_bucket_id(raw: &str) -> Option<u64> {
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        raw.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purge_expired_entries_removes_only_expired() {
        let mut bucket = Bucket::new("1");
        bucket
            .entries
            .insert(b"a".to_vec(), BucketEntry::with_expiry(b"x".to_vec(), 100));
        bucket
            .entries
            .insert(b"b".to_vec(), BucketEntry::new(b"y".to_vec()));

        let removed = bucket.purge_expired_entries(200);
        assert_eq!(removed, 1);
        assert_eq!(bucket.entries.len(), 1);
        assert!(bucket.entries.contains_key(b"b".as_slice()));
    }

    #[test]
    fn parse_bucket_id_rejects_non_numeric() {
        assert_eq!(Bucket::parse_bucket_id("42"), Some(42));
        assert_eq!(Bucket::parse_bucket_id("07"), Some(7));
        assert_eq!(Bucket::parse_bucket_id(""), None);
        assert_eq!(Bucket::parse_bucket_id("abc"), None);
        assert_eq!(Bucket::parse_bucket_id("-1"), None);
    }
}
