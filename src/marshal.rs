//! The bucket codec bridge (spec §2, §4.1 "Bucket codec bridge").
//!
//! `vector_buffers` draws a hard line between "how a value becomes bytes"
//! (`Encodable`/`FixedEncodable` in its `encoding` module) and the buffer
//! logic that stores those bytes. This crate draws the same line: the
//! `Marshaller` trait below is the external collaborator spec.md calls out of
//! scope ("the schema validation library ... treated as a consumed
//! interface"); everything in this module is the *bridge* that is in scope —
//! converting a [`Bucket`](crate::bucket::Bucket) to and from a marshalled
//! byte image, with the partial-input safety spec §4.2 edge case 1 and 3
//! require.

use std::error::Error as StdError;

use bytes::{Buf, BufMut};

use crate::{bucket::Bucket, error::MarshalError};

/// Converts a bucket's entry map to and from an opaque byte image.
///
/// This is the consumed interface spec.md calls the "Marshaller" (§1, §3,
/// §6): an external document/schema codec that this crate never implements,
/// only calls through this trait. A bucket's `bucket_id` is never passed
/// through the marshaller — it is always stamped onto the bucket after
/// deserialization from the file name (spec §4.2, edge case 3), since the id
/// is a property of the file, not the payload.
pub trait Marshaller: Send + Sync {
    /// Error produced by a failed encode or decode. Boxed so that
    /// implementations can use whatever error type their codec already has
    /// (the JSON/BSON document model's own error type, for instance) without
    /// this trait needing to know about it.
    type Error: StdError + Send + Sync + 'static;

    /// Serializes a bucket's entries into `buffer`. Only the entry map is
    /// serialized; the bucket id is recovered from the file name on read.
    fn marshal<B: BufMut>(&self, bucket: &Bucket, buffer: &mut B) -> Result<(), Self::Error>;

    /// Deserializes a bucket's entries from `buffer`. The returned bucket's
    /// `bucket_id` is left empty; callers stamp it in per spec §4.2.
    fn unmarshal<B: Buf>(&self, buffer: B) -> Result<Bucket, Self::Error>;
}

/// Serializes `bucket` through `marshaller`, wrapping any codec error as a
/// [`MarshalError`] tagged with the `"marshal"` operation so the top-level
/// error display reads like spec §7's wrapped-cause errors.
pub fn marshal_bucket<M: Marshaller>(
    marshaller: &M,
    bucket: &Bucket,
) -> Result<Vec<u8>, MarshalError> {
    let mut buffer = Vec::new();
    marshaller
        .marshal(bucket, &mut buffer)
        .map_err(|source| MarshalError {
            operation: "marshal",
            source: Box::new(source),
        })?;
    Ok(buffer)
}

/// Deserializes a bucket payload through `marshaller`.
///
/// Per spec §4.2 edge case 3, the result may have an empty entry set after
/// deserialization; this function does not special-case that, it's on the
/// caller to decide whether to act on an empty bucket. A zero-length `bytes`
/// slice is *not* passed to the marshaller at all — spec §3/§6 define
/// zero-length as "absent", a state this bridge never hands to the external
/// codec; callers must check length before calling this function.
pub fn unmarshal_bucket<M: Marshaller>(
    marshaller: &M,
    bytes: &[u8],
) -> Result<Bucket, MarshalError> {
    marshaller
        .unmarshal(bytes)
        .map_err(|source| MarshalError {
            operation: "unmarshal",
            source: Box::new(source),
        })
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    //! A trivial length-prefixed marshaller used by this crate's own tests
    //! and benches, standing in for the real JSON/BSON document model the
    //! spec treats as out of scope.

    use std::{collections::BTreeMap, convert::Infallible};

    use bytes::{Buf, BufMut};

    use super::Marshaller;
    use crate::bucket::{Bucket, BucketEntry};

    #[derive(Debug, Default, Clone, Copy)]
    pub struct PlainMarshaller;

    impl Marshaller for PlainMarshaller {
        type Error = Infallible;

        fn marshal<B: BufMut>(&self, bucket: &Bucket, buffer: &mut B) -> Result<(), Self::Error> {
            buffer.put_u32(bucket.entries.len() as u32);
            for (key, entry) in &bucket.entries {
                buffer.put_u32(key.len() as u32);
                buffer.put_slice(key);
                buffer.put_u32(entry.value.len() as u32);
                buffer.put_slice(&entry.value);
                buffer.put_i64(entry.expires_at_millis.unwrap_or(-1));
            }
            Ok(())
        }

        fn unmarshal<B: Buf>(&self, mut buffer: B) -> Result<Bucket, Self::Error> {
            let mut entries = BTreeMap::new();
            if buffer.remaining() < 4 {
                return Ok(Bucket::with_entries(String::new(), entries));
            }
            let count = buffer.get_u32();
            for _ in 0..count {
                let key_len = buffer.get_u32() as usize;
                let key = buffer.copy_to_bytes(key_len).to_vec();
                let value_len = buffer.get_u32() as usize;
                let value = buffer.copy_to_bytes(value_len).to_vec();
                let expires_at_millis = buffer.get_i64();
                entries.insert(
                    key,
                    BucketEntry {
                        value,
                        expires_at_millis: (expires_at_millis >= 0).then_some(expires_at_millis),
                    },
                );
            }
            Ok(Bucket::with_entries(String::new(), entries))
        }
    }
}
