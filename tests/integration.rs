//! Cross-module scenarios that don't fit naturally as a single unit's
//! `#[cfg(test)]` module: concurrent writers to one bucket, and a full
//! two-store migration via `to_stream`/`from_stream` (spec §8, scenario 5).

use std::sync::Arc;

use bucket_file_store::{
    marshal::test_support::PlainMarshaller, Bucket, BucketEntry, BucketFileStore, ProductionFilesystem,
    StoreConfig,
};
use temp_dir::TempDir;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn concurrent_updates_to_same_bucket_serialize_without_corruption() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig::new("concurrent").with_location(dir.path().to_str().unwrap());
    let store = Arc::new(BucketFileStore::start(config, ProductionFilesystem).await.unwrap());
    let marshaller = Arc::new(PlainMarshaller);
    let cancel = CancellationToken::new();

    let mut tasks = Vec::new();
    for writer in 0..8u32 {
        let store = Arc::clone(&store);
        let marshaller = Arc::clone(&marshaller);
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            for round in 0..20u32 {
                let mut bucket = Bucket::new("1");
                bucket.entries.insert(
                    format!("writer-{writer}").into_bytes(),
                    BucketEntry::new(round.to_be_bytes().to_vec()),
                );
                store
                    .update_bucket(marshaller.as_ref(), bucket, &cancel)
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // Each `update_bucket` replaces the whole bucket (spec §4.2), so after
    // the race only the last writer's single entry should remain — but it
    // must be a well-formed bucket, never a torn/partial write from two
    // writers interleaving mid-marshal.
    let loaded = store.load_bucket("1", marshaller.as_ref(), &cancel).await.unwrap().unwrap();
    assert_eq!(loaded.entries.len(), 1);
}

#[tokio::test]
async fn bulk_migration_between_two_stores_preserves_buckets() {
    let source_dir = TempDir::new().unwrap();
    let source_config = StoreConfig::new("source").with_location(source_dir.path().to_str().unwrap());
    let source = BucketFileStore::start(source_config, ProductionFilesystem).await.unwrap();
    let marshaller = PlainMarshaller;
    let cancel = CancellationToken::new();

    for id in ["1", "2", "3"] {
        let mut bucket = Bucket::new(id);
        bucket
            .entries
            .insert(b"k".to_vec(), BucketEntry::new(format!("value-{id}").into_bytes()));
        source.update_bucket(&marshaller, bucket, &cancel).await.unwrap();
    }

    let mut export_cursor = std::io::Cursor::new(Vec::new());
    source.to_stream(&mut export_cursor).await.unwrap();
    let wire = export_cursor.into_inner();

    let dest_dir = TempDir::new().unwrap();
    let dest_config = StoreConfig::new("dest").with_location(dest_dir.path().to_str().unwrap());
    let dest = BucketFileStore::start(dest_config, ProductionFilesystem).await.unwrap();
    dest.from_stream(&mut std::io::Cursor::new(wire)).await.unwrap();

    let mut seen = Vec::new();
    dest.loop_over_buckets(&marshaller, &cancel, |bucket| {
        seen.push(bucket.bucket_id);
        bucket_file_store::LoopControl::Continue
    })
    .await
    .unwrap();
    seen.sort();
    assert_eq!(seen, vec!["1", "2", "3"]);

    for id in ["1", "2", "3"] {
        let value = dest.load_bucket(id, &marshaller, &cancel).await.unwrap().unwrap();
        assert_eq!(value.entries.get(b"k".as_slice()).unwrap().value, format!("value-{id}").into_bytes());
    }
}

#[tokio::test]
async fn empty_root_sweeps_all_succeed() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig::new("empty").with_location(dir.path().to_str().unwrap());
    let store = BucketFileStore::start(config, ProductionFilesystem).await.unwrap();
    let marshaller = PlainMarshaller;
    let cancel = CancellationToken::new();

    store.clear().await.unwrap();

    let mut visited = 0;
    store
        .loop_over_buckets(&marshaller, &cancel, |_| {
            visited += 1;
            bucket_file_store::LoopControl::Continue
        })
        .await
        .unwrap();
    assert_eq!(visited, 0);

    store
        .purge_expired(Arc::new(marshaller), 0, &cancel)
        .await
        .unwrap();

    let mut export_cursor = std::io::Cursor::new(Vec::new());
    store.to_stream(&mut export_cursor).await.unwrap();
    assert_eq!(export_cursor.into_inner(), 0i32.to_be_bytes().to_vec());

    store.stop().await;
}
