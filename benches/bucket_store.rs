//! Throughput of `update_bucket`/`load_bucket` under each `FileSync` backend,
//! shaped after the teacher's `benches/sized_records.rs`: one temp directory
//! guard per run, grouped `BenchmarkId`s per backend.

use bucket_file_store::{
    marshal::test_support::PlainMarshaller, Bucket, BucketEntry, BucketFileStore, FsyncMode,
    ProductionFilesystem, StoreConfig,
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use temp_dir::TempDir;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

fn make_bucket(entry_count: usize) -> Bucket {
    let mut bucket = Bucket::new("1");
    for i in 0..entry_count {
        bucket.entries.insert(
            format!("key-{i}").into_bytes(),
            BucketEntry::new(vec![0u8; 128]),
        );
    }
    bucket
}

fn bench_update_bucket(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let marshaller = PlainMarshaller;
    let cancel = CancellationToken::new();

    let mut group = c.benchmark_group("update_bucket");
    for (label, mode) in [
        ("per_write", FsyncMode::PerWrite),
        ("buffered", FsyncMode::Default),
        ("periodic", FsyncMode::Periodic { interval: std::time::Duration::from_millis(50) }),
    ] {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::new("bench")
            .with_location(dir.path().to_str().unwrap())
            .with_fsync_mode(mode);
        let store = runtime.block_on(BucketFileStore::start(config, ProductionFilesystem)).unwrap();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("entries_64", label), &64, |b, &n| {
            b.to_async(&runtime).iter(|| {
                let bucket = make_bucket(n);
                let store = &store;
                let marshaller = &marshaller;
                let cancel = &cancel;
                async move {
                    store.update_bucket(marshaller, bucket, cancel).await.unwrap();
                }
            });
        });

        runtime.block_on(store.stop());
    }
    group.finish();
}

fn bench_load_bucket(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let marshaller = PlainMarshaller;
    let cancel = CancellationToken::new();

    let dir = TempDir::new().unwrap();
    let config = StoreConfig::new("bench-load").with_location(dir.path().to_str().unwrap());
    let store = runtime.block_on(BucketFileStore::start(config, ProductionFilesystem)).unwrap();
    runtime
        .block_on(store.update_bucket(&marshaller, make_bucket(64), &cancel))
        .unwrap();

    let mut group = c.benchmark_group("load_bucket");
    group.throughput(Throughput::Elements(1));
    group.bench_function("entries_64", |b| {
        b.to_async(&runtime).iter(|| async {
            store.load_bucket("1", &marshaller, &cancel).await.unwrap();
        });
    });
    group.finish();

    runtime.block_on(store.stop());
}

criterion_group!(benches, bench_update_bucket, bench_load_bucket);
criterion_main!(benches);
