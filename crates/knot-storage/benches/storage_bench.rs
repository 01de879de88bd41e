//! Storage benchmarks for Knot.
//!
//! Covers object writes and reads at various sizes, record compression,
//! reachability walks and branch compare-and-swap.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use knot_storage::{
    decode_record, encode_record, CompressionLevel, EntryKind, GitObject, ObjectId, ObjectStore,
    RefManager, TreeEntry,
};
use knot_types::RepositoryId;
use std::hint::black_box;

const AUTHOR: &str = "Bench <bench@example.com> 1700000000 +0000";

/// Generate test data of specified size
fn generate_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

/// Builds a linear history of `depth` commits, each touching one file.
fn linear_history(store: &ObjectStore, depth: usize) -> ObjectId {
    let mut parent: Option<ObjectId> = None;
    for i in 0..depth {
        let blob = store.put_blob(format!("revision {}", i).into_bytes()).unwrap();
        let tree = store
            .put(GitObject::tree(&[TreeEntry::new("100644", "file.txt", EntryKind::Blob, blob)]))
            .unwrap();
        let parents: Vec<_> = parent.into_iter().collect();
        let commit = store
            .put(GitObject::commit(&tree, &parents, AUTHOR, AUTHOR, &format!("commit {}", i)))
            .unwrap();
        parent = Some(commit);
    }
    parent.unwrap()
}

fn bench_object_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("object_store_write");

    for size in [1_024, 10_240, 102_400, 1_048_576].iter() {
        group.throughput(Throughput::Bytes(*size as u64));

        group.bench_with_input(BenchmarkId::new("put", size), size, |b, &size| {
            let data = generate_data(size);
            b.iter(|| {
                // Fresh store each time so the write is never a no-op.
                let store = ObjectStore::new();
                black_box(store.put_blob(data.clone()).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_object_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("object_store_read");

    for size in [1_024, 102_400, 1_048_576].iter() {
        group.throughput(Throughput::Bytes(*size as u64));

        group.bench_with_input(BenchmarkId::new("cached", size), size, |b, &size| {
            let store = ObjectStore::new();
            let id = store.put_blob(generate_data(size)).unwrap();
            b.iter(|| black_box(store.get_object(&id).unwrap()));
        });

        group.bench_with_input(BenchmarkId::new("uncached", size), size, |b, &size| {
            let store = ObjectStore::with_config(knot_storage::StoreConfig {
                cache_capacity: 0,
                ..Default::default()
            });
            let id = store.put_blob(generate_data(size)).unwrap();
            b.iter(|| black_box(store.get_object(&id).unwrap()));
        });
    }

    group.finish();
}

fn bench_compression(c: &mut Criterion) {
    let mut group = c.benchmark_group("compression");

    for level in [CompressionLevel::Fast, CompressionLevel::Default, CompressionLevel::Best] {
        let object = GitObject::blob(generate_data(102_400));
        group.throughput(Throughput::Bytes(object.size() as u64));

        group.bench_function(BenchmarkId::new("encode", format!("{:?}", level)), |b| {
            b.iter(|| black_box(encode_record(&object, level).unwrap()));
        });

        let record = encode_record(&object, level).unwrap();
        group.bench_function(BenchmarkId::new("decode", format!("{:?}", level)), |b| {
            b.iter(|| black_box(decode_record(&record).unwrap()));
        });
    }

    group.finish();
}

fn bench_reachability(c: &mut Criterion) {
    let mut group = c.benchmark_group("reachability");

    for depth in [10, 100, 1_000].iter() {
        let store = ObjectStore::new();
        let tip = linear_history(&store, *depth);

        group.bench_with_input(BenchmarkId::new("closure", depth), depth, |b, _| {
            b.iter(|| black_box(store.get_reachable_objects(&tip).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("walk_commits", depth), depth, |b, _| {
            b.iter(|| black_box(store.walk_commits(&tip, usize::MAX).unwrap()));
        });
    }

    group.finish();
}

fn bench_ref_cas(c: &mut Criterion) {
    let mut group = c.benchmark_group("refs");
    let repo = RepositoryId::generate("bench", "owner");

    group.bench_function("push_branch", |b| {
        let refs = RefManager::new();
        let mut tip = ObjectId::ZERO;
        let mut counter = 0u32;
        b.iter(|| {
            counter = counter.wrapping_add(1);
            let mut bytes = [1u8; 20];
            bytes[..4].copy_from_slice(&counter.to_be_bytes());
            let next = ObjectId::from_bytes(bytes);
            refs.push_branch(&repo, "main", next, tip, 1, "bench").unwrap();
            tip = next;
        });
    });

    group.bench_function("get_refs_100_branches", |b| {
        let refs = RefManager::new();
        for i in 0..100u8 {
            refs.push_branch(&repo, &format!("branch-{}", i), ObjectId::from_bytes([i + 1; 20]), ObjectId::ZERO, 1, "bench")
                .unwrap();
        }
        b.iter(|| black_box(refs.get_refs(&repo)));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_object_write,
    bench_object_read,
    bench_compression,
    bench_reachability,
    bench_ref_cas,
);

criterion_main!(benches);
