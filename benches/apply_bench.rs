use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;

use rusd_apply::apply::{evaluate, ApplyContext};
use rusd_apply::etcdserverpb::{
    Compare, CompareResult, CompareTarget, InternalRequest, PutRequest, RangeRequest,
    RequestUnion, TxnRequest,
};
use rusd_apply::storage::{Backend, BackendConfig, MvccStore};

fn open_store(name: &str) -> Arc<MvccStore> {
    let backend = Backend::new(BackendConfig {
        data_dir: std::env::temp_dir().join(format!("rusd-apply-bench-{}-{}", name, std::process::id())),
        cache_size_mb: 64,
        flush_interval_ms: 0,
        temporary: true,
    })
    .expect("open backend");
    MvccStore::new(backend).expect("open store")
}

fn put(key: String, value: &[u8]) -> InternalRequest {
    InternalRequest::Put(PutRequest {
        key: key.into_bytes(),
        value: value.to_vec(),
    })
}

// ============================================================================
// Benchmark: Put Operations
// ============================================================================

fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_operations");
    group.sample_size(50);
    group.measurement_time(Duration::from_secs(5));

    let store = open_store("put");
    let ctx = ApplyContext::default();

    for size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        let value = "x".repeat(*size).into_bytes();
        group.bench_with_input(BenchmarkId::new("put_value_size", size), size, |b, _| {
            let mut counter = 0u64;
            b.iter(|| {
                counter += 1;
                let req = put(format!("bench/key{}", counter % 1000), &value);
                black_box(evaluate(&ctx, &*store, &req))
            })
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Range Operations
// ============================================================================

fn bench_range(c: &mut Criterion) {
    let mut group = c.benchmark_group("range_operations");
    group.sample_size(50);

    let store = open_store("range");
    let ctx = ApplyContext::default();
    for i in 0..1000 {
        evaluate(&ctx, &*store, &put(format!("range/key{:04}", i), b"value"));
    }

    group.bench_function("single_key", |b| {
        let req = InternalRequest::Range(RangeRequest {
            key: b"range/key0500".to_vec(),
            ..Default::default()
        });
        b.iter(|| black_box(evaluate(&ctx, &*store, &req)))
    });

    for limit in [10i64, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*limit as u64));
        let req = InternalRequest::Range(RangeRequest {
            key: b"range/".to_vec(),
            range_end: b"range0".to_vec(),
            limit: *limit,
        });
        group.bench_with_input(BenchmarkId::new("prefix_limit", limit), limit, |b, _| {
            b.iter(|| black_box(evaluate(&ctx, &*store, &req)))
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Transactions
// ============================================================================

fn bench_txn(c: &mut Criterion) {
    let mut group = c.benchmark_group("txn_operations");
    group.sample_size(50);

    let store = open_store("txn");
    let ctx = ApplyContext::default();
    evaluate(&ctx, &*store, &put("txn/lock".to_string(), b"free"));

    // Compare always false, empty failure branch: no writes
    group.bench_function("failed_compare", |b| {
        let req = InternalRequest::Txn(TxnRequest {
            compare: vec![Compare::new(
                "txn/lock",
                CompareTarget::Value(b"held".to_vec()),
                CompareResult::Equal,
            )],
            success: vec![RequestUnion::Put(PutRequest {
                key: b"txn/lock".to_vec(),
                value: b"held".to_vec(),
            })],
            failure: vec![],
        });
        b.iter(|| black_box(evaluate(&ctx, &*store, &req)))
    });

    // Compare always true, one write per iteration
    group.bench_function("compare_and_put", |b| {
        let req = InternalRequest::Txn(TxnRequest {
            compare: vec![Compare::new(
                "txn/lock",
                CompareTarget::Version(0),
                CompareResult::Greater,
            )],
            success: vec![
                RequestUnion::Put(PutRequest {
                    key: b"txn/counter".to_vec(),
                    value: b"1".to_vec(),
                }),
                RequestUnion::Range(RangeRequest {
                    key: b"txn/counter".to_vec(),
                    ..Default::default()
                }),
            ],
            failure: vec![],
        });
        b.iter(|| black_box(evaluate(&ctx, &*store, &req)))
    });

    group.finish();
}

// ============================================================================
// Criterion Configuration
// ============================================================================

criterion_group!(benches, bench_put, bench_range, bench_txn);

criterion_main!(benches);
