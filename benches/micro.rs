//! Micro-benchmarks for StrataDB core operations.
//!
//! Uses Criterion for statistically rigorous measurement with
//! regression detection and HTML reports.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench micro            # run all micro-benchmarks
//! cargo bench --bench micro -- put     # filter by name
//! ```
//!
//! Reports are generated in `target/criterion/report/index.html`.

use std::time::Duration;

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};

use stratadb::{Db, DbConfig};
use tempfile::TempDir;

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Default value payload (128 bytes).
const VALUE_128B: &[u8; 128] = &[0xAB; 128];

/// Format a zero-padded key.
fn make_key(i: u64) -> Vec<u8> {
    format!("key-{i:012}").into_bytes()
}

/// Open a fresh database with a small write buffer so flushes happen
/// during sustained-write benchmarks.
fn open_small_buffer(dir: &std::path::Path) -> Db {
    let config = DbConfig {
        mem_table_size: 256 * 1024,
        compaction_interval: Duration::from_millis(50),
        ..DbConfig::default()
    };
    Db::open(dir, config).expect("open bench db")
}

// ------------------------------------------------------------------------------------------------
// Benchmarks
// ------------------------------------------------------------------------------------------------

fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("put");
    group.throughput(Throughput::Bytes(VALUE_128B.len() as u64));

    group.bench_function("sequential_128b", |b| {
        let tmp = TempDir::new().unwrap();
        let db = open_small_buffer(tmp.path());
        let mut i = 0u64;
        b.iter(|| {
            db.put(&make_key(i), VALUE_128B).unwrap();
            i += 1;
        });
        db.close().unwrap();
    });

    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");

    group.bench_function("memtable_hit", |b| {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(tmp.path(), DbConfig::default()).unwrap();
        for i in 0..10_000 {
            db.put(&make_key(i), VALUE_128B).unwrap();
        }
        let mut i = 0u64;
        b.iter(|| {
            let key = make_key(i % 10_000);
            black_box(db.get(&key).unwrap());
            i += 1;
        });
        db.close().unwrap();
    });

    group.bench_function("table_hit", |b| {
        let tmp = TempDir::new().unwrap();
        let db = open_small_buffer(tmp.path());
        for i in 0..10_000 {
            db.put(&make_key(i), VALUE_128B).unwrap();
        }
        db.compact().unwrap();
        let mut i = 0u64;
        b.iter(|| {
            let key = make_key(i % 10_000);
            black_box(db.get(&key).unwrap());
            i += 1;
        });
        db.close().unwrap();
    });

    group.finish();
}

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan");

    group.bench_function("full_10k", |b| {
        let tmp = TempDir::new().unwrap();
        let db = open_small_buffer(tmp.path());
        for i in 0..10_000 {
            db.put(&make_key(i), VALUE_128B).unwrap();
        }
        db.compact().unwrap();
        b.iter(|| {
            let count = db.scan(b"").unwrap().count();
            black_box(count);
        });
        db.close().unwrap();
    });

    group.finish();
}

criterion_group!(benches, bench_put, bench_get, bench_scan);
criterion_main!(benches);
