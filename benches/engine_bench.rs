//! Put/Get/Delete throughput benchmarks.

use caskdb::{Engine, Options};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use rand::Rng;

fn test_key(i: usize) -> Vec<u8> {
    format!("caskdb-bench-key-{i:09}").into_bytes()
}

fn random_value(n: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..n).map(|_| rng.gen_range(b'a'..=b'z')).collect()
}

fn open_bench_engine() -> (tempfile::TempDir, Engine) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut options = Options::default();
    options.dir_path = dir.path().to_path_buf();
    let engine = Engine::open(options).expect("open database");
    (dir, engine)
}

fn bench_put(c: &mut Criterion) {
    let (_dir, engine) = open_bench_engine();
    let mut i = 0usize;
    c.bench_function("put", |b| {
        b.iter_batched(
            || {
                i += 1;
                (test_key(i), random_value(1024))
            },
            |(key, value)| engine.put(key, value).expect("put"),
            BatchSize::SmallInput,
        )
    });
}

fn bench_get(c: &mut Criterion) {
    let (_dir, engine) = open_bench_engine();
    for i in 0..10_000 {
        engine.put(test_key(i), random_value(1024)).expect("put");
    }
    let mut rng = rand::thread_rng();
    c.bench_function("get", |b| {
        b.iter(|| {
            let i = rng.gen_range(0..10_000);
            let _ = engine.get(&test_key(i));
        })
    });
}

fn bench_delete(c: &mut Criterion) {
    let (_dir, engine) = open_bench_engine();
    for i in 0..10_000 {
        engine.put(test_key(i), random_value(1024)).expect("put");
    }
    let mut rng = rand::thread_rng();
    c.bench_function("delete", |b| {
        b.iter(|| {
            let i = rng.gen_range(0..10_000);
            engine.delete(&test_key(i)).expect("delete");
        })
    });
}

criterion_group!(benches, bench_put, bench_get, bench_delete);
criterion_main!(benches);
