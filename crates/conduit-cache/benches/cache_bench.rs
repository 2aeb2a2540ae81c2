//! Statement cache benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use conduit_cache::lru::LruCache;
use conduit_cache::StatementCache;

fn lru_insert_benchmark(c: &mut Criterion) {
    c.bench_function("lru_insert_with_pruning_2000", |b| {
        b.iter(|| {
            let mut cache = LruCache::new(500);
            for i in 0..2000 {
                cache.insert(i, i * 2);
            }
            black_box(cache.len())
        })
    });
}

fn lru_get_benchmark(c: &mut Criterion) {
    let mut cache = LruCache::new(1000);
    for i in 0..1000 {
        cache.insert(i, i * 2);
    }

    c.bench_function("lru_get_1000", |b| {
        b.iter(|| {
            for i in 0..1000 {
                black_box(cache.get(&i));
            }
        })
    });
}

fn statement_cache_hit_benchmark(c: &mut Criterion) {
    let cache: StatementCache<u64, String> = StatementCache::new(500);
    for i in 0..500 {
        cache
            .get_or_compile(i, || Ok::<_, ()>(format!("SELECT * FROM t{i}")))
            .unwrap();
    }

    c.bench_function("statement_cache_hit_500", |b| {
        b.iter(|| {
            for i in 0..500 {
                let result = cache.get_or_compile(i, || Ok::<_, ()>(String::new()));
                black_box(result.is_ok());
            }
        })
    });
}

criterion_group!(
    benches,
    lru_insert_benchmark,
    lru_get_benchmark,
    statement_cache_hit_benchmark,
);
criterion_main!(benches);
