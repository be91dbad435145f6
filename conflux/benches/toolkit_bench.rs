//! Benchmarks for the bounded containers and expiry parsing.

use chrono::{TimeZone, Utc};
use conflux::cache::{derive_key, Expiry, KeyStrategy};
use conflux::containers::{CountedFifoSet, ExpiringFifoMap, UniqueFifoSet};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;

fn container_benchmark(c: &mut Criterion) {
    c.bench_function("unique_fifo_set_add_evicting", |b| {
        let set = UniqueFifoSet::new(1_000).unwrap();
        let mut n = 0_u64;
        b.iter(|| {
            n += 1;
            black_box(set.add(n))
        });
    });

    c.bench_function("counted_fifo_set_add_repeating", |b| {
        let set = CountedFifoSet::new(256).unwrap();
        let mut n = 0_u64;
        b.iter(|| {
            n += 1;
            black_box(set.add(n % 512))
        });
    });

    c.bench_function("expiring_fifo_map_set_get", |b| {
        let map = ExpiringFifoMap::new(1_000).unwrap();
        let mut n = 0_u64;
        b.iter(|| {
            n += 1;
            map.set(n % 2_000, n, Some(Duration::from_secs(60)));
            black_box(map.get(&(n / 2)))
        });
    });
}

fn expiry_benchmark(c: &mut Criterion) {
    let now = Utc.with_ymd_and_hms(2024, 5, 15, 13, 45, 0).unwrap();

    c.bench_function("expiry_parse", |b| {
        b.iter(|| {
            for token in ["3600", "daily", "09:30", "Sunday", "march", "21st"] {
                black_box(token.parse::<Expiry>().unwrap());
            }
        });
    });

    c.bench_function("expiry_seconds_from", |b| {
        let expiries: Vec<Expiry> = ["weekly", "quarterly", "23:00", "fri", "31st"]
            .iter()
            .map(|t| t.parse().unwrap())
            .collect();
        b.iter(|| {
            for expiry in &expiries {
                black_box(expiry.seconds_from(&now));
            }
        });
    });

    c.bench_function("cache_key_fields", |b| {
        let args = serde_json::json!({"query": "rust async", "page": 3, "api_key": "secret"});
        let strategy = KeyStrategy::Fields(vec!["query".into(), "page".into()]);
        b.iter(|| black_box(derive_key("search", &args, &strategy)));
    });
}

criterion_group!(benches, container_benchmark, expiry_benchmark);
criterion_main!(benches);
