use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;

use delaymq::core::clock::ManualClock;
use delaymq::core::due_index::DueIndex;
use delaymq::core::entry::{EntryId, Fields};
use delaymq::core::store::{Store, StoreOptions};

/// Ids in append order with due times spread over 100 seconds, not in id order.
fn scheduled_batch(count: usize) -> Vec<(EntryId, u64)> {
    (0..count)
        .map(|i| {
            let id = EntryId::new(1_000, i as u64);
            let due_at = 1_000 + ((i * 7_919) % 1_000) as u64 * 100;
            (id, due_at)
        })
        .collect()
}

fn bench_due_index_insertion(c: &mut Criterion) {
    let mut group = c.benchmark_group("due_index_insertion");

    for &size in [1000, 10_000, 100_000].iter() {
        group.throughput(Throughput::Elements(size as u64));
        let batch = scheduled_batch(size);
        group.bench_with_input(BenchmarkId::new("insert", size), &batch, |b, batch| {
            b.iter(|| {
                let mut index = DueIndex::new();
                for &(id, due_at) in batch {
                    index.insert(id, due_at, 0);
                }
                black_box(index.len())
            });
        });
    }

    group.finish();
}

fn bench_due_index_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("due_index_pop");

    for &size in [1000, 10_000, 100_000].iter() {
        group.throughput(Throughput::Elements(size as u64));
        let batch = scheduled_batch(size);
        group.bench_with_input(BenchmarkId::new("drain_by_100", size), &batch, |b, batch| {
            b.iter_batched(
                || {
                    let mut index = DueIndex::new();
                    for &(id, due_at) in batch {
                        index.insert(id, due_at, 0);
                    }
                    index
                },
                |mut index| {
                    while !index.is_empty() {
                        black_box(index.pop_due(u64::MAX, 100));
                    }
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

fn bench_store_enqueue_and_poll(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_delay_path");

    group.bench_function("enqueue_then_poll_1000", |b| {
        b.iter(|| {
            let clock = Arc::new(ManualClock::new(1_000));
            let store = Store::open(StoreOptions::default(), clock);
            for i in 0..1000u64 {
                let fields = Fields::new().with("job", i.to_string());
                black_box(store.append("bench", fields, Some(1_000 + (i % 50) * 10)).ok());
            }
            let mut fired = 0;
            while let Ok(due) = store.poll_due("bench", u64::MAX, 100) {
                if due.is_empty() {
                    break;
                }
                fired += due.len();
            }
            black_box(fired)
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_due_index_insertion,
    bench_due_index_pop,
    bench_store_enqueue_and_poll
);

criterion_main!(benches);
