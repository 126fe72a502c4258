#![allow(missing_docs, clippy::cast_possible_truncation)]

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::{
    sync::{
        Arc, Barrier,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use shardq::{
    ShardedQueue,
    traits::{QueueConsumer, QueueFactory, QueueProducer},
};

const MESSAGES: [&str; 3] = [
    "Start it up! long enough to defeat any small string optimization",
    "A second payload, also well past the inline capacity of a short string",
    "And a third one so the three-way rotation touches distinct allocations",
];

/// Single-threaded latency benchmark - measures ns per operation
fn bench_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("latency_ns_per_op");
    group.measurement_time(Duration::from_secs(10));
    group.warm_up_time(Duration::from_secs(3));

    group.bench_function("enqueue_dequeue_u64", |b| {
        let queue = ShardedQueue::<u64>::new();
        b.iter(|| {
            queue.enqueue(black_box(42));
            black_box(queue.try_dequeue());
        });
    });

    group.bench_function("enqueue_dequeue_string", |b| {
        let queue = ShardedQueue::<String>::new();
        let mut i = 0;
        b.iter(|| {
            queue.enqueue(MESSAGES[i % 3].to_owned());
            i += 1;
            black_box(queue.try_dequeue());
        });
    });

    group.bench_function("handle_push_pop_u64", |b| {
        let (producer, consumer) = ShardedQueue::<u64>::builder().channels().unwrap();
        b.iter(|| {
            producer.push(black_box(42));
            black_box(consumer.try_pop().ok());
        });
    });

    group.finish();
}

/// Bulk transfer: one acquisition per batch on both sides
fn bench_bulk(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulk");

    for batch in [16usize, 256, 4096] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            let queue = ShardedQueue::<u64>::new();
            let mut out = Vec::with_capacity(batch);
            b.iter(|| {
                queue.enqueue_bulk(0..batch as u64, batch);
                out.clear();
                black_box(queue.try_dequeue_bulk_into(&mut out, batch));
            });
        });
    }

    group.finish();
}

/// Fill then half-drain with heap-allocated payloads
fn bench_fill_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("fill_drain");
    group.throughput(Throughput::Elements(1024 + 512));

    group.bench_function("strings_1024_in_512_out", |b| {
        let queue = ShardedQueue::<String>::new();
        for i in 0..100 {
            queue.enqueue(MESSAGES[i % 3].to_owned());
        }
        b.iter(|| {
            for j in 0..1024 {
                queue.enqueue(MESSAGES[j % 3].to_owned());
            }
            for _ in 0..512 {
                black_box(queue.try_dequeue());
            }
        });
    });

    group.finish();
}

/// Mixed workload: threads 0 and 1 alternate dequeue/enqueue, the rest are
/// split between pure enqueuers (even ids) and pure dequeuers (odd ids).
fn heavy_concurrent(threads: usize, ops_per_thread: usize) -> Duration {
    let queue = Arc::new(ShardedQueue::<usize>::new());
    let ready = Arc::new(Barrier::new(threads + 1));
    let dequeued = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..threads)
        .map(|id| {
            let producer = queue.producer();
            let consumer = queue.consumer();
            let ready = ready.clone();
            let dequeued = dequeued.clone();
            thread::spawn(move || {
                ready.wait();
                if id < 2 {
                    for i in 0..ops_per_thread / 2 {
                        if consumer.try_pop().is_ok() {
                            dequeued.fetch_add(1, Ordering::Relaxed);
                        }
                        producer.push(i);
                    }
                } else if id % 2 == 0 {
                    for i in 0..ops_per_thread {
                        producer.push(i);
                    }
                } else {
                    for _ in 0..ops_per_thread {
                        if consumer.try_pop().is_ok() {
                            dequeued.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        })
        .collect();

    ready.wait();
    let start = Instant::now();
    for handle in handles {
        handle.join().unwrap();
    }
    let elapsed = start.elapsed();
    black_box(dequeued.load(Ordering::Relaxed));
    elapsed
}

/// Thread ramp over the mixed workload
fn bench_throughput(c: &mut Criterion) {
    const OPS_PER_THREAD: usize = 50_000;

    let mut group = c.benchmark_group("heavy_concurrent");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(20);

    let max_threads = thread::available_parallelism().map_or(4, |n| n.get()).max(2);
    let mut threads = 1;
    while threads <= max_threads {
        group.throughput(Throughput::Elements((threads * OPS_PER_THREAD) as u64));
        group.bench_with_input(BenchmarkId::new("threads", threads), &threads, |b, &threads| {
            b.iter_custom(|iters| {
                (0..iters)
                    .map(|_| heavy_concurrent(threads, OPS_PER_THREAD))
                    .sum()
            });
        });
        threads *= 2;
    }

    group.finish();
}

criterion_group!(benches, bench_latency, bench_bulk, bench_fill_drain, bench_throughput);
criterion_main!(benches);
