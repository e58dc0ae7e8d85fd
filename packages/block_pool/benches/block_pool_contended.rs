//! Benchmarks for `block_pool` under contention from multiple threads.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use block_pool::BlockPool;
use criterion::{Criterion, criterion_group, criterion_main};
use new_zealand::nz;

criterion_group!(benches, entrypoint);
criterion_main!(benches);

const THREAD_COUNTS: [usize; 3] = [2, 4, 8];

fn entrypoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_pool_contended");

    for thread_count in THREAD_COUNTS {
        group.bench_function(format!("allocate_deallocate_{thread_count}_threads"), |b| {
            b.iter_custom(|iters| {
                let pool = Arc::new(BlockPool::new(32, nz!(256)).unwrap());

                run_contended(thread_count, iters, move || {
                    let block = black_box(pool.allocate().unwrap());
                    pool.deallocate(block);
                })
            });
        });

        group.bench_function(format!("growth_{thread_count}_threads"), |b| {
            b.iter_custom(|iters| {
                // Small chunks, so that threads keep meeting at the growth lock.
                let pool = Arc::new(BlockPool::new(32, nz!(4)).unwrap());

                let elapsed = run_contended(thread_count, iters, {
                    let pool = Arc::clone(&pool);
                    move || {
                        // The handle is leaked on purpose, the pool reclaims it when dropped.
                        _ = black_box(pool.allocate().unwrap());
                    }
                });

                drop(pool);
                elapsed
            });
        });
    }

    group.finish();
}

/// Runs `op` `iters` times on each of `thread_count` threads, all released at the same moment,
/// and returns the mean time a thread took to complete its iterations.
fn run_contended<F>(thread_count: usize, iters: u64, op: F) -> Duration
where
    F: Fn() + Send + Sync + 'static,
{
    let op = Arc::new(op);
    let barrier = Arc::new(Barrier::new(thread_count));

    let handles = (0..thread_count)
        .map(|_| {
            let op = Arc::clone(&op);
            let barrier = Arc::clone(&barrier);

            thread::spawn(move || {
                barrier.wait();

                let start = Instant::now();

                for _ in 0..iters {
                    op();
                }

                start.elapsed()
            })
        })
        .collect::<Vec<_>>();

    let total = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .sum::<Duration>();

    total / u32::try_from(thread_count).unwrap()
}
