use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use flakepipe::{
    AtomicResolver, ClockMode, IdPipeline, LocalResolver, MonotonicClock, PipelineBuilder,
    SequenceResolver, TimeSource, next_standalone_sequence,
};
use std::{
    sync::{Arc, Barrier},
    thread::scope,
    time::Instant,
};

#[derive(Clone)]
struct FixedMockTime {
    millis: u64,
}

impl TimeSource for FixedMockTime {
    fn current_millis(&self) -> u64 {
        self.millis
    }
}

// Number of IDs pulled per benchmark iteration (split across threads for the
// contended variants).
const TOTAL_IDS: usize = 4096;

/// Benchmarks a single consumer draining a pipeline that is already warm.
fn bench_pipeline<T>(c: &mut Criterion, group_name: &str, pipeline: IdPipeline<T>)
where
    T: TimeSource,
{
    let mut group = c.benchmark_group(group_name);
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    group.bench_function(format!("elems/{}", TOTAL_IDS), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();

            for _ in 0..iters {
                for _ in 0..TOTAL_IDS {
                    black_box(pipeline.next_id());
                }
            }

            start.elapsed()
        });
    });

    group.finish();
}

/// Benchmarks one pipeline shared by several consumer threads.
fn bench_pipeline_contended<T>(c: &mut Criterion, group_name: &str, pipeline: IdPipeline<T>)
where
    T: TimeSource + Send + Sync,
{
    let mut group = c.benchmark_group(group_name);
    let max_threads = num_cpus::get().max(1);

    for thread_count in [1, 2, 4, 8, 16].into_iter().filter(|&n| n <= max_threads) {
        let ids_per_thread = TOTAL_IDS / thread_count;

        group.throughput(Throughput::Elements(TOTAL_IDS as u64));
        group.bench_function(
            format!("elems/{}/threads/{}", TOTAL_IDS, thread_count),
            |b| {
                b.iter_custom(|iters| {
                    let start = Instant::now();

                    for _ in 0..iters {
                        let barrier = Barrier::new(thread_count + 1);
                        scope(|s| {
                            for _ in 0..thread_count {
                                let pipeline = &pipeline;
                                let barrier = &barrier;
                                s.spawn(move || {
                                    barrier.wait();
                                    for _ in 0..ids_per_thread {
                                        black_box(pipeline.next_id());
                                    }
                                });
                            }
                            barrier.wait();
                        });
                    }

                    start.elapsed()
                });
            },
        );
    }

    group.finish();
}

/// Benchmarks a bare sequence resolver, no queue involved.
fn bench_resolver<R>(c: &mut Criterion, group_name: &str, resolver: R)
where
    R: SequenceResolver,
{
    let mut group = c.benchmark_group(group_name);
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    group.bench_function(format!("elems/{}", TOTAL_IDS), |b| {
        b.iter(|| {
            for _ in 0..TOTAL_IDS {
                black_box(resolver.next_sequence(0));
            }
        });
    });

    group.finish();
}

fn benchmark_mock_virtual(c: &mut Criterion) {
    let pipeline = PipelineBuilder::with_clock(FixedMockTime {
        millis: 1_700_000_000_000,
    })
    .build()
    .unwrap();
    bench_pipeline(c, "mock/virtual", pipeline);
}

fn benchmark_mono_virtual(c: &mut Criterion) {
    let pipeline = IdPipeline::builder().build().unwrap();
    bench_pipeline(c, "mono/virtual", pipeline);
}

fn benchmark_mono_wall(c: &mut Criterion) {
    let pipeline = PipelineBuilder::with_clock(MonotonicClock::new())
        .clock_mode(ClockMode::Wall)
        .build()
        .unwrap();
    bench_pipeline(c, "mono/wall", pipeline);
}

fn benchmark_mono_contended_virtual(c: &mut Criterion) {
    let pipeline = IdPipeline::builder().build().unwrap();
    bench_pipeline_contended(c, "mono/contended/virtual", pipeline);
}

fn benchmark_resolver_local(c: &mut Criterion) {
    bench_resolver(c, "resolver/local", LocalResolver::new());
}

fn benchmark_resolver_atomic(c: &mut Criterion) {
    bench_resolver(c, "resolver/atomic", AtomicResolver::new());
}

fn benchmark_resolver_atomic_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolver/atomic/contended");
    let thread_count = num_cpus::get().max(1);
    let per_thread = TOTAL_IDS / thread_count;

    group.throughput(Throughput::Elements(TOTAL_IDS as u64));
    group.bench_function(format!("elems/{}/threads/{}", TOTAL_IDS, thread_count), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();

            for _ in 0..iters {
                let resolver = Arc::new(AtomicResolver::new());
                scope(|s| {
                    for _ in 0..thread_count {
                        let resolver = Arc::clone(&resolver);
                        s.spawn(move || {
                            for _ in 0..per_thread {
                                black_box(resolver.next_sequence(0));
                            }
                        });
                    }
                });
            }

            start.elapsed()
        });
    });

    group.finish();
}

fn benchmark_standalone_sequence(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolver/standalone");
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    group.bench_function(format!("elems/{}", TOTAL_IDS), |b| {
        b.iter(|| {
            for _ in 0..TOTAL_IDS {
                black_box(next_standalone_sequence(0));
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    // Mock clock
    benchmark_mock_virtual,
    // Monotonic clock
    benchmark_mono_virtual,
    benchmark_mono_wall, // waits for the next millisecond once a tick fills
    benchmark_mono_contended_virtual,
    // Sequence resolvers
    benchmark_resolver_local,
    benchmark_resolver_atomic,
    benchmark_resolver_atomic_contended,
    benchmark_standalone_sequence,
);
criterion_main!(benches);
