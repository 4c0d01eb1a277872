use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rust_smp_system::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const LEN: usize = 1 << 20;

fn benchmark_thread_pool_creation(c: &mut Criterion) {
    c.bench_function("thread_pool_creation", |b| {
        b.iter(|| {
            let pool = ThreadPool::with_threads(4).expect("Failed to create pool");
            pool.shutdown().expect("Failed to shutdown pool");
        });
    });
}

fn benchmark_proxy_round_trip(c: &mut Criterion) {
    let pool = ThreadPool::with_threads(4).expect("Failed to create pool");
    let mut group = c.benchmark_group("proxy_round_trip");

    for jobs in [4usize, 64, 1024] {
        group.throughput(Throughput::Elements(jobs as u64));
        group.bench_with_input(BenchmarkId::from_parameter(jobs), &jobs, |b, &jobs| {
            b.iter(|| {
                let proxy = pool.allocate_threads(0).expect("Failed to allocate proxy");
                for _ in 0..jobs {
                    proxy
                        .submit(|| {
                            black_box(1 + 1);
                            Ok(())
                        })
                        .expect("Failed to submit job");
                }
                proxy.join().expect("Failed to join proxy");
            });
        });
    }

    group.finish();
}

fn benchmark_parallel_for_backends(c: &mut Criterion) {
    let data: Vec<f64> = (0..LEN).map(|i| i as f64).collect();
    let mut group = c.benchmark_group("parallel_for");
    group.throughput(Throughput::Elements(LEN as u64));

    for kind in BackendKind::ALL {
        let api = ToolsApi::new(kind.create());
        for grain in [0usize, 1024, 65_536] {
            group.bench_with_input(
                BenchmarkId::new(kind.name(), grain),
                &grain,
                |b, &grain| {
                    let checksum = AtomicU64::new(0);
                    b.iter(|| {
                        api.parallel_for(0, data.len(), grain, |first, last| {
                            let partial: f64 = data[first..last].iter().map(|x| x.sqrt()).sum();
                            checksum.fetch_add(partial as u64, Ordering::Relaxed);
                            Ok(())
                        })
                        .expect("parallel_for failed");
                    });
                    black_box(checksum.load(Ordering::Relaxed));
                },
            );
        }
    }

    group.finish();
}

fn benchmark_parallel_reduce(c: &mut Criterion) {
    let data: Vec<u64> = (0..LEN as u64).collect();
    let mut group = c.benchmark_group("parallel_reduce");
    group.throughput(Throughput::Elements(LEN as u64));

    group.bench_function("serial", |b| {
        b.iter(|| black_box(data.iter().sum::<u64>()));
    });

    for kind in BackendKind::ALL {
        let api = ToolsApi::new(kind.create());
        group.bench_function(kind.name(), |b| {
            b.iter(|| {
                let sum = api
                    .parallel_reduce(
                        0,
                        data.len(),
                        0,
                        0u64,
                        |first, last, seed| Ok(seed + data[first..last].iter().sum::<u64>()),
                        |a, b| a + b,
                    )
                    .expect("parallel_reduce failed");
                black_box(sum)
            });
        });
    }

    group.finish();
}

fn benchmark_nested_regions(c: &mut Criterion) {
    let mut group = c.benchmark_group("nested_regions");

    for nested in [true, false] {
        let api = Arc::new(ToolsApi::new(BackendKind::StdThread.create()));
        api.set_nested_parallelism(nested);
        group.bench_function(if nested { "enabled" } else { "disabled" }, |b| {
            b.iter(|| {
                let total = AtomicU64::new(0);
                api.parallel_for(0, 64, 1, |_, _| {
                    api.parallel_for(0, 4096, 256, |first, last| {
                        total.fetch_add((last - first) as u64, Ordering::Relaxed);
                        Ok(())
                    })
                })
                .expect("nested parallel_for failed");
                black_box(total.into_inner())
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_thread_pool_creation,
    benchmark_proxy_round_trip,
    benchmark_parallel_for_backends,
    benchmark_parallel_reduce,
    benchmark_nested_regions
);
criterion_main!(benches);
