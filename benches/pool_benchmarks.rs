use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use job_pool::{Config as PoolConfig, ExecutionContext, JobPoolInner};
use std::hint::black_box;
use tokio::time::Duration;

fn create_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .enable_all()
        .build()
        .unwrap()
}

async fn noop(_ctx: ExecutionContext, i: usize) -> anyhow::Result<()> {
    black_box(i);
    Ok(())
}

fn blocking_noop(_ctx: ExecutionContext, i: usize) -> anyhow::Result<()> {
    black_box(i);
    Ok(())
}

// Benchmark 1: submit + run + stop
fn bench_submit_overhead(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_overhead");

    for size in [100, 1000, 10000] {
        group.throughput(Throughput::Elements(size as u64));

        for (label, timeout) in [("with_timeout", true), ("no_timeout", false)] {
            group.bench_with_input(BenchmarkId::new(label, size), &size, |b, &size| {
                let rt = create_runtime();
                b.to_async(&rt).iter(|| async move {
                    let pool = JobPoolInner::with_config(PoolConfig {
                        enable_timeout: timeout,
                        job_timeout: Duration::from_secs(5),
                        ..PoolConfig::io_bound()
                    });
                    pool.start();
                    for i in 0..size {
                        pool.add_job(noop, i, "bench").await.unwrap();
                    }
                    pool.stop().await;
                    black_box(pool.state());
                });
            });
        }

        // tokio baseline
        group.bench_with_input(BenchmarkId::new("tokio_spawn", size), &size, |b, &size| {
            let rt = create_runtime();
            b.to_async(&rt).iter(|| async move {
                let handles: Vec<_> = (0..size)
                    .map(|i| tokio::spawn(async move { black_box(i) }))
                    .collect();
                for handle in handles {
                    black_box(handle.await.unwrap());
                }
            });
        });
    }

    group.finish();
}

// Benchmark 2: пропускная способность в зависимости от числа воркеров
fn bench_worker_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("worker_scaling");
    group.sample_size(20);
    let tasks = 2000;
    group.throughput(Throughput::Elements(tasks as u64));

    for workers in [1, 2, 4, 8, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, &workers| {
            let rt = create_runtime();
            b.to_async(&rt).iter(|| async move {
                let pool = JobPoolInner::with_config(PoolConfig {
                    num_workers: workers,
                    queue_capacity: 64,
                    ..Default::default()
                });
                pool.start();
                for i in 0..tasks {
                    pool.add_job(
                        |_ctx: ExecutionContext, i: usize| async move {
                            tokio::time::sleep(Duration::from_micros(50)).await;
                            black_box(i);
                            Ok::<_, anyhow::Error>(())
                        },
                        i,
                        "sleep",
                    )
                    .await
                    .unwrap();
                }
                pool.stop().await;
            });
        });
    }

    group.finish();
}

// Benchmark 3: блокирующие задачи
fn bench_blocking_jobs(c: &mut Criterion) {
    let mut group = c.benchmark_group("blocking_jobs");
    group.sample_size(20);

    group.bench_function("1000_blocking", |b| {
        let rt = create_runtime();
        b.to_async(&rt).iter(|| async {
            let pool = JobPoolInner::with_config(PoolConfig::cpu_bound());
            pool.start();
            for i in 0..1000 {
                pool.add_blocking_job(blocking_noop, i, "blocking").await.unwrap();
            }
            pool.stop().await;
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_submit_overhead,
    bench_worker_scaling,
    bench_blocking_jobs,
);

criterion_main!(benches);
