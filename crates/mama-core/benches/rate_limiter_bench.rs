//! Measures RateLimiter admission overhead under an always-open token
//! bucket (no pacing, no retries) so the number reflects queue/semaphore
//! bookkeeping rather than sleeps.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mama_core::atoms::error::EngineError;
use mama_core::rate_limiter::{RateLimiter, RateLimiterConfig};
use tokio::runtime::Runtime;

fn bench_enqueue(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("rate_limiter_enqueue");

    for queue_size in [16usize, 256, 4096] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(queue_size), &queue_size, |b, &queue_size| {
            let limiter = RateLimiter::new(RateLimiterConfig {
                max_requests_per_minute: u32::MAX,
                min_interval_ms: 0,
                max_queue_size: queue_size,
                request_timeout_ms: 5_000,
                max_retries: 0,
            });
            b.to_async(&rt).iter(|| {
                let limiter = limiter.clone();
                async move { limiter.enqueue(|| async { Ok::<_, EngineError>(()) }).await.unwrap() }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_enqueue);
criterion_main!(benches);
