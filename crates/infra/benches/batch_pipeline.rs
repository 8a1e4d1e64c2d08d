use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use geoip_core::{BatchId, GeoRecord};
use geoip_infra::batch::BatchOrchestrator;
use geoip_infra::lookup::{
    GeoProvider, InMemoryGeoCache, InMemoryGeoRecordStore, LookupResolver, ProviderError,
};
use geoip_infra::progress::{InMemoryProgressBackend, ProgressStore};

/// Provider with a fixed simulated network latency.
struct LatencyProvider {
    latency: Duration,
}

#[async_trait]
impl GeoProvider for LatencyProvider {
    async fn lookup(&self, ip: IpAddr) -> Result<GeoRecord, ProviderError> {
        tokio::time::sleep(self.latency).await;
        Ok(GeoRecord::unknown(ip.to_string()))
    }
}

fn orchestrator(concurrency: usize) -> (BatchOrchestrator, ProgressStore) {
    let progress = ProgressStore::new(
        Arc::new(InMemoryProgressBackend::new()),
        Duration::from_secs(3600),
    );
    let resolver = LookupResolver::new(
        Arc::new(InMemoryGeoCache::new()),
        Arc::new(InMemoryGeoRecordStore::new()),
        Arc::new(LatencyProvider {
            latency: Duration::from_millis(1),
        }),
        Duration::from_secs(3600),
    );
    (
        BatchOrchestrator::new(resolver, progress.clone(), concurrency),
        progress,
    )
}

fn addresses(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| format!("10.{}.{}.{}", (i >> 16) & 0xff, (i >> 8) & 0xff, i & 0xff))
        .collect()
}

fn bench_fan_out(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("batch_fan_out");
    group.sample_size(20);

    for &size in &[50usize, 200] {
        let batch = addresses(size);
        group.throughput(Throughput::Elements(size as u64));

        for &concurrency in &[1usize, 5, 20] {
            group.bench_with_input(
                BenchmarkId::new(format!("concurrency_{concurrency}"), size),
                &batch,
                |b, batch| {
                    b.iter(|| {
                        rt.block_on(async {
                            // Fresh cache each run so every address reaches the provider.
                            let (orchestrator, progress) = orchestrator(concurrency);
                            let id = BatchId::new();
                            progress.create(id, batch.len() as u64).await.expect("seed");
                            orchestrator.run(id, batch).await.expect("run")
                        })
                    });
                },
            );
        }
    }

    group.finish();
}

fn bench_progress_increments(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    c.bench_function("progress_increment_x100", |b| {
        b.iter(|| {
            rt.block_on(async {
                let progress = ProgressStore::new(
                    Arc::new(InMemoryProgressBackend::new()),
                    Duration::from_secs(3600),
                );
                let id = BatchId::new();
                progress.create(id, 100).await.expect("seed");
                for _ in 0..100 {
                    progress.increment(id).await.expect("increment");
                }
            })
        });
    });
}

criterion_group!(benches, bench_fan_out, bench_progress_increments);
criterion_main!(benches);
