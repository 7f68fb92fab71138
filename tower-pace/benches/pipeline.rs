use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use criterion::BenchmarkGroup;
use criterion::Criterion;
use criterion::criterion_group;
use criterion::criterion_main;
use criterion::measurement::WallTime;
use futures::stream::FuturesUnordered;
use futures::stream::StreamExt;
use http::Request;
use http::Response;
use http_body_util::Full;
use tower::BoxError;
use tower::Service;
use tower::ServiceBuilder;
use tower::ServiceExt;
use tower::service_fn;
use tower::util::BoxCloneSyncService;
use tower_pace::Credentials;
use tower_pace::Pacer;
use tower_pace::RetryConfig;
use tower_pace::ServiceBuilderExt;

// --- HELPERS & TYPES ---

type BenchService = BoxCloneSyncService<Request<Full<Bytes>>, Response<Bytes>, BoxError>;

async fn echo_handler(req: Request<Bytes>) -> Result<Response<Bytes>, BoxError> {
    Ok(Response::new(req.into_body()))
}

fn request() -> Request<Full<Bytes>> {
    Request::post("https://platform.invalid/v1/echo")
        .body(Full::new(Bytes::from_static(b"{\"ping\":true}")))
        .unwrap()
}

/// A pacer that never makes anyone wait.
fn unbounded_pacer() -> Arc<Pacer> {
    Arc::new(Pacer::default().with_refill_interval(Duration::ZERO))
}

/// Generic runner for single-call overhead benchmarks
fn bench_overhead(
    group: &mut BenchmarkGroup<WallTime>,
    rt: &tokio::runtime::Runtime,
    id: &str,
    svc: BenchService,
) {
    group.bench_function(id, |b| {
        b.to_async(rt).iter(|| {
            let mut s = svc.clone();
            async move {
                let res = s.ready().await.unwrap().call(request()).await;
                black_box(res)
            }
        });
    });
}

/// Generic runner for burst/contention benchmarks
fn bench_burst(
    group: &mut BenchmarkGroup<WallTime>,
    rt: &tokio::runtime::Runtime,
    id: &str,
    svc: BenchService,
    burst_size: usize,
) {
    group.bench_function(id, |b| {
        b.to_async(rt).iter(|| {
            let s = svc.clone();
            async move {
                let mut futures = FuturesUnordered::new();
                for _ in 0..burst_size {
                    let local_svc = s.clone();
                    futures.push(local_svc.oneshot(request()));
                }
                while let Some(res) = futures.next().await {
                    let _ = black_box(res);
                }
            }
        });
    });
}

// --- MAIN BENCHMARK ---

fn bench_all_scenarios(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(8)
        .enable_all()
        .build()
        .unwrap();
    let _guard = rt.enter();

    let burst_size = 1000;
    let credentials = Credentials::bearer("bench-token").unwrap();

    let scenarios: Vec<(&str, BenchService)> = vec![
        (
            "baseline",
            BoxCloneSyncService::new(
                ServiceBuilder::new()
                    .map_request(|req: Request<Full<Bytes>>| {
                        let (parts, _) = req.into_parts();
                        Request::from_parts(parts, Bytes::new())
                    })
                    .service(service_fn(echo_handler)),
            ),
        ),
        (
            "paced",
            BoxCloneSyncService::new(
                ServiceBuilder::new()
                    .paced(unbounded_pacer(), RetryConfig::default())
                    .service(service_fn(echo_handler)),
            ),
        ),
        (
            "paced_with_credentials",
            BoxCloneSyncService::new(
                ServiceBuilder::new()
                    .bearer(credentials)
                    .paced(unbounded_pacer(), RetryConfig::default())
                    .service(service_fn(echo_handler)),
            ),
        ),
    ];

    let mut overhead_group = c.benchmark_group("Pipeline Overhead");
    for (id, svc) in &scenarios {
        bench_overhead(&mut overhead_group, &rt, id, svc.clone());
    }
    overhead_group.finish();

    let mut contention_group = c.benchmark_group("Shared Pacer (1000 Tasks)");
    for (id, svc) in &scenarios {
        bench_burst(&mut contention_group, &rt, id, svc.clone(), burst_size);
    }
    contention_group.finish();
}

criterion_group!(benches, bench_all_scenarios);
criterion_main!(benches);
