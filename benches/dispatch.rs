//! Benchmarks for pipeline composition and dispatch hot paths.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use gql_net::pipeline::{compose, CacheConfig, CacheMiddleware, Call, Middleware};
use gql_net::types::{Operation, Request};
use gql_net::Response;
use serde_json::json;

fn ready_terminal() -> Call {
    Arc::new(|_request| {
        Box::pin(async { Ok(Response::from_graphql(json!({ "data": { "n": 1 } }))) })
    })
}

/// Pass-through wrapper, so depth measures pure composition overhead.
struct PassThrough;

impl Middleware for PassThrough {
    fn apply(self: Arc<Self>, next: Call) -> Call {
        Arc::new(move |request| {
            let next = next.clone();
            Box::pin(async move { next(request).await })
        })
    }
}

fn operation() -> Request {
    Request::Single(
        Operation::query("query Viewer { viewer { name } }")
            .with_id("Viewer")
            .with_variable("locale", json!("en")),
    )
}

fn bench_compose_depth(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("compose_depth");
    for depth in [1usize, 4, 16] {
        let policies: Vec<Arc<dyn Middleware>> = (0..depth)
            .map(|_| Arc::new(PassThrough) as Arc<dyn Middleware>)
            .collect();
        let chain = compose(policies, ready_terminal());
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.to_async(&rt).iter(|| {
                let chain = chain.clone();
                async move { chain(operation()).await.unwrap() }
            })
        });
    }
    group.finish();
}

fn bench_cache_hit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let chain = Arc::new(CacheMiddleware::new(CacheConfig::new())).apply(ready_terminal());
    // Warm the entry so every iteration is a hit.
    rt.block_on(async { chain(operation()).await.unwrap() });

    c.bench_function("cache_hit", |b| {
        b.to_async(&rt).iter(|| {
            let chain = chain.clone();
            async move { chain(operation()).await.unwrap() }
        })
    });
}

fn bench_operation_body(c: &mut Criterion) {
    c.bench_function("operation_body", |b| {
        b.iter(|| {
            let op = Operation::query("query Viewer { viewer { name } }")
                .with_id("Viewer")
                .with_variable("locale", json!("en"));
            op.body().unwrap().len()
        })
    });
}

criterion_group!(
    benches,
    bench_compose_depth,
    bench_cache_hit,
    bench_operation_body
);
criterion_main!(benches);
