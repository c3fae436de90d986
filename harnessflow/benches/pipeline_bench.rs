//! Benchmarks for graph construction and scheduling.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use harnessflow::testing::{TestFixture, TestPipeline};

fn graph_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_build");
    for width in [16, 128, 512] {
        group.bench_with_input(BenchmarkId::new("linear", width), &width, |b, &width| {
            b.iter(|| black_box(TestPipeline::linear("bench", width, "true").build()));
        });
        group.bench_with_input(BenchmarkId::new("wide", width), &width, |b, &width| {
            b.iter(|| black_box(TestPipeline::wide("bench", width, "true").build()));
        });
    }
    group.finish();
}

fn scheduling_benchmark(c: &mut Criterion) {
    let Ok(rt) = tokio::runtime::Runtime::new() else {
        return;
    };
    let mut group = c.benchmark_group("schedule_wide");
    group.sample_size(10);
    for concurrency in [1, 4, 16] {
        let fixture = TestFixture::new().with_concurrency(concurrency);
        group.bench_with_input(BenchmarkId::from_parameter(concurrency), &concurrency, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    let graph = TestPipeline::wide("bench", 32, "true").build();
                    if let Ok(graph) = graph {
                        black_box(fixture.run(graph).await.map(|run| run.exit_code()))
                    } else {
                        black_box(Ok(-1))
                    }
                })
            });
        });
    }
    group.finish();
}

criterion_group!(benches, graph_benchmark, scheduling_benchmark);
criterion_main!(benches);
