mod fixtures;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};

use cyberloss_sim::config::ServiceConfig;
use cyberloss_sim::engine::{CancellationToken, SimulationEngine};

use fixtures::{ground_up_spec, scalar_only_spec, vectorized_eligible_spec, LARGE, MEDIUM, SMALL};

// ── Group 1: iterations — ground-up mode scaling with iteration count ───────

fn bench_iteration_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("iterations");
    for (name, scenario) in [("small", &SMALL), ("medium", &MEDIUM), ("large", &LARGE)] {
        if name == "large" {
            group.sample_size(10);
        }
        group.throughput(Throughput::Elements(scenario.iterations as u64));
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.iter_batched(
                || (ground_up_spec(scenario, 42, true), CancellationToken::new()),
                |(spec, token)| SimulationEngine::run(&spec, &ServiceConfig::canonical(), None, &token).unwrap(),
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

// ── Group 2: sequential_vs_parallel — worker pool payoff ─────────────────────

fn bench_sequential_vs_parallel(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential_vs_parallel");
    group.sample_size(10);
    group.throughput(Throughput::Elements(MEDIUM.iterations as u64));
    for parallel in [false, true] {
        let label = if parallel { "parallel" } else { "sequential" };
        group.bench_function(BenchmarkId::from_parameter(label), |b| {
            b.iter_batched(
                || (ground_up_spec(&MEDIUM, 42, parallel), CancellationToken::new()),
                |(spec, token)| SimulationEngine::run(&spec, &ServiceConfig::canonical(), None, &token).unwrap(),
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

// ── Group 3: vectorized_vs_scalar — financial fast path payoff ───────────────

fn bench_vectorized_vs_scalar(c: &mut Criterion) {
    let mut group = c.benchmark_group("vectorized_vs_scalar");
    group.throughput(Throughput::Elements(MEDIUM.iterations as u64));
    group.bench_function("vectorized", |b| {
        b.iter_batched(
            || (vectorized_eligible_spec(&MEDIUM, 7), CancellationToken::new()),
            |(spec, token)| SimulationEngine::run(&spec, &ServiceConfig::canonical(), None, &token).unwrap(),
            BatchSize::LargeInput,
        )
    });
    group.bench_function("scalar", |b| {
        b.iter_batched(
            || (scalar_only_spec(&MEDIUM, 7), CancellationToken::new()),
            |(spec, token)| SimulationEngine::run(&spec, &ServiceConfig::canonical(), None, &token).unwrap(),
            BatchSize::LargeInput,
        )
    });
    group.finish();
}

// ── Group 4: batch_size — chunking granularity ───────────────────────────────

fn bench_batch_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_size");
    group.throughput(Throughput::Elements(MEDIUM.iterations as u64));
    for &batch_size in &[100usize, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(batch_size), &batch_size, |b, &bs| {
            b.iter_batched(
                || {
                    let mut scenario = MEDIUM;
                    scenario.batch_size = bs;
                    (ground_up_spec(&scenario, 42, true), CancellationToken::new())
                },
                |(spec, token)| SimulationEngine::run(&spec, &ServiceConfig::canonical(), None, &token).unwrap(),
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_iteration_scaling,
    bench_sequential_vs_parallel,
    bench_vectorized_vs_scalar,
    bench_batch_size,
);
criterion_main!(benches);
