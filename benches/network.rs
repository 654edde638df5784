//! Criterion benchmarks for the synmod step driver.
//!
//! Run with:
//!   cargo bench
//!   cargo bench --features parallel
//!
//! Results are saved to target/criterion/

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use synmod::config::NetworkConfig;
use synmod::network::{ExecutionTier, Network, Stimulus};
use synmod::observer::NullSink;
use synmod::state::NetworkState;

fn make_network(hidden: usize, connectivity: usize, seed: u64) -> Network {
    let cfg = NetworkConfig::with_sizes(16, hidden, 8)
        .with_initial_connectivity(connectivity)
        .with_seed(seed);
    match Network::with_sink(cfg, std::sync::Arc::new(NullSink)) {
        Ok(net) => net,
        Err(e) => panic!("bench config rejected: {e}"),
    }
}

fn stimulus(i: usize) -> Stimulus {
    let inputs = (0..16).map(|k| ((i + k) as f32 * 0.37).sin()).collect();
    Stimulus::new(inputs)
}

/// step() with varying hidden pool sizes.
fn bench_step_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("step_size");

    for size in [32, 128, 512, 1024].iter() {
        let connectivity = (*size as f64).sqrt() as usize;
        group.throughput(Throughput::Elements(*size as u64));

        group.bench_with_input(BenchmarkId::new("scalar", size), size, |b, &size| {
            let mut net = make_network(size, connectivity, 42);
            net.set_execution_tier(ExecutionTier::Scalar);
            let mut i = 0;

            b.iter(|| {
                i += 1;
                let report = net.step(&stimulus(i), 0.5);
                black_box(report.modulated)
            });
        });
    }

    group.finish();
}

/// step() comparing execution tiers at a fixed size.
fn bench_step_tiers(c: &mut Criterion) {
    let mut group = c.benchmark_group("step_tier");

    for tier in [ExecutionTier::Scalar, ExecutionTier::Parallel] {
        group.bench_function(format!("{tier:?}_512"), |b| {
            let mut net = make_network(512, 16, 42);
            net.set_execution_tier(tier);
            let mut i = 0;

            b.iter(|| {
                i += 1;
                black_box(net.step(&stimulus(i), 0.5).flagged)
            });
        });
    }

    group.finish();
}

/// Binary image encode/decode of a mid-sized network.
fn bench_state_image(c: &mut Criterion) {
    let mut net = make_network(256, 16, 7);
    for i in 0..20 {
        net.step(&stimulus(i), 0.25);
    }
    let state = net.snapshot();
    let bytes = match state.to_image_bytes() {
        Ok(b) => b,
        Err(e) => panic!("encode failed: {e}"),
    };

    let mut group = c.benchmark_group("state_image");
    group.throughput(Throughput::Bytes(bytes.len() as u64));
    group.bench_function("encode", |b| {
        b.iter(|| black_box(state.to_image_bytes().map(|v| v.len()).unwrap_or(0)))
    });
    group.bench_function("decode", |b| {
        b.iter(|| black_box(NetworkState::load_image_from(&mut bytes.as_slice()).is_ok()))
    });
    group.finish();
}

criterion_group!(benches, bench_step_sizes, bench_step_tiers, bench_state_image);
criterion_main!(benches);
