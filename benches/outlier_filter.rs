//! Outlier filter and stability gate benchmark suite
//!
//! Timing batches are drawn from a seeded generator: a narrow band around one second with
//! a few slow spikes, which is what a run loop sees on a busy machine.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use flagbench::stats::{is_stable, remove_outliers};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn timing_batch(len: usize, seed: u64) -> Vec<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..len)
        .map(|_| {
            let t = 1.0 + rng.gen_range(-0.02..0.02);
            if rng.gen_bool(0.05) {
                t * 3.0
            } else {
                t
            }
        })
        .collect()
}

fn bench_remove_outliers(c: &mut Criterion) {
    let mut group = c.benchmark_group("remove_outliers");
    for len in [5usize, 50, 500, 5_000] {
        let batch = timing_batch(len, 42);
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &batch, |b, batch| {
            b.iter(|| remove_outliers(black_box(batch), black_box(0.1)))
        });
    }
    group.finish();
}

fn bench_filter_then_gate(c: &mut Criterion) {
    // One auto-mode step: filter the batch so far and decide whether to stop.
    let batch = timing_batch(50, 7);
    c.bench_function("filter_then_gate_50", |b| {
        b.iter(|| {
            let kept = remove_outliers(black_box(&batch), 0.1);
            is_stable(&kept, 0.05)
        })
    });
}

criterion_group!(benches, bench_remove_outliers, bench_filter_then_gate);
criterion_main!(benches);
