//! Diversity selector benchmark suite

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use flagbench::most_diverse_subset;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn bench_most_diverse_subset(c: &mut Criterion) {
    let mut group = c.benchmark_group("most_diverse_subset");
    let mut rng = ChaCha8Rng::seed_from_u64(0);

    for (n, k) in [(20usize, 3usize), (200, 10), (1_000, 20)] {
        let values: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..10.0)).collect();
        group.bench_with_input(
            BenchmarkId::new(format!("n{n}"), k),
            &values,
            |b, values| b.iter(|| most_diverse_subset(black_box(values), black_box(k))),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_most_diverse_subset);
criterion_main!(benches);
