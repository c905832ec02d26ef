use criterion::{criterion_group, criterion_main, Criterion};
use eml_core::codec::{self, encrypt_rows};
use eml_core::he::{matrix, SimulatedContext};
use eml_core::train::{run_training, NesterovConfig, NoopSink};

fn bench_training(c: &mut Criterion) {
    let ctx = SimulatedContext::from_seed(7);
    let rows: Vec<Vec<f64>> = (0..64).map(|i| vec![i as f64 / 64.0, 1.0 - i as f64 / 64.0]).collect();
    let targets: Vec<Vec<f64>> = rows.iter().map(|r| vec![2.0 * r[0] - r[1] + 0.5]).collect();
    let x = encrypt_rows(&ctx, &rows);
    let y = encrypt_rows(&ctx, &targets);
    let config = NesterovConfig {
        learning_rate: 0.03,
        momentum: 0.9,
        epochs: 10,
        seed: Some(1),
    };

    c.bench_function("nesterov_64x2_10_epochs", |b| {
        b.iter(|| run_training(&ctx, &config, &x, &y, &mut NoopSink))
    });

    let xm = x.to_matrix().unwrap();
    let w = matrix::encrypt_matrix(&ctx, &nalgebra::DMatrix::from_element(2, 1, 0.5));
    c.bench_function("matmul_64x2_by_2x1", |b| b.iter(|| matrix::matmul(&xm, &w)));

    let json = codec::serialize(&x).unwrap();
    c.bench_function("deserialize_64x2", |b| b.iter(|| codec::deserialize(&ctx, &json)));
}

criterion_group!(benches, bench_training);
criterion_main!(benches);
