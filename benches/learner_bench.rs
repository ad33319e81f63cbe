use criterion::{black_box, criterion_group, criterion_main, Criterion};
use eon_core::config::Config;
use eon_core::learner::{DenseCorrelation, DiagCorrelation, OnlineLearner};
use eon_core::reservoir::Reservoir;

fn bench_dense_observe(c: &mut Criterion) {
    let cfg = Config {
        reservoir_size: 200,
        input_size: 1,
        output_size: 1,
        ..Config::default()
    };
    let mut r = Reservoir::new(&cfg, 42).unwrap();
    let mut learner = OnlineLearner::new(DenseCorrelation::new(200, 1e-2), 0.99, 1e-2);

    c.bench_function("online_learner_observe_dense_n200", |b| {
        b.iter(|| {
            learner
                .observe(black_box(&mut r), &[0.3], &[0.1])
                .unwrap()
        });
    });
}

fn bench_diag_observe(c: &mut Criterion) {
    let cfg = Config {
        reservoir_size: 200,
        input_size: 1,
        output_size: 1,
        ..Config::default()
    };
    let mut r = Reservoir::new(&cfg, 42).unwrap();
    let mut learner = OnlineLearner::new(DiagCorrelation::new(200, 1e-2), 0.99, 1e-2);

    c.bench_function("online_learner_observe_diag_n200", |b| {
        b.iter(|| {
            learner
                .observe(black_box(&mut r), &[0.3], &[0.1])
                .unwrap()
        });
    });
}

criterion_group!(benches, bench_dense_observe, bench_diag_observe);
criterion_main!(benches);
