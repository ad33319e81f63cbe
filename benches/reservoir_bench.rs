use criterion::{black_box, criterion_group, criterion_main, Criterion};
use eon_core::config::Config;
use eon_core::fixed_reservoir::FixedReservoir;
use eon_core::reservoir::{Reservoir, ReservoirCore};

fn bench_float_update(c: &mut Criterion) {
    let cfg = Config {
        reservoir_size: 1000,
        input_size: 32,
        output_size: 1,
        ..Config::default()
    };
    let mut r = Reservoir::new(&cfg, 42).unwrap();
    let input = vec![0.5; 32];
    c.bench_function("reservoir_update_n1000", |b| {
        b.iter(|| r.update(black_box(&input)).unwrap());
    });
}

fn bench_fixed_update(c: &mut Criterion) {
    let cfg = Config {
        reservoir_size: 200,
        input_size: 32,
        output_size: 1,
        fixed_point: true,
        ..Config::default()
    };
    let mut r = FixedReservoir::new(&cfg, 42).unwrap();
    let input = vec![0.5; 32];
    c.bench_function("fixed_reservoir_update_n200", |b| {
        b.iter(|| r.update(black_box(&input)).unwrap());
    });
}

fn bench_construction(c: &mut Criterion) {
    let cfg = Config {
        reservoir_size: 1000,
        input_size: 32,
        output_size: 1,
        ..Config::default()
    };
    c.bench_function("reservoir_construction_n1000", |b| {
        b.iter(|| Reservoir::new(black_box(&cfg), 42).unwrap());
    });
}

fn bench_train(c: &mut Criterion) {
    let cfg = Config {
        reservoir_size: 100,
        input_size: 1,
        output_size: 1,
        ..Config::default()
    };
    let inputs: Vec<Vec<f32>> = (0..600).map(|i| vec![(i as f32 * 0.05).sin()]).collect();
    let targets: Vec<Vec<f32>> = inputs.iter().map(|u| vec![u[0] * 0.5]).collect();

    c.bench_function("reservoir_train_n100_600samples", |b| {
        b.iter(|| {
            let mut r = Reservoir::new(&cfg, 7).unwrap();
            r.train(black_box(&inputs), black_box(&targets), 20, 1e-4, None)
                .unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_float_update,
    bench_fixed_update,
    bench_construction,
    bench_train
);
criterion_main!(benches);
