use criterion::{black_box, criterion_group, criterion_main, Criterion};
use eon_core::codec::{build_sync_packet, decode_packet, quantize_bit1, quantize_int8};

fn bench_quantize_int8(c: &mut Criterion) {
    let m: Vec<f32> = (0..4096).map(|i| (i as f32 * 0.01).sin()).collect();
    c.bench_function("quantize_int8_n4096", |b| {
        b.iter(|| quantize_int8(black_box(&m)));
    });
}

fn bench_build_sync_packet(c: &mut Criterion) {
    let m: Vec<f32> = (0..4096).map(|i| (i as f32 * 0.01).sin()).collect();
    let q = quantize_bit1(&m);
    c.bench_function("build_sync_packet_k4096", |b| {
        b.iter(|| build_sync_packet(black_box(42), black_box(&q)).unwrap());
    });
}

fn bench_decode_packet(c: &mut Criterion) {
    let m: Vec<f32> = (0..4096).map(|i| (i as f32 * 0.01).sin()).collect();
    let q = quantize_bit1(&m);
    let bytes = build_sync_packet(42, &q).unwrap();
    c.bench_function("decode_packet_k4096", |b| {
        b.iter(|| decode_packet(black_box(4096), black_box(&bytes)).unwrap());
    });
}

criterion_group!(
    benches,
    bench_quantize_int8,
    bench_build_sync_packet,
    bench_decode_packet
);
criterion_main!(benches);
