//! Benchmarks for spectrum band computation.

use std::{f32::consts::TAU, hint::black_box};

use {
    criterion::{BenchmarkId, Criterion, criterion_group, criterion_main},
    sonance::audio::spectrum::{FFT_SIZE, compute_bands},
};

fn tone(sample_rate: u32, frequency: f32, len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| (TAU * frequency * i as f32 / sample_rate as f32).sin() * 0.8)
        .collect()
}

fn bench_compute_bands(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_bands");
    for sample_rate in [44_100u32, 48_000, 96_000] {
        let samples = tone(sample_rate, 1_000.0, FFT_SIZE * 2);
        group.bench_with_input(
            BenchmarkId::from_parameter(sample_rate),
            &samples,
            |b, samples| b.iter(|| compute_bands(black_box(samples), sample_rate)),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_compute_bands);
criterion_main!(benches);
