use criterion::{black_box, criterion_group, criterion_main, Criterion};
use webaudio_bridge::elements::audioconvert::{deinterleave_channels, interleave_channels, LinearResampler};

pub fn criterion_benchmark(c: &mut Criterion) {
    let left: Vec<f32> = (0..128).map(|i| (i as f32 * 0.01).sin()).collect();
    let right: Vec<f32> = left.iter().map(|s| -s).collect();

    c.bench_function("interleave_channels(128 frames)", |b| {
        b.iter(|| interleave_channels(black_box(&[left.as_slice(), right.as_slice()])))
    });

    let interleaved = interleave_channels(&[&left, &right]);
    c.bench_function("deinterleave_channels(128 frames)", |b| {
        b.iter(|| deinterleave_channels(black_box(&interleaved), 2))
    });

    c.bench_function("LinearResampler 44100 -> 48000", |b| {
        let mut resampler = LinearResampler::new(44100, 48000, 2);
        let planes = vec![left.clone(), right.clone()];
        b.iter(|| resampler.process(black_box(&planes)))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
