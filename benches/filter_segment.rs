use std::hint::black_box;
use criterion::{criterion_group, criterion_main, Criterion};
use evoked::filter::{design, filtfilt, FilterSpec};
use evoked::segment::extract_segment;
use ndarray::Array2;

fn signal(n_ch: usize, n_t: usize) -> Array2<f32> {
    Array2::from_shape_fn((n_ch, n_t), |(c, t)| {
        let t = t as f32 / 250.0;
        (2.0 * std::f32::consts::PI * (3.0 + c as f32) * t).sin() + 0.1 * (t * 97.0).sin()
    })
}

fn bench_design(c: &mut Criterion) {
    let spec = FilterSpec::new(4, 250.0, Some(1.0), Some(30.0));
    c.bench_function("design bandpass order 4 (uncached)", |b| {
        b.iter(|| black_box(design(black_box(&spec)).unwrap().len()))
    });
}

fn bench_filtfilt(c: &mut Criterion) {
    let data = signal(32, 250 * 60);
    c.bench_function("filtfilt bandpass [32×15000]", |b| {
        b.iter(|| {
            let out = filtfilt(black_box(&data), 250.0, 4, Some(1.0), Some(30.0)).unwrap();
            black_box(out[[0, 0]])
        })
    });
}

fn bench_extract(c: &mut Criterion) {
    let data = signal(256, 250 * 60);
    c.bench_function("extract_segment 256 ch, 1 s + 1 s", |b| {
        b.iter(|| {
            let seg = extract_segment(black_box(&data), black_box(30.0), 1.0, 1.0, 250.0).unwrap();
            black_box(seg.ncols())
        })
    });
}

criterion_group!(benches, bench_design, bench_filtfilt, bench_extract);
criterion_main!(benches);
