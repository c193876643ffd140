use criterion::{black_box, criterion_group, criterion_main, Criterion};
use medformat::cmp::{decode_block, encode_block, EncodeOptions};

fn synthetic_samples(n: usize) -> Vec<i32> {
    (0..n as i32).map(|i| 1000 + (i * 7) % 53 - 26).collect()
}

fn bench_cmp(c: &mut Criterion) {
    let samples = synthetic_samples(10_000);
    let options = EncodeOptions::default();

    c.bench_function("cmp_encode_10k_samples", |b| {
        b.iter(|| encode_block(black_box(&samples), 0, 0, &options, None).unwrap())
    });

    let block = encode_block(&samples, 0, 0, &options, None).unwrap();
    c.bench_function("cmp_decode_10k_samples", |b| {
        b.iter(|| decode_block(black_box(&block), None).unwrap())
    });

    let detrended = EncodeOptions {
        detrend: true,
        ..EncodeOptions::default()
    };
    c.bench_function("cmp_encode_10k_samples_detrended", |b| {
        b.iter(|| encode_block(black_box(&samples), 0, 0, &detrended, None).unwrap())
    });
}

criterion_group!(benches, bench_cmp);
criterion_main!(benches);
