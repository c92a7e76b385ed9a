//! Benchmarks for the hot kernels of IVF-PQ search.
//!
//! The squared-L2 kernel dominates training and the coarse sweep; the ADC
//! table scan dominates bucket traversal. Both are measured here.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::prelude::*;

use quiver::ivf_pq::DistanceTable;
use quiver::simd::{l2_sqr, l2_sqr_scalar};

fn random_vector(dim: usize, rng: &mut StdRng) -> Vec<f32> {
    (0..dim).map(|_| rng.random_range(-1.0f32..1.0)).collect()
}

fn bench_l2_sqr(c: &mut Criterion) {
    let mut group = c.benchmark_group("l2_sqr");
    let mut rng = StdRng::seed_from_u64(42);

    for dim in [8, 64, 128, 256, 768, 1536] {
        let a = random_vector(dim, &mut rng);
        let b = random_vector(dim, &mut rng);

        group.throughput(Throughput::Elements(dim as u64));
        group.bench_with_input(BenchmarkId::new("dispatch", dim), &dim, |bench, _| {
            bench.iter(|| l2_sqr(black_box(&a), black_box(&b)));
        });
        group.bench_with_input(BenchmarkId::new("scalar", dim), &dim, |bench, _| {
            bench.iter(|| l2_sqr_scalar(black_box(&a), black_box(&b)));
        });
    }
    group.finish();
}

fn bench_adc_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("adc_scan");
    let mut rng = StdRng::seed_from_u64(42);

    let mp = 16;
    let kp = 256;
    let dim = 128;
    let sub_dim = dim / mp;

    let books: Vec<Vec<Vec<f32>>> = (0..mp)
        .map(|_| (0..kp).map(|_| random_vector(sub_dim, &mut rng)).collect())
        .collect();
    let query = random_vector(dim, &mut rng);
    let table = DistanceTable::build(&query, &books);

    for bucket_len in [100usize, 1_000, 10_000] {
        let codes: Vec<u8> = (0..bucket_len * mp).map(|_| rng.random()).collect();

        group.throughput(Throughput::Elements(bucket_len as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(bucket_len),
            &bucket_len,
            |bench, &len| {
                bench.iter(|| {
                    let mut acc = 0.0f32;
                    for i in 0..len {
                        acc += table.adc(black_box(&codes[i * mp..(i + 1) * mp]));
                    }
                    acc
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_l2_sqr, bench_adc_scan);
criterion_main!(benches);
