//! IVF-PQ quickstart: train, populate, query, and compare against brute
//! force on a small synthetic dataset.
//!
//! ```bash
//! cargo run --example quickstart --release
//! ```

use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use quiver::simd::{kernel_name, l2_sqr};
use quiver::{IvfPqConfig, IvfPqIndex};

fn main() -> quiver::Result<()> {
    let n = 20_000;
    let dim = 64;
    let num_queries = 100;
    let topk = 10;

    println!("quiver quickstart");
    println!("=================");
    println!("distance kernel: {}\n", kernel_name());

    let mut rng = StdRng::seed_from_u64(1);
    let data: Vec<f32> = (0..n * dim).map(|_| rng.random_range(-1.0f32..1.0)).collect();
    let queries: Vec<f32> = (0..num_queries * dim)
        .map(|_| rng.random_range(-1.0f32..1.0))
        .collect();

    let config = IvfPqConfig {
        num_vectors: n,
        dim,
        num_buckets: 128,
        codebook_size: 256,
        num_codebooks: 8,
        nprobe: 16,
        candidate_budget: 4_096,
        verbose: false,
    };
    let mut index = IvfPqIndex::new(config)?;

    let t = Instant::now();
    index.train(&data, 42, true)?;
    println!("trained in {:?}", t.elapsed());

    let t = Instant::now();
    index.populate(&data)?;
    println!("populated {} vectors in {:?}", n, t.elapsed());

    let t = Instant::now();
    let mut hits = 0usize;
    for q in queries.chunks(dim) {
        let (ids, _) = index.query(q, topk)?;

        let mut exact: Vec<(u32, f32)> = data
            .chunks(dim)
            .enumerate()
            .map(|(i, row)| (i as u32, l2_sqr(q, row)))
            .collect();
        exact.sort_by(|a, b| a.1.total_cmp(&b.1));
        exact.truncate(topk);

        hits += ids
            .iter()
            .filter(|id| exact.iter().any(|(eid, _)| eid == *id))
            .count();
    }
    let elapsed = t.elapsed();

    println!(
        "{} queries in {:?} ({:.0} us/query, brute-force comparison included)",
        num_queries,
        elapsed,
        elapsed.as_micros() as f64 / num_queries as f64
    );
    println!(
        "recall@{}: {:.3}",
        topk,
        hits as f64 / (num_queries * topk) as f64
    );

    Ok(())
}
