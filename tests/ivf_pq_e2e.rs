//! End-to-end tests for the IVF-PQ index.
//!
//! Covers retrieval behavior on constructed datasets, structural checks on
//! a populated index, determinism across rebuilds, and the probe-statistics
//! export.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use quiver::simd::l2_sqr;
use quiver::{IvfPqConfig, IvfPqIndex};

// =============================================================================
// Helpers
// =============================================================================

fn config(n: usize, dim: usize, kc: usize, kp: usize, mp: usize, nprobe: usize) -> IvfPqConfig {
    IvfPqConfig {
        num_vectors: n,
        dim,
        num_buckets: kc,
        codebook_size: kp,
        num_codebooks: mp,
        nprobe,
        candidate_budget: n,
        verbose: false,
    }
}

fn random_data(n: usize, dim: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n * dim).map(|_| rng.random_range(-1.0f32..1.0)).collect()
}

/// Exact top-k by squared L2, ties to the lower id.
fn brute_force_topk(data: &[f32], dim: usize, q: &[f32], k: usize) -> Vec<(u32, f32)> {
    let mut all: Vec<(u32, f32)> = data
        .chunks(dim)
        .enumerate()
        .map(|(i, row)| (i as u32, l2_sqr(q, row)))
        .collect();
    all.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    all.truncate(k);
    all
}

fn built_index(data: &[f32], cfg: IvfPqConfig, seed: u64) -> IvfPqIndex {
    let mut index = IvfPqIndex::new(cfg).expect("config");
    index.train(data, seed, false).expect("train");
    index.populate(data).expect("populate");
    index
}

// =============================================================================
// Retrieval scenarios
// =============================================================================

#[test]
fn identity_retrieval() {
    // 16 points on the diagonal; with 16 codewords per subspace the product
    // codebook reproduces every sub-vector exactly, so the index ranks by
    // true distance and must return the queried point itself.
    let n = 16;
    let dim = 8;
    let data: Vec<f32> = (0..n)
        .flat_map(|i| std::iter::repeat(i as f32).take(dim))
        .collect();

    let index = built_index(&data, config(n, dim, 2, 16, 4, 2), 42);
    let (ids, dists) = index.query(&data[7 * dim..8 * dim], 1).unwrap();
    assert_eq!(ids, vec![7]);
    assert_eq!(dists, vec![0.0]);
}

#[test]
fn two_cluster_recovery() {
    // Four copies of the origin and four copies of (10, ..., 10). The two
    // coarse buckets must partition the data exactly, and a query at the
    // origin must return the four zero vectors.
    let dim = 8;
    let mut data = vec![0.0f32; 4 * dim];
    data.extend(std::iter::repeat(10.0f32).take(4 * dim));

    let index = built_index(&data, config(8, dim, 2, 2, 4, 2), 42);

    let mut sizes: Vec<usize> = (0..2).map(|no| index.bucket_ids(no).len()).collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![4, 4]);
    for no in 0..2 {
        let ids = index.bucket_ids(no);
        assert!(
            ids.iter().all(|&id| id < 4) || ids.iter().all(|&id| id >= 4),
            "bucket {} mixes the clusters: {:?}",
            no,
            ids
        );
    }

    let (mut ids, _) = index.query(&vec![0.0; dim], 4).unwrap();
    ids.sort_unstable();
    assert_eq!(ids, vec![0, 1, 2, 3]);
}

/// Per-subspace codeword values for the exact-codebook grid dataset. Each
/// subspace draws from exactly four distinct pairs, so a 4-codeword product
/// quantizer reproduces every vector exactly.
const SUB_VALS: [[[f32; 2]; 4]; 4] = [
    [[0.0, 0.0], [1.0, 3.0], [5.0, 2.0], [7.0, 7.0]],
    [[2.0, 1.0], [4.0, 4.0], [6.0, 0.0], [3.0, 8.0]],
    [[1.0, 1.0], [9.0, 2.0], [0.0, 5.0], [6.0, 6.0]],
    [[8.0, 0.0], [2.0, 7.0], [5.0, 5.0], [0.0, 3.0]],
];

fn grid_vector(i: usize) -> Vec<f32> {
    let mut v = Vec::with_capacity(8);
    for (m, vals) in SUB_VALS.iter().enumerate() {
        let choice = (i / 4usize.pow(m as u32)) % 4;
        v.extend_from_slice(&vals[choice]);
    }
    v
}

#[test]
fn full_probe_matches_brute_force() {
    // Probing every bucket with an exact codebook must reproduce the
    // brute-force ranking; all coordinates are small integers, so every
    // distance is exact in f32 and the comparison needs no tolerance.
    let n = 1000;
    let dim = 8;
    let data: Vec<f32> = (0..n).flat_map(grid_vector).collect();

    let index = built_index(&data, config(n, dim, 2, 4, 4, 2), 42);

    for qi in [0, 7, 63, 255, 777] {
        let q = grid_vector(qi);
        let (ids, dists) = index.query_with_budget(&q, 10, n).unwrap();
        assert_eq!(ids.len(), 10);

        let exact = brute_force_topk(&data, dim, &q, 10);
        let exact_dists: Vec<f32> = exact.iter().map(|&(_, d)| d).collect();
        assert_eq!(dists, exact_dists, "query {}", qi);
        for (&id, &d) in ids.iter().zip(&dists) {
            let true_d = l2_sqr(&q, &data[id as usize * dim..(id as usize + 1) * dim]);
            assert_eq!(d, true_d, "query {} id {}", qi, id);
        }
    }
}

#[test]
fn budget_exhaustion_returns_empty() {
    // Three vectors near the query, nine far away, one probed bucket: the
    // probe yields 3 candidates, fewer than topk = 10, so the query reports
    // exhaustion with two empty arrays.
    let dim = 8;
    let n = 12;
    let mut data = Vec::with_capacity(n * dim);
    for i in 0..3 {
        data.extend(std::iter::repeat(i as f32).take(dim));
    }
    for i in 0..9 {
        data.extend(std::iter::repeat(1000.0 + i as f32).take(dim));
    }

    let index = built_index(&data, config(n, dim, 2, 2, 4, 1), 42);

    let mut sizes: Vec<usize> = (0..2).map(|no| index.bucket_ids(no).len()).collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![3, 9], "clusters did not separate as expected");

    let q = vec![1.0f32; dim];
    let (ids, dists) = index.query_with_budget(&q, 10, 10).unwrap();
    assert!(ids.is_empty());
    assert!(dists.is_empty());

    // The same query with a reachable topk succeeds.
    let (ids, _) = index.query_with_budget(&q, 3, 10).unwrap();
    assert_eq!(ids.len(), 3);
}

// =============================================================================
// Structural checks on a populated index
// =============================================================================

struct Built {
    data: Vec<f32>,
    index: IvfPqIndex,
}

fn random_built() -> Built {
    let n = 200;
    let dim = 8;
    let data = random_data(n, dim, 7);
    let index = built_index(&data, config(n, dim, 4, 8, 4, 4), 42);
    Built { data, index }
}

#[test]
fn buckets_cover_every_id_exactly_once() {
    let b = random_built();
    let mut seen: Vec<u32> = (0..b.index.num_buckets())
        .flat_map(|no| b.index.bucket_ids(no).iter().copied())
        .collect();
    seen.sort_unstable();
    let expected: Vec<u32> = (0..200).collect();
    assert_eq!(seen, expected);
}

#[test]
fn bucket_arrays_are_aligned_and_sorted() {
    let b = random_built();
    let mp = b.index.config().num_codebooks;
    for no in 0..b.index.num_buckets() {
        let ids = b.index.bucket_ids(no);
        let dists = b.index.bucket_dists(no);
        let codes = b.index.bucket_codes(no);
        assert_eq!(ids.len(), dists.len());
        assert_eq!(codes.len(), ids.len() * mp);
        assert!(
            dists.windows(2).all(|w| w[0] <= w[1]),
            "bucket {} distances are not ascending",
            no
        );
    }
}

#[test]
fn members_sit_in_their_nearest_bucket() {
    let b = random_built();
    let dim = b.index.config().dim;
    let centroids = b.index.coarse_centroids();
    for no in 0..b.index.num_buckets() {
        for &id in b.index.bucket_ids(no) {
            let row = &b.data[id as usize * dim..(id as usize + 1) * dim];
            let mut best = 0usize;
            let mut best_d = f32::INFINITY;
            for (j, c) in centroids.iter().enumerate() {
                let d = l2_sqr(row, c);
                if d < best_d {
                    best_d = d;
                    best = j;
                }
            }
            assert_eq!(best, no, "vector {} bucketed away from its centroid", id);
        }
    }
}

#[test]
fn stored_distances_match_the_kernel() {
    let b = random_built();
    let dim = b.index.config().dim;
    let centroids = b.index.coarse_centroids();
    for no in 0..b.index.num_buckets() {
        for (&id, &d) in b.index.bucket_ids(no).iter().zip(b.index.bucket_dists(no)) {
            let row = &b.data[id as usize * dim..(id as usize + 1) * dim];
            assert_eq!(d, l2_sqr(row, &centroids[no]));
        }
    }
}

#[test]
fn stored_codes_are_nearest_codeword_quantizations() {
    let b = random_built();
    let dim = b.index.config().dim;
    let mp = b.index.config().num_codebooks;
    let sub_dim = dim / mp;
    let books = b.index.product_centroids();

    for no in 0..b.index.num_buckets() {
        let ids = b.index.bucket_ids(no);
        let codes = b.index.bucket_codes(no);
        for (i, &id) in ids.iter().enumerate() {
            let row = &b.data[id as usize * dim..(id as usize + 1) * dim];
            for m in 0..mp {
                let sub = &row[m * sub_dim..(m + 1) * sub_dim];
                let mut best = 0usize;
                let mut best_d = f32::INFINITY;
                for (ks, word) in books[m].iter().enumerate() {
                    let d = l2_sqr(sub, word);
                    if d < best_d {
                        best_d = d;
                        best = ks;
                    }
                }
                assert_eq!(
                    codes[i * mp + m] as usize,
                    best,
                    "vector {} subspace {}",
                    id,
                    m
                );
            }
        }
    }
}

#[test]
fn recall_does_not_drop_with_more_probes() {
    let n = 200;
    let dim = 8;
    let kc = 4;
    let data = random_data(n, dim, 7);
    let queries = random_data(20, dim, 8);

    let mut recalls = Vec::new();
    for nprobe in [1, kc] {
        let index = built_index(&data, config(n, dim, kc, 8, 4, nprobe), 42);
        let mut hits = 0usize;
        let mut total = 0usize;
        for q in queries.chunks(dim) {
            let exact: Vec<u32> = brute_force_topk(&data, dim, q, 10)
                .into_iter()
                .map(|(id, _)| id)
                .collect();
            let (ids, _) = index.query_with_budget(q, 10, n).unwrap();
            hits += ids.iter().filter(|id| exact.contains(*id)).count();
            total += exact.len();
        }
        recalls.push(hits as f64 / total as f64);
    }
    assert!(
        recalls[1] >= recalls[0],
        "recall fell from {} to {} when probing all buckets",
        recalls[0],
        recalls[1]
    );
}

// =============================================================================
// Determinism
// =============================================================================

#[test]
fn rebuilds_are_bit_identical() {
    let n = 200;
    let dim = 8;
    let data = random_data(n, dim, 7);
    let queries = random_data(5, dim, 8);

    let a = built_index(&data, config(n, dim, 4, 8, 4, 2), 42);
    let b = built_index(&data, config(n, dim, 4, 8, 4, 2), 42);

    assert_eq!(a.coarse_centroids(), b.coarse_centroids());
    assert_eq!(a.product_centroids(), b.product_centroids());
    for no in 0..a.num_buckets() {
        assert_eq!(a.bucket_ids(no), b.bucket_ids(no));
        assert_eq!(a.bucket_dists(no), b.bucket_dists(no));
        assert_eq!(a.bucket_codes(no), b.bucket_codes(no));
    }

    for q in queries.chunks(dim) {
        let ra = a.query_with_budget(q, 10, n).unwrap();
        let rb = b.query_with_budget(q, 10, n).unwrap();
        assert_eq!(ra, rb);
        // And a repeated query on the same index is a pure read.
        assert_eq!(ra, a.query_with_budget(q, 10, n).unwrap());
    }
}

#[test]
fn different_seeds_may_differ_but_stay_valid() {
    let n = 100;
    let dim = 8;
    let data = random_data(n, dim, 3);

    for seed in [1, 2, 3] {
        let index = built_index(&data, config(n, dim, 4, 8, 4, 4), seed);
        let total: usize = (0..index.num_buckets())
            .map(|no| index.bucket_ids(no).len())
            .sum();
        assert_eq!(total, n);
    }
}

// =============================================================================
// Probe-statistics recording
// =============================================================================

fn read_matrix_f32(path: &std::path::Path) -> (usize, usize, Vec<f32>) {
    let bytes = std::fs::read(path).expect("read matrix");
    let rows = i32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
    let cols = i32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
    let values = bytes[8..]
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
        .collect::<Vec<f32>>();
    assert_eq!(values.len(), rows * cols);
    (rows, cols, values)
}

fn read_matrix_i32(path: &std::path::Path) -> (usize, usize, Vec<i32>) {
    let bytes = std::fs::read(path).expect("read matrix");
    let rows = i32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
    let cols = i32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
    let values = bytes[8..]
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
        .collect::<Vec<i32>>();
    assert_eq!(values.len(), rows * cols);
    (rows, cols, values)
}

#[test]
fn trainset_export_has_documented_shapes() {
    let n = 64;
    let dim = 8;
    let kc = 4;
    let mp = 4;
    let nprobe = 2;
    let nq = 3;
    let data = random_data(n, dim, 11);
    let queries = random_data(nq, dim, 12);

    let mut index =
        IvfPqIndex::with_trainset(config(n, dim, kc, 8, mp, nprobe), nq).unwrap();
    index.train(&data, 42, false).unwrap();
    index.populate(&data).unwrap();

    for (qid, q) in queries.chunks(dim).enumerate() {
        let gt: Vec<u32> = brute_force_topk(&data, dim, q, 10)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        let traced = index.query_traced(q, &gt, 10, n, qid).unwrap();
        // Recording must not change what the query returns.
        let plain = index.query_with_budget(q, 10, n).unwrap();
        assert_eq!(traced, plain);
    }

    let dir = tempfile::tempdir().unwrap();
    let stem = dir.path().join("probe_stats");
    index.export_trainset(&stem).unwrap();

    let (rows, cols, values) = read_matrix_f32(&dir.path().join("probe_stats_l.fvecs"));
    assert_eq!((rows, cols), (nq, nprobe));
    assert!(values.iter().all(|&v| (0.0..=1.0).contains(&v)));

    let (rows, cols, values) = read_matrix_f32(&dir.path().join("probe_stats_r.fvecs"));
    assert_eq!((rows, cols), (nq, nprobe));
    assert!(values.iter().all(|&v| (0.0..=1.0).contains(&v)));

    let (rows, cols, values) = read_matrix_f32(&dir.path().join("probe_stats_distance.fvecs"));
    assert_eq!((rows, cols), (nq, nprobe));
    assert!(values.iter().all(|&v| v >= 0.0));

    let (rows, cols, _) = read_matrix_f32(&dir.path().join("probe_stats_farthest.fvecs"));
    assert_eq!((rows, cols), (kc, 1));

    let (rows, cols, bins) = read_matrix_i32(&dir.path().join("probe_stats_distribution.ivecs"));
    assert_eq!((rows, cols), (kc, 20));
    for no in 0..kc {
        let members: i32 = bins[no * 20..(no + 1) * 20].iter().sum();
        assert_eq!(members as usize, index.bucket_ids(no).len());
    }

    let (rows, cols, codes) = read_matrix_i32(&dir.path().join("probe_stats_querycodes.ivecs"));
    assert_eq!((rows, cols), (nq, mp));
    assert!(codes.iter().all(|&c| (0..256).contains(&c)));

    let (rows, cols, _) = read_matrix_i32(&dir.path().join("probe_stats_centroidcodes.ivecs"));
    assert_eq!((rows, cols), (kc, mp));
}

#[test]
fn export_without_recording_is_unsupported() {
    let n = 16;
    let dim = 8;
    let data: Vec<f32> = random_data(n, dim, 5);
    let index = built_index(&data, config(n, dim, 2, 4, 4, 2), 42);

    let dir = tempfile::tempdir().unwrap();
    let err = index.export_trainset(dir.path().join("x")).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::Unsupported);
}
