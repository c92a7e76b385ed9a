//! Seeded subspace k-means.
//!
//! One [`Quantizer`] type serves both quantization roles in the index: the
//! coarse partitioner is a quantizer with a single full-width subspace and
//! `kc` centroids; the product quantizer splits the dimension into `mp`
//! equal subspaces with `kp` centroids each. Training runs Lloyd's
//! algorithm independently per subspace on the corresponding sub-vectors.
//!
//! Everything is deterministic under the caller's seed: initialization
//! draws `k` *distinct* sub-vectors from a seeded shuffle, assignment ties
//! go to the lower centroid index, and empty clusters are re-seeded to the
//! sub-vector farthest from its assigned centroid before the next round.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::simd::l2_sqr;

/// Odd multiplier decorrelating per-subspace RNG streams from the base seed.
const SUBSPACE_SEED_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// Subspace k-means quantizer.
///
/// Create with [`Quantizer::new`], train with [`Quantizer::fit`]; the
/// centroid and assignment views are read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quantizer {
    dim: usize,
    num_subspaces: usize,
    sub_dim: usize,
    k: usize,
    iterations: usize,
    /// `centroids[m][j]` is codeword `j` of subspace `m`, length `sub_dim`.
    centroids: Vec<Vec<Vec<f32>>>,
    /// `assignments[m][n]` is the codeword index of training row `n` in
    /// subspace `m`, from the final assignment pass of `fit`.
    assignments: Vec<Vec<u32>>,
}

impl Quantizer {
    /// Create an untrained quantizer.
    ///
    /// `num_subspaces` must divide `dim`; `iterations` must be at least 1.
    /// `k` is unrestricted here (the coarse role uses bucket counts well
    /// past 256), but [`encode`](Self::encode) requires `k <= 256`.
    pub fn new(dim: usize, num_subspaces: usize, k: usize, iterations: usize) -> Result<Self> {
        if dim == 0 || num_subspaces == 0 {
            return Err(IndexError::OutOfRange(
                "dim and num_subspaces must be at least 1".to_string(),
            ));
        }
        if dim % num_subspaces != 0 {
            return Err(IndexError::OutOfRange(format!(
                "num_subspaces ({num_subspaces}) must divide dim ({dim})"
            )));
        }
        if k == 0 {
            return Err(IndexError::OutOfRange(
                "k must be at least 1".to_string(),
            ));
        }
        if iterations == 0 {
            return Err(IndexError::OutOfRange(
                "iterations must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            dim,
            num_subspaces,
            sub_dim: dim / num_subspaces,
            k,
            iterations,
            centroids: Vec::new(),
            assignments: Vec::new(),
        })
    }

    /// Train `k` centroids per subspace on `num_vectors` rows of `train`.
    ///
    /// `train` is row-major, `num_vectors * dim` floats. Fails with
    /// [`IndexError::InsufficientData`] if some subspace holds fewer than
    /// `k` distinct sub-vectors.
    pub fn fit(&mut self, train: &[f32], num_vectors: usize, seed: u64) -> Result<()> {
        if train.len() != num_vectors * self.dim {
            return Err(IndexError::ShapeMismatch(format!(
                "training buffer holds {} floats, expected {} x {}",
                train.len(),
                num_vectors,
                self.dim
            )));
        }

        let mut centroids = Vec::with_capacity(self.num_subspaces);
        let mut assignments = Vec::with_capacity(self.num_subspaces);

        for m in 0..self.num_subspaces {
            // Gather this subspace's column block so the Lloyd loop streams
            // over contiguous rows.
            let mut sub = Vec::with_capacity(num_vectors * self.sub_dim);
            for i in 0..num_vectors {
                let start = i * self.dim + m * self.sub_dim;
                sub.extend_from_slice(&train[start..start + self.sub_dim]);
            }

            let sub_seed = seed ^ (m as u64).wrapping_mul(SUBSPACE_SEED_MIX);
            let (c, a) = fit_subspace(
                &sub,
                num_vectors,
                self.sub_dim,
                self.k,
                self.iterations,
                sub_seed,
                m,
            )?;
            centroids.push(c);
            assignments.push(a);
        }

        self.centroids = centroids;
        self.assignments = assignments;
        Ok(())
    }

    /// Encode a full-width vector into one codeword index per subspace.
    ///
    /// Only valid after a successful [`fit`](Self::fit). Code elements are
    /// one byte wide throughout the crate, so encoding is only offered for
    /// quantizers with at most 256 codewords per subspace.
    ///
    /// # Panics
    ///
    /// Panics if this quantizer holds more than 256 codewords per
    /// subspace; a codeword index would not fit one byte and `as u8`
    /// truncation must never happen silently.
    #[must_use]
    pub fn encode(&self, vector: &[f32]) -> Vec<u8> {
        debug_assert_eq!(vector.len(), self.dim);
        assert!(self.k <= 256, "codeword indices must fit one byte");
        let mut code = Vec::with_capacity(self.num_subspaces);
        for m in 0..self.num_subspaces {
            let sub = &vector[m * self.sub_dim..(m + 1) * self.sub_dim];
            code.push(self.nearest(m, sub) as u8);
        }
        code
    }

    /// Index of the centroid nearest to `sub_vector` in `subspace`, ties to
    /// the lower index.
    #[must_use]
    pub fn nearest(&self, subspace: usize, sub_vector: &[f32]) -> usize {
        nearest_row(sub_vector, &self.centroids[subspace])
    }

    /// Trained centroids, `[subspace][codeword][component]`.
    #[must_use]
    pub fn centroids(&self) -> &[Vec<Vec<f32>>] {
        &self.centroids
    }

    /// Training-set labels from the final assignment pass, `[subspace][row]`.
    #[must_use]
    pub fn assignments(&self) -> &[Vec<u32>] {
        &self.assignments
    }

    /// Full input dimensionality.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of subspaces.
    #[must_use]
    pub fn num_subspaces(&self) -> usize {
        self.num_subspaces
    }

    /// Width of one subspace.
    #[must_use]
    pub fn sub_dim(&self) -> usize {
        self.sub_dim
    }

    /// Centroids per subspace.
    #[must_use]
    pub fn codebook_size(&self) -> usize {
        self.k
    }
}

/// Lloyd's algorithm over one subspace's rows.
fn fit_subspace(
    data: &[f32],
    n: usize,
    dim: usize,
    k: usize,
    iterations: usize,
    seed: u64,
    subspace: usize,
) -> Result<(Vec<Vec<f32>>, Vec<u32>)> {
    let row = |i: usize| &data[i * dim..(i + 1) * dim];

    // Seeded init: the first k distinct rows of a uniform shuffle.
    // Distinctness is bit-exact so NaN payloads and signed zeros cannot
    // produce duplicate centroids.
    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);
    let mut seen: HashSet<Vec<u32>> = HashSet::with_capacity(k.min(n));
    for &i in &order {
        let bits: Vec<u32> = row(i).iter().map(|x| x.to_bits()).collect();
        if seen.insert(bits) {
            centroids.push(row(i).to_vec());
            if centroids.len() == k {
                break;
            }
        }
    }
    if centroids.len() < k {
        return Err(IndexError::InsufficientData {
            subspace,
            distinct: centroids.len(),
            needed: k,
        });
    }

    let mut labels = vec![0u32; n];
    for _ in 0..iterations {
        // Assignment: nearest centroid, ties to the lower index.
        for (i, label) in labels.iter_mut().enumerate() {
            *label = nearest_row(row(i), &centroids) as u32;
        }

        // Update: coordinate-wise means.
        let mut sums = vec![vec![0.0f32; dim]; k];
        let mut counts = vec![0usize; k];
        for (i, &label) in labels.iter().enumerate() {
            let c = label as usize;
            counts[c] += 1;
            for (s, &x) in sums[c].iter_mut().zip(row(i)) {
                *s += x;
            }
        }
        for c in 0..k {
            if counts[c] > 0 {
                let inv = 1.0 / counts[c] as f32;
                for (dst, s) in centroids[c].iter_mut().zip(&sums[c]) {
                    *dst = s * inv;
                }
            }
        }

        // Empty clusters steal the rows farthest from their assigned
        // centroid, one donor per cluster, before the next assignment.
        if counts.contains(&0) {
            let mut taken = vec![false; n];
            for c in (0..k).filter(|&c| counts[c] == 0) {
                let mut far_i = 0usize;
                let mut far_d = f32::NEG_INFINITY;
                for (i, &label) in labels.iter().enumerate() {
                    if taken[i] {
                        continue;
                    }
                    let d = l2_sqr(row(i), &centroids[label as usize]);
                    if d > far_d {
                        far_d = d;
                        far_i = i;
                    }
                }
                taken[far_i] = true;
                centroids[c] = row(far_i).to_vec();
            }
        }
    }

    Ok((centroids, labels))
}

/// Argmin over centroids by squared L2, ties to the lower index.
fn nearest_row(x: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best = 0usize;
    let mut best_d = f32::INFINITY;
    for (j, c) in centroids.iter().enumerate() {
        let d = l2_sqr(x, c);
        if d < best_d {
            best_d = d;
            best = j;
        }
    }
    best
}
