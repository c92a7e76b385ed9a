//! Per-query distance table for asymmetric distance computation.

use crate::simd::l2_sqr;

/// Flat `mp x kp` table of squared distances from a query's sub-vectors to
/// every product codeword, stored row-major as `data[m * kp + ks]`.
///
/// Built once per query; the asymmetric distance of any PQ code is then
/// one table lookup per subspace, summed.
#[derive(Debug, Clone)]
pub struct DistanceTable {
    kp: usize,
    data: Vec<f32>,
}

impl DistanceTable {
    /// Build the table for `query` against `codebooks`
    /// (`[subspace][codeword][component]`, as exported by the product
    /// quantizer).
    #[must_use]
    pub fn build(query: &[f32], codebooks: &[Vec<Vec<f32>>]) -> Self {
        let mp = codebooks.len();
        debug_assert!(mp > 0);
        let kp = codebooks[0].len();
        let sub_dim = query.len() / mp;

        let mut data = Vec::with_capacity(mp * kp);
        for (m, book) in codebooks.iter().enumerate() {
            let sub = &query[m * sub_dim..(m + 1) * sub_dim];
            for word in book {
                data.push(l2_sqr(sub, word));
            }
        }
        Self { kp, data }
    }

    /// Entry for codeword `ks` of subspace `m`.
    #[inline]
    #[must_use]
    pub fn get(&self, m: usize, ks: usize) -> f32 {
        self.data[m * self.kp + ks]
    }

    /// Asymmetric distance of one PQ code: `Σ_m T[m][code[m]]`.
    #[inline]
    #[must_use]
    pub fn adc(&self, code: &[u8]) -> f32 {
        let mut dist = 0.0f32;
        for (m, &ks) in code.iter().enumerate() {
            dist += self.data[m * self.kp + ks as usize];
        }
        dist
    }
}
