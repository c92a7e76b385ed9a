//! IVF-PQ index: training, population, and search.

use std::collections::HashSet;
use std::io;
use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::ivf_pq::dtable::DistanceTable;
use crate::ivf_pq::trainset::TrainsetRecorder;
use crate::ivf_pq::IvfPqConfig;
use crate::quantizer::Quantizer;
use crate::simd::l2_sqr;

/// Training rows are capped at this many vectors when subsampling.
const TRAIN_SAMPLE_CAP: usize = 200_000;

/// Lloyd iterations for the coarse quantizer.
const COARSE_ITERATIONS: usize = 12;

/// Lloyd iterations for the product quantizer.
const PRODUCT_ITERATIONS: usize = 6;

/// One bucket of the inverted file.
///
/// `ids`, `dists`, and `codes` are index-aligned and sorted by ascending
/// `dists`; `codes` is the members' PQ codes concatenated in that order,
/// `len * mp` bytes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostingList {
    pub(crate) ids: Vec<u32>,
    pub(crate) dists: Vec<f32>,
    pub(crate) codes: Vec<u8>,
}

impl PostingList {
    fn with_capacity(len_hint: usize, mp: usize) -> Self {
        Self {
            ids: Vec::with_capacity(len_hint),
            dists: Vec::with_capacity(len_hint),
            codes: Vec::with_capacity(len_hint * mp),
        }
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// PQ code of the member at `offset`.
    #[inline]
    #[must_use]
    pub fn code(&self, mp: usize, offset: usize) -> &[u8] {
        &self.codes[offset * mp..(offset + 1) * mp]
    }
}

/// Ground-truth tracking state threaded through a traced query.
struct TraceCtx<'a> {
    recorder: &'a mut TrainsetRecorder,
    gt: HashSet<u32>,
    query_id: usize,
}

/// IVF-PQ index over a fixed-size database of dense `f32` vectors.
///
/// Lifecycle: construct, [`train`](Self::train) once,
/// [`populate`](Self::populate), then [`query`](Self::query) freely. A
/// populated index is immutable under `query` and safe to share across
/// threads.
#[derive(Debug)]
pub struct IvfPqIndex {
    config: IvfPqConfig,
    coarse: Option<Quantizer>,
    product: Option<Quantizer>,
    posting: Vec<PostingList>,
    populated: bool,
    trainset: Option<TrainsetRecorder>,
}

impl IvfPqIndex {
    /// Create an empty index from a validated configuration.
    pub fn new(config: IvfPqConfig) -> Result<Self> {
        config.validate()?;
        if config.verbose {
            tracing::info!(kernel = crate::simd::kernel_name(), "distance kernel active");
        }
        Ok(Self {
            config,
            coarse: None,
            product: None,
            posting: Vec::new(),
            populated: false,
            trainset: None,
        })
    }

    /// Create an index that records probe statistics for `num_queries`
    /// traced queries (see [`crate::ivf_pq::trainset`]).
    pub fn with_trainset(config: IvfPqConfig, num_queries: usize) -> Result<Self> {
        let mut index = Self::new(config)?;
        index.trainset = Some(TrainsetRecorder::new(
            num_queries,
            index.config.nprobe,
            index.config.num_buckets,
            index.config.num_codebooks,
        ));
        Ok(index)
    }

    /// Learn the coarse and product codebooks.
    ///
    /// With `need_split` the trainer samples `min(rows, 200_000)` rows
    /// uniformly without replacement, deterministically from `seed`, and
    /// fits both quantizers on that same subset; otherwise it fits on
    /// `data` as-is. Fails with [`IndexError::AlreadyTrained`] on a trained
    /// index and [`IndexError::ShapeMismatch`] if `data` is not whole rows.
    pub fn train(&mut self, data: &[f32], seed: u64, need_split: bool) -> Result<()> {
        if self.is_trained() {
            return Err(IndexError::AlreadyTrained);
        }
        let dim = self.config.dim;
        if data.len() % dim != 0 {
            return Err(IndexError::ShapeMismatch(format!(
                "training buffer of {} floats is not a multiple of dim {}",
                data.len(),
                dim
            )));
        }
        let rows = data.len() / dim;

        let owned;
        let (train_view, nt): (&[f32], usize) = if need_split {
            let nt = rows.min(TRAIN_SAMPLE_CAP);
            let mut ids: Vec<usize> = (0..rows).collect();
            let mut rng = StdRng::seed_from_u64(seed);
            ids.shuffle(&mut rng);
            ids.truncate(nt);

            let mut buf = Vec::with_capacity(nt * dim);
            for &id in &ids {
                buf.extend_from_slice(&data[id * dim..(id + 1) * dim]);
            }
            owned = buf;
            (owned.as_slice(), nt)
        } else {
            (data, rows)
        };

        let mut coarse = Quantizer::new(dim, 1, self.config.num_buckets, COARSE_ITERATIONS)?;
        coarse.fit(train_view, nt, seed)?;

        let mut product = Quantizer::new(
            dim,
            self.config.num_codebooks,
            self.config.codebook_size,
            PRODUCT_ITERATIONS,
        )?;
        product.fit(train_view, nt, seed)?;

        if self.config.verbose {
            tracing::info!(rows = nt, subsampled = need_split, "quantizers trained");
        }
        self.coarse = Some(coarse);
        self.product = Some(product);
        Ok(())
    }

    /// Encode and bucket the database.
    ///
    /// `data` must hold exactly `num_vectors * dim` floats. Every vector is
    /// PQ-encoded and appended to the bucket of its nearest coarse
    /// centroid; each bucket is then finalized in parallel: member
    /// distances to the bucket centroid are computed, the triple
    /// `(ids, dists, codes)` is co-sorted by ascending distance, and the
    /// codes are laid out contiguously. Calling this again rebuilds all
    /// posting state from scratch.
    pub fn populate(&mut self, data: &[f32]) -> Result<()> {
        let (coarse, product) = match (&self.coarse, &self.product) {
            (Some(c), Some(p)) => (c, p),
            _ => return Err(IndexError::NotTrained),
        };

        let dim = self.config.dim;
        let n = self.config.num_vectors;
        let mp = self.config.num_codebooks;
        let kc = self.config.num_buckets;
        if data.len() != n * dim {
            return Err(IndexError::ShapeMismatch(format!(
                "database buffer holds {} floats, expected {} x {}",
                data.len(),
                n,
                dim
            )));
        }

        if self.config.verbose {
            tracing::info!("updating posting lists");
        }

        let codes: Vec<Vec<u8>> = data.par_chunks(dim).map(|row| product.encode(row)).collect();

        let coarse_centroids: &[Vec<f32>] = &coarse.centroids()[0];
        let mut posting: Vec<PostingList> = (0..kc)
            .map(|_| PostingList::with_capacity(n.div_ceil(kc), mp))
            .collect();

        // Serial assignment pass: append order stays deterministic and the
        // per-bucket tasks below never contend.
        for (id, row) in data.chunks(dim).enumerate() {
            let no = coarse.nearest(0, row);
            posting[no].ids.push(id as u32);
            posting[no].dists.push(0.0);
        }

        posting.par_iter_mut().enumerate().for_each(|(no, list)| {
            let centroid = &coarse_centroids[no];
            for (slot, &id) in list.dists.iter_mut().zip(list.ids.iter()) {
                let row = &data[id as usize * dim..(id as usize + 1) * dim];
                *slot = l2_sqr(row, centroid);
            }

            // Stable sort: equal distances keep ascending-id order, so
            // repeated builds are bit-identical.
            let mut order: Vec<usize> = (0..list.len()).collect();
            order.sort_by(|&a, &b| list.dists[a].total_cmp(&list.dists[b]));

            let sorted_ids: Vec<u32> = order.iter().map(|&i| list.ids[i]).collect();
            let sorted_dists: Vec<f32> = order.iter().map(|&i| list.dists[i]).collect();
            let mut sorted_codes = Vec::with_capacity(list.len() * mp);
            for &i in &order {
                sorted_codes.extend_from_slice(&codes[list.ids[i] as usize]);
            }
            list.ids = sorted_ids;
            list.dists = sorted_dists;
            list.codes = sorted_codes;
        });

        if let Some(rec) = self.trainset.as_mut() {
            for (no, list) in posting.iter().enumerate() {
                rec.record_bucket(no, &list.dists);
                rec.record_centroid_code(no, &product.encode(&coarse_centroids[no]));
            }
        }

        self.posting = posting;
        self.populated = true;
        if self.config.verbose {
            tracing::info!(vectors = n, "vectors added");
        }
        Ok(())
    }

    /// Top-`topk` search with the configured candidate budget.
    pub fn query(&self, query: &[f32], topk: usize) -> Result<(Vec<u32>, Vec<f32>)> {
        self.query_with_budget(query, topk, self.config.candidate_budget)
    }

    /// Top-`topk` search gathering at most `budget` candidates.
    ///
    /// Probes the `nprobe` buckets nearest to `query` in ascending centroid
    /// distance, accumulating asymmetric distances by table lookup, then
    /// partial-sorts the candidates. If the probed buckets yield fewer than
    /// `topk` candidates, both returned arrays are empty: the budget ran
    /// out before `topk` was reachable, and callers may retry with a larger
    /// `nprobe`.
    pub fn query_with_budget(
        &self,
        query: &[f32],
        topk: usize,
        budget: usize,
    ) -> Result<(Vec<u32>, Vec<f32>)> {
        self.run(query, topk, budget, None)
    }

    /// [`query_with_budget`](Self::query_with_budget) plus probe recording.
    ///
    /// `gt` holds the true nearest-neighbor ids of this query; the recorder
    /// captures where they appear inside each probed bucket. `query_id`
    /// must be below the query count given to
    /// [`with_trainset`](Self::with_trainset). Returns exactly what the
    /// untraced query would. When recording is disabled this is equivalent
    /// to `query_with_budget`.
    pub fn query_traced(
        &mut self,
        query: &[f32],
        gt: &[u32],
        topk: usize,
        budget: usize,
        query_id: usize,
    ) -> Result<(Vec<u32>, Vec<f32>)> {
        let Some(mut recorder) = self.trainset.take() else {
            return self.run(query, topk, budget, None);
        };
        if query_id >= recorder.num_queries() {
            let limit = recorder.num_queries();
            self.trainset = Some(recorder);
            return Err(IndexError::OutOfRange(format!(
                "query_id ({query_id}) must be below the configured query count ({limit})"
            )));
        }
        let result = self.run(
            query,
            topk,
            budget,
            Some(TraceCtx {
                recorder: &mut recorder,
                gt: gt.iter().copied().collect(),
                query_id,
            }),
        );
        self.trainset = Some(recorder);
        result
    }

    fn run(
        &self,
        query: &[f32],
        topk: usize,
        budget: usize,
        mut trace: Option<TraceCtx<'_>>,
    ) -> Result<(Vec<u32>, Vec<f32>)> {
        let product = match (&self.product, self.populated) {
            (Some(p), true) => p,
            _ => return Err(IndexError::NotTrained),
        };
        let dim = self.config.dim;
        if query.len() != dim {
            return Err(IndexError::ShapeMismatch(format!(
                "query holds {} floats, expected {}",
                query.len(),
                dim
            )));
        }
        if topk == 0 || topk > budget || budget > self.config.num_vectors {
            return Err(IndexError::OutOfRange(format!(
                "need 1 <= topk ({topk}) <= budget ({budget}) <= num_vectors ({})",
                self.config.num_vectors
            )));
        }

        let dtable = DistanceTable::build(query, product.centroids());

        if let Some(t) = trace.as_mut() {
            t.recorder.record_query_code(t.query_id, &product.encode(query));
        }

        let coarse_centroids = self.coarse_centroids();
        let mut coarse_scores: Vec<(u32, f32)> = coarse_centroids
            .iter()
            .enumerate()
            .map(|(no, centroid)| (no as u32, l2_sqr(query, centroid)))
            .collect();
        partial_sort_ascending(&mut coarse_scores, self.config.nprobe);

        let mp = self.config.num_codebooks;
        let mut candidates: Vec<(u32, f32)> = Vec::with_capacity(budget);

        for (probe, &(no, coarse_dist)) in coarse_scores.iter().enumerate() {
            let list = &self.posting[no as usize];
            let len = list.len();

            match trace.as_mut() {
                None => {
                    for offset in 0..len {
                        candidates.push((list.ids[offset], dtable.adc(list.code(mp, offset))));
                    }
                }
                Some(t) => {
                    // Track the span of true-neighbor hits inside this
                    // bucket; no hit leaves the (1.0, 0.0) sentinel.
                    let mut leftmost = len;
                    let mut rightmost = 0usize;
                    for offset in 0..len {
                        let id = list.ids[offset];
                        if t.gt.contains(&id) {
                            leftmost = leftmost.min(offset);
                            rightmost = rightmost.max(offset);
                        }
                        candidates.push((id, dtable.adc(list.code(mp, offset))));
                    }
                    let (l, r) = if len > 0 {
                        (leftmost as f32 / len as f32, rightmost as f32 / len as f32)
                    } else {
                        (1.0, 0.0)
                    };
                    t.recorder.record_probe(t.query_id, probe, l, r, coarse_dist);
                }
            }
        }

        if candidates.len() < topk {
            return Ok((Vec::new(), Vec::new()));
        }
        partial_sort_ascending(&mut candidates, topk);
        Ok(candidates.into_iter().unzip())
    }

    /// Export recorded probe statistics (see [`crate::ivf_pq::trainset`]).
    ///
    /// Fails with [`io::ErrorKind::Unsupported`] if the index was built
    /// without recording.
    pub fn export_trainset(&self, stem: impl AsRef<Path>) -> io::Result<()> {
        match &self.trainset {
            Some(rec) => rec.write(stem.as_ref()),
            None => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "trainset recording was not enabled for this index",
            )),
        }
    }

    /// The configuration this index was built with.
    #[must_use]
    pub fn config(&self) -> &IvfPqConfig {
        &self.config
    }

    /// Whether codebooks have been learned.
    #[must_use]
    pub fn is_trained(&self) -> bool {
        self.coarse.is_some()
    }

    /// Whether the database has been encoded and bucketed.
    #[must_use]
    pub fn is_populated(&self) -> bool {
        self.populated
    }

    /// Number of coarse buckets.
    #[must_use]
    pub fn num_buckets(&self) -> usize {
        self.config.num_buckets
    }

    /// Coarse centroids (`kc` rows of `dim` floats); empty before training.
    #[must_use]
    pub fn coarse_centroids(&self) -> &[Vec<f32>] {
        self.coarse
            .as_ref()
            .map(|q| q.centroids()[0].as_slice())
            .unwrap_or(&[])
    }

    /// Product codebooks, `[subspace][codeword][component]`; empty before
    /// training.
    #[must_use]
    pub fn product_centroids(&self) -> &[Vec<Vec<f32>>] {
        self.product
            .as_ref()
            .map(|q| q.centroids())
            .unwrap_or(&[])
    }

    /// Member ids of bucket `no`, ascending by distance to its centroid.
    #[must_use]
    pub fn bucket_ids(&self, no: usize) -> &[u32] {
        &self.posting[no].ids
    }

    /// Member distances to the centroid of bucket `no`, ascending.
    #[must_use]
    pub fn bucket_dists(&self, no: usize) -> &[f32] {
        &self.posting[no].dists
    }

    /// Concatenated PQ codes of bucket `no`, `len * mp` bytes in member
    /// order.
    #[must_use]
    pub fn bucket_codes(&self, no: usize) -> &[u8] {
        &self.posting[no].codes
    }
}

/// Rearrange `scores` so its first `k` entries are the `k` smallest by
/// distance, ascending, then drop the rest.
fn partial_sort_ascending(scores: &mut Vec<(u32, f32)>, k: usize) {
    let k = k.min(scores.len());
    if k == 0 {
        scores.clear();
        return;
    }
    if k < scores.len() {
        scores.select_nth_unstable_by(k - 1, |a, b| a.1.total_cmp(&b.1));
        scores.truncate(k);
    }
    scores.sort_unstable_by(|a, b| a.1.total_cmp(&b.1));
}
