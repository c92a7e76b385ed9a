//! Side-channel statistics for offline analysis of probe behavior.
//!
//! When recording is enabled the index captures, per query and per probed
//! bucket, where in the bucket the true neighbors actually appeared, plus
//! per-bucket distance distributions and the PQ codes of queries and coarse
//! centroids. The artifacts feed offline tooling that studies how deep into
//! each bucket a scan must go; they never influence query results.
//!
//! ## Export format
//!
//! Each matrix is one file: a header of `(rows, cols)` as two little-endian
//! `i32`, followed by `rows * cols` little-endian `f32` or `i32` values.
//! Float matrices use the `.fvecs` extension, int matrices `.ivecs`:
//!
//! | file                       | shape      | content                                   |
//! |----------------------------|------------|-------------------------------------------|
//! | `{stem}_l.fvecs`           | `nq x W`   | leftmost hit offset / bucket length       |
//! | `{stem}_r.fvecs`           | `nq x W`   | rightmost hit offset / bucket length      |
//! | `{stem}_distance.fvecs`    | `nq x W`   | squared distance to the probed centroid   |
//! | `{stem}_farthest.fvecs`    | `kc x 1`   | max member-to-centroid distance           |
//! | `{stem}_distribution.ivecs`| `kc x 20`  | member-to-centroid distance histogram     |
//! | `{stem}_querycodes.ivecs`  | `nq x mp`  | PQ code of each query                     |
//! | `{stem}_centroidcodes.ivecs`| `kc x mp` | PQ code of each coarse centroid           |

use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Bins in the per-bucket distance histogram.
pub const HISTOGRAM_BINS: usize = 20;

/// Accumulates probe statistics across a fixed number of queries.
///
/// Sized up front from `(nq, W, kc, mp)`; rows are overwritten in place, so
/// re-running populate or a query id simply replaces the earlier record.
#[derive(Debug, Clone)]
pub struct TrainsetRecorder {
    nq: usize,
    nprobe: usize,
    num_buckets: usize,
    num_codebooks: usize,
    left: Vec<f32>,
    right: Vec<f32>,
    coarse_dist: Vec<f32>,
    farthest: Vec<f32>,
    distribution: Vec<i32>,
    query_codes: Vec<i32>,
    centroid_codes: Vec<i32>,
}

impl TrainsetRecorder {
    pub(crate) fn new(nq: usize, nprobe: usize, num_buckets: usize, num_codebooks: usize) -> Self {
        Self {
            nq,
            nprobe,
            num_buckets,
            num_codebooks,
            left: vec![0.0; nq * nprobe],
            right: vec![0.0; nq * nprobe],
            coarse_dist: vec![0.0; nq * nprobe],
            farthest: vec![0.0; num_buckets],
            distribution: vec![0; num_buckets * HISTOGRAM_BINS],
            query_codes: vec![0; nq * num_codebooks],
            centroid_codes: vec![0; num_buckets * num_codebooks],
        }
    }

    /// Expected number of queries.
    #[must_use]
    pub fn num_queries(&self) -> usize {
        self.nq
    }

    /// Record the hit span observed while scanning probe number `probe` of
    /// query `query_id`. `left`/`right` are already normalized to `[0, 1]`.
    pub(crate) fn record_probe(
        &mut self,
        query_id: usize,
        probe: usize,
        left: f32,
        right: f32,
        coarse_dist: f32,
    ) {
        let at = query_id * self.nprobe + probe;
        self.left[at] = left;
        self.right[at] = right;
        self.coarse_dist[at] = coarse_dist;
    }

    pub(crate) fn record_query_code(&mut self, query_id: usize, code: &[u8]) {
        debug_assert_eq!(code.len(), self.num_codebooks);
        let base = query_id * self.num_codebooks;
        for (slot, &c) in self.query_codes[base..base + code.len()].iter_mut().zip(code) {
            *slot = i32::from(c);
        }
    }

    pub(crate) fn record_centroid_code(&mut self, bucket: usize, code: &[u8]) {
        debug_assert_eq!(code.len(), self.num_codebooks);
        let base = bucket * self.num_codebooks;
        for (slot, &c) in self.centroid_codes[base..base + code.len()]
            .iter_mut()
            .zip(code)
        {
            *slot = i32::from(c);
        }
    }

    /// Record a bucket's member-to-centroid distances (ascending order):
    /// the max and a 20-bin histogram over `[0, max]`.
    pub(crate) fn record_bucket(&mut self, bucket: usize, dists: &[f32]) {
        let base = bucket * HISTOGRAM_BINS;
        self.distribution[base..base + HISTOGRAM_BINS].fill(0);

        let far = dists.last().copied().unwrap_or(0.0);
        self.farthest[bucket] = far;

        if far > 0.0 {
            for &d in dists {
                let bin = ((d / far) * HISTOGRAM_BINS as f32) as usize;
                self.distribution[base + bin.min(HISTOGRAM_BINS - 1)] += 1;
            }
        } else {
            // Every member coincides with the centroid (or the bucket is
            // empty); the whole mass sits in the first bin.
            self.distribution[base] += dists.len() as i32;
        }
    }

    /// Write all seven matrices next to `stem` (e.g. stem `out/sift` yields
    /// `out/sift_l.fvecs`, `out/sift_distribution.ivecs`, ...).
    pub fn write(&self, stem: &Path) -> io::Result<()> {
        let path = |suffix: &str| -> PathBuf {
            let mut name = OsString::from(stem.as_os_str());
            name.push(suffix);
            PathBuf::from(name)
        };

        write_matrix_f32(&path("_l.fvecs"), self.nq, self.nprobe, &self.left)?;
        write_matrix_f32(&path("_r.fvecs"), self.nq, self.nprobe, &self.right)?;
        write_matrix_f32(
            &path("_distance.fvecs"),
            self.nq,
            self.nprobe,
            &self.coarse_dist,
        )?;
        write_matrix_f32(&path("_farthest.fvecs"), self.num_buckets, 1, &self.farthest)?;
        write_matrix_i32(
            &path("_distribution.ivecs"),
            self.num_buckets,
            HISTOGRAM_BINS,
            &self.distribution,
        )?;
        write_matrix_i32(
            &path("_querycodes.ivecs"),
            self.nq,
            self.num_codebooks,
            &self.query_codes,
        )?;
        write_matrix_i32(
            &path("_centroidcodes.ivecs"),
            self.num_buckets,
            self.num_codebooks,
            &self.centroid_codes,
        )
    }
}

fn write_header(w: &mut impl Write, rows: usize, cols: usize) -> io::Result<()> {
    w.write_all(&(rows as i32).to_le_bytes())?;
    w.write_all(&(cols as i32).to_le_bytes())
}

fn write_matrix_f32(path: &Path, rows: usize, cols: usize, values: &[f32]) -> io::Result<()> {
    debug_assert_eq!(values.len(), rows * cols);
    let mut w = BufWriter::new(File::create(path)?);
    write_header(&mut w, rows, cols)?;
    for v in values {
        w.write_all(&v.to_le_bytes())?;
    }
    w.flush()
}

fn write_matrix_i32(path: &Path, rows: usize, cols: usize, values: &[i32]) -> io::Result<()> {
    debug_assert_eq!(values.len(), rows * cols);
    let mut w = BufWriter::new(File::create(path)?);
    write_header(&mut w, rows, cols)?;
    for v in values {
        w.write_all(&v.to_le_bytes())?;
    }
    w.flush()
}
