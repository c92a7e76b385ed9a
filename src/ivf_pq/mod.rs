//! IVF-PQ: Inverted File with Product Quantization.
//!
//! Two ideas combined ([Jégou et al. 2011]):
//!
//! 1. **IVF (Inverted File)**: partition the database into `kc` Voronoi
//!    buckets with a coarse quantizer; a query only scans the `nprobe`
//!    buckets whose centroids are nearest to it.
//! 2. **PQ (Product Quantization)**: split each vector into `mp` equal-width
//!    subspaces and quantize each independently against a 256-entry
//!    codebook, storing one byte per subspace.
//!
//! ## Asymmetric Distance Computation (ADC)
//!
//! The query stays uncompressed. Per query we precompute the distance from
//! each query sub-vector to every codeword ([`DistanceTable`], `mp x kp`
//! floats); the distance to any compressed database vector is then `mp`
//! table lookups:
//!
//! ```text
//! d(query, db) ≈ Σ_m  T[m][code[m]]
//! ```
//!
//! ## Bucket layout
//!
//! Each bucket stores its member ids, their squared distances to the bucket
//! centroid, and their PQ codes in one contiguous byte buffer, all sorted
//! by ascending centroid distance. The scan over a bucket is a streaming
//! pass over `len * mp` bytes, and the members most likely to be true
//! neighbors sit at the low offsets.
//!
//! ## Trade-offs
//!
//! | Parameter       | Raising it                          |
//! |-----------------|-------------------------------------|
//! | `nprobe`        | better recall, slower search        |
//! | `num_buckets`   | finer partitioning, slower training |
//! | `num_codebooks` | more memory, better accuracy        |
//!
//! [Jégou et al. 2011]: https://lear.inrialpes.fr/pubs/2011/JDS11/jegou_searching_with_quantization.pdf

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};

pub mod dtable;
pub mod search;
pub mod trainset;

pub use dtable::DistanceTable;
pub use search::{IvfPqIndex, PostingList};
pub use trainset::TrainsetRecorder;

/// IVF-PQ parameters, immutable after index construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IvfPqConfig {
    /// Database size `N`.
    pub num_vectors: usize,
    /// Vector dimensionality `D`.
    pub dim: usize,
    /// Coarse buckets `kc` (a.k.a. nlist).
    pub num_buckets: usize,
    /// Codewords per subspace `kp`; a power of two at most 256.
    pub codebook_size: usize,
    /// Product subspaces `mp`; must divide `dim`.
    pub num_codebooks: usize,
    /// Buckets probed per query `W`; at most `num_buckets`.
    pub nprobe: usize,
    /// Default candidate budget `L` for [`IvfPqIndex::query`].
    pub candidate_budget: usize,
    /// Emit training/population diagnostics through `tracing`.
    pub verbose: bool,
}

impl IvfPqConfig {
    /// Width of one product subspace (`dim / num_codebooks`).
    #[must_use]
    pub fn sub_dim(&self) -> usize {
        self.dim / self.num_codebooks
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.num_vectors == 0 || self.dim == 0 {
            return Err(IndexError::OutOfRange(
                "num_vectors and dim must be at least 1".to_string(),
            ));
        }
        if self.num_buckets == 0 {
            return Err(IndexError::OutOfRange(
                "num_buckets must be at least 1".to_string(),
            ));
        }
        if self.num_codebooks == 0 || self.dim % self.num_codebooks != 0 {
            return Err(IndexError::OutOfRange(format!(
                "num_codebooks ({}) must divide dim ({})",
                self.num_codebooks, self.dim
            )));
        }
        if !self.codebook_size.is_power_of_two() || self.codebook_size > 256 {
            return Err(IndexError::OutOfRange(format!(
                "codebook_size ({}) must be a power of two at most 256",
                self.codebook_size
            )));
        }
        if self.nprobe == 0 || self.nprobe > self.num_buckets {
            return Err(IndexError::OutOfRange(format!(
                "nprobe ({}) must be in 1..={}",
                self.nprobe, self.num_buckets
            )));
        }
        if self.candidate_budget == 0 || self.candidate_budget > self.num_vectors {
            return Err(IndexError::OutOfRange(format!(
                "candidate_budget ({}) must be in 1..={}",
                self.candidate_budget, self.num_vectors
            )));
        }
        Ok(())
    }
}
