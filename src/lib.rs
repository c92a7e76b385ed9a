//! quiver: IVF-PQ approximate nearest-neighbor search.
//!
//! An inverted-file index with product quantization (IVF-PQ) for top-k
//! search over dense `f32` vectors under squared Euclidean distance. The
//! database is partitioned into `kc` buckets by a coarse quantizer; each
//! vector is compressed to `mp` bytes by a product quantizer; a query scans
//! only the `nprobe` buckets nearest to it and ranks candidates by table
//! lookups instead of full distance computations.
//!
//! ```text
//! Index time:
//!   vectors -> coarse k-means (buckets) -> per-subspace k-means (codebooks)
//!           -> 1 byte per subspace, buckets sorted by distance to centroid
//!
//! Query time:
//!   query -> distance table (mp x kp) -> probe nprobe nearest buckets
//!         -> sum mp table entries per candidate -> partial top-k
//! ```
//!
//! # Modules
//!
//! - [`simd`]: the squared-L2 kernel, SIMD-dispatched at runtime.
//! - [`quantizer`]: seeded subspace k-means; one type serves both the
//!   coarse (single-subspace) and product (many-subspace) roles.
//! - [`ivf_pq`]: the index itself: configuration, build, and search.
//! - [`error`]: the crate-wide error enum.
//!
//! # Usage
//!
//! ```rust,ignore
//! use quiver::{IvfPqConfig, IvfPqIndex};
//!
//! let config = IvfPqConfig {
//!     num_vectors: 1_000_000,
//!     dim: 128,
//!     num_buckets: 1024,      // kc; sqrt(n) is a good default
//!     codebook_size: 256,     // kp; 256 keeps one byte per subspace
//!     num_codebooks: 16,      // mp; 16 bytes per compressed vector
//!     nprobe: 32,             // buckets scanned per query
//!     candidate_budget: 4096, // candidate buffer capacity
//!     verbose: false,
//! };
//!
//! let mut index = IvfPqIndex::new(config)?;
//! index.train(&data, 42, true)?;
//! index.populate(&data)?;
//! let (ids, dists) = index.query(&query, 10)?;
//! ```
//!
//! # Guarantees
//!
//! - Training and population are deterministic given `(seed, data)`.
//! - A populated index is immutable under `query`; it is `Send + Sync` and
//!   queries may run concurrently from many threads with no locking.
//! - `query` performs no I/O and takes no locks; it allocates only the
//!   per-query distance table and the candidate buffer.
//!
//! # References
//!
//! - Jégou, Douze, Schmid (2011). "Product Quantization for Nearest
//!   Neighbor Search."

pub mod error;
pub mod ivf_pq;
pub mod quantizer;
pub mod simd;

pub use error::{IndexError, Result};
pub use ivf_pq::{DistanceTable, IvfPqConfig, IvfPqIndex};
pub use quantizer::Quantizer;
