//! Similarity index over fixed-dimension vectors.
//!
//! [`VectorIndex`] starts as an exact [`FlatIndex`] and migrates once to a
//! clustered inverted-file index ([`IvfIndex`]) when the number of stored
//! vectors first reaches [`IndexConfig::transition_threshold`].
//!
//! Positions are ordinals: the `i`-th vector added is ordinal `i`, and the
//! engine keeps the `i`-th chunk of its document store aligned with it.
//! There is no delete; callers rebuild a fresh index instead.
//!
//! # Transition
//!
//! ```text
//!   FLAT ──(len >= threshold, training ok)──▶ CLUSTERED
//!     ▲                │
//!     └─training fails─┘   (retried on the next add)
//! ```
//!
//! On transition the cluster centroids are trained on every vector added so
//! far, all vectors are bulk-inserted into the inverted lists, and the flat
//! structure is dropped. Later adds go straight to the clustered lists.

mod flat;
mod ivf;
mod kmeans;

pub use flat::FlatIndex;
pub use ivf::IvfIndex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::embedding::similarity_from_distance;
use crate::models::IndexState;

/// Tuning knobs for the index and its one-shot transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Vector count at which the flat index is replaced by a clustered one.
    pub transition_threshold: usize,
    /// Target number of vectors per cluster (`nlist = n / points_per_cluster`).
    pub points_per_cluster: usize,
    /// Upper bound on the number of clusters.
    pub max_clusters: usize,
    /// Number of nearest clusters scanned per query.
    pub nprobe: usize,
    /// Seed for k-means++ initialization, so training is reproducible.
    pub seed: u64,
    /// Maximum Lloyd iterations during training.
    pub max_iterations: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            transition_threshold: 1000,
            points_per_cluster: 10,
            max_clusters: 100,
            nprobe: 10,
            seed: 42,
            max_iterations: 25,
        }
    }
}

/// Index-structure errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndexError {
    #[error("vector has {got} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("cannot train {clusters} clusters from {points} points")]
    TooFewPoints { points: usize, clusters: usize },

    /// A deserialized index whose parts disagree with each other.
    #[error("index is inconsistent: {0}")]
    Inconsistent(String),
}

/// One search result: the ordinal of a stored vector and its squared
/// Euclidean distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub ordinal: usize,
    pub distance: f32,
}

impl SearchHit {
    /// `1 - distance / 2`; equals cosine similarity for unit vectors.
    pub fn similarity(&self) -> f32 {
        similarity_from_distance(self.distance)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Backend {
    Flat(FlatIndex),
    Clustered(IvfIndex),
}

/// Flat-then-clustered similarity index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    dims: usize,
    config: IndexConfig,
    backend: Backend,
}

impl VectorIndex {
    /// Create an empty index in the `Flat` state.
    pub fn new(dims: usize, config: IndexConfig) -> Self {
        Self {
            dims,
            config,
            backend: Backend::Flat(FlatIndex::new(dims)),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        match &self.backend {
            Backend::Flat(flat) => flat.len(),
            Backend::Clustered(ivf) => ivf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state(&self) -> IndexState {
        match &self.backend {
            Backend::Flat(_) => IndexState::Flat,
            Backend::Clustered(_) => IndexState::Clustered,
        }
    }

    /// Number of trained clusters (`0` while flat).
    pub fn cluster_count(&self) -> usize {
        match &self.backend {
            Backend::Flat(_) => 0,
            Backend::Clustered(ivf) => ivf.cluster_count(),
        }
    }

    /// The stored vector at `ordinal`.
    pub fn vector(&self, ordinal: usize) -> Option<&[f32]> {
        match &self.backend {
            Backend::Flat(flat) => flat.get(ordinal),
            Backend::Clustered(ivf) => ivf.get(ordinal),
        }
    }

    /// Check that the backend agrees with the outer dimensions and that
    /// every ordinal it can return addresses a stored vector.
    ///
    /// Indexes built through [`add`](Self::add) always pass; this is for
    /// indexes read back from a snapshot.
    pub fn validate(&self) -> Result<(), IndexError> {
        if self.dims == 0 {
            return Err(IndexError::Inconsistent(
                "index has zero dimensions".to_string(),
            ));
        }
        match &self.backend {
            Backend::Flat(flat) => flat.validate(self.dims),
            Backend::Clustered(ivf) => ivf.validate(self.dims),
        }
    }

    /// Append vectors; they receive the next consecutive ordinals.
    ///
    /// All vectors are validated before any is inserted, so a dimension
    /// mismatch leaves the index untouched.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), IndexError> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                got: bad.len(),
            });
        }

        match &mut self.backend {
            Backend::Flat(flat) => {
                for v in vectors {
                    flat.push(v);
                }
            }
            Backend::Clustered(ivf) => {
                for v in vectors {
                    ivf.push(v);
                }
            }
        }

        self.maybe_transition();
        Ok(())
    }

    /// The `k` nearest stored vectors, ordered by `(distance, ordinal)`.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        if query.len() != self.dims {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                got: query.len(),
            });
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        Ok(match &self.backend {
            Backend::Flat(flat) => flat.search(query, k),
            Backend::Clustered(ivf) => ivf.search(query, k),
        })
    }

    fn maybe_transition(&mut self) {
        let flat = match &self.backend {
            Backend::Flat(flat) if flat.len() >= self.config.transition_threshold => flat,
            _ => return,
        };

        let n = flat.len();
        let clusters = (n / self.config.points_per_cluster.max(1)).min(self.config.max_clusters);

        match IvfIndex::train(flat, clusters, &self.config) {
            Ok(ivf) => {
                debug!(
                    vectors = n,
                    clusters,
                    "vector index switched from flat to clustered"
                );
                self.backend = Backend::Clustered(ivf);
            }
            Err(e) => {
                debug!(error = %e, vectors = n, "clustered index training failed, staying flat");
            }
        }
    }
}

/// Order two hits by distance, then ordinal, for deterministic results.
pub(crate) fn cmp_hits(a: &SearchHit, b: &SearchHit) -> std::cmp::Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| a.ordinal.cmp(&b.ordinal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::l2_normalize;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_vectors(n: usize, dims: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let mut v: Vec<f32> = (0..dims).map(|_| rng.gen_range(-1.0..1.0)).collect();
                l2_normalize(&mut v).unwrap();
                v
            })
            .collect()
    }

    fn small_config(threshold: usize) -> IndexConfig {
        IndexConfig {
            transition_threshold: threshold,
            points_per_cluster: 10,
            max_clusters: 8,
            nprobe: 2,
            ..IndexConfig::default()
        }
    }

    #[test]
    fn test_starts_flat_and_empty() {
        let index = VectorIndex::new(8, IndexConfig::default());
        assert_eq!(index.state(), IndexState::Flat);
        assert!(index.is_empty());
        assert!(index.search(&[0.0; 8], 5).unwrap().is_empty());
    }

    #[test]
    fn test_flat_search_is_exact() {
        let vectors = random_vectors(50, 16, 1);
        let mut index = VectorIndex::new(16, IndexConfig::default());
        index.add(&vectors).unwrap();

        for (i, v) in vectors.iter().enumerate() {
            let hits = index.search(v, 1).unwrap();
            assert_eq!(hits[0].ordinal, i);
            assert!(hits[0].distance < 1e-6);
            assert!((hits[0].similarity() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_search_orders_by_distance() {
        let vectors = random_vectors(30, 8, 2);
        let mut index = VectorIndex::new(8, IndexConfig::default());
        index.add(&vectors).unwrap();
        let hits = index.search(&vectors[3], 10).unwrap();
        assert_eq!(hits.len(), 10);
        for pair in hits.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[test]
    fn test_stays_flat_below_threshold() {
        let vectors = random_vectors(39, 8, 3);
        let mut index = VectorIndex::new(8, small_config(40));
        index.add(&vectors).unwrap();
        assert_eq!(index.len(), 39);
        assert_eq!(index.state(), IndexState::Flat);
    }

    #[test]
    fn test_transitions_at_threshold_and_keeps_vectors() {
        let vectors = random_vectors(40, 8, 4);
        let mut index = VectorIndex::new(8, small_config(40));
        index.add(&vectors[..39]).unwrap();
        assert_eq!(index.state(), IndexState::Flat);

        index.add(&vectors[39..]).unwrap();
        assert_eq!(index.state(), IndexState::Clustered);
        assert_eq!(index.len(), 40);
        assert_eq!(index.cluster_count(), 4);

        for (i, v) in vectors.iter().enumerate() {
            let hits = index.search(v, 1).unwrap();
            assert_eq!(hits[0].ordinal, i, "vector {} lost its self-match", i);
            assert!((hits[0].similarity() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_adds_after_transition_go_to_clusters() {
        let vectors = random_vectors(60, 8, 5);
        let mut index = VectorIndex::new(8, small_config(40));
        index.add(&vectors[..40]).unwrap();
        index.add(&vectors[40..]).unwrap();
        assert_eq!(index.state(), IndexState::Clustered);
        assert_eq!(index.len(), 60);
        let hits = index.search(&vectors[55], 3).unwrap();
        assert_eq!(hits[0].ordinal, 55);
    }

    #[test]
    fn test_clustered_search_returns_k_when_lists_are_small() {
        let vectors = random_vectors(40, 8, 6);
        let mut index = VectorIndex::new(8, small_config(40));
        index.add(&vectors).unwrap();
        let hits = index.search(&vectors[0], 40).unwrap();
        assert_eq!(hits.len(), 40);
    }

    #[test]
    fn test_training_failure_stays_flat_and_retries() {
        let config = IndexConfig {
            transition_threshold: 5,
            points_per_cluster: 10,
            ..IndexConfig::default()
        };
        let vectors = random_vectors(12, 4, 7);
        let mut index = VectorIndex::new(4, config);

        index.add(&vectors[..6]).unwrap();
        assert_eq!(index.state(), IndexState::Flat);

        index.add(&vectors[6..10]).unwrap();
        assert_eq!(index.state(), IndexState::Clustered);
        assert_eq!(index.cluster_count(), 1);
    }

    #[test]
    fn test_dimension_mismatch_rejected_atomically() {
        let mut index = VectorIndex::new(4, IndexConfig::default());
        let err = index
            .add(&[vec![1.0, 0.0, 0.0, 0.0], vec![1.0, 0.0]])
            .unwrap_err();
        assert_eq!(
            err,
            IndexError::DimensionMismatch {
                expected: 4,
                got: 2
            }
        );
        assert!(index.is_empty());
        assert!(index.search(&[1.0], 1).is_err());
    }

    #[test]
    fn test_serde_roundtrip_preserves_state_and_results() {
        let vectors = random_vectors(45, 8, 8);
        let mut index = VectorIndex::new(8, small_config(40));
        index.add(&vectors).unwrap();

        let json = serde_json::to_string(&index).unwrap();
        let restored: VectorIndex = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.state(), IndexState::Clustered);
        assert_eq!(restored.len(), index.len());
        let ordinals = |hits: Vec<SearchHit>| hits.iter().map(|h| h.ordinal).collect::<Vec<_>>();
        assert_eq!(
            ordinals(restored.search(&vectors[10], 5).unwrap()),
            ordinals(index.search(&vectors[10], 5).unwrap())
        );
    }

    #[test]
    fn test_validate_catches_tampered_snapshot() {
        let vectors = random_vectors(45, 8, 9);
        let mut index = VectorIndex::new(8, small_config(40));
        index.add(&vectors).unwrap();
        assert_eq!(index.validate(), Ok(()));
        assert_eq!(VectorIndex::new(8, IndexConfig::default()).validate(), Ok(()));

        let mut json = serde_json::to_value(&index).unwrap();
        let lists = json["backend"]["Clustered"]["lists"].as_array_mut().unwrap();
        let list = lists
            .iter_mut()
            .find(|l| !l.as_array().unwrap().is_empty())
            .unwrap();
        list[0] = serde_json::json!(9999);
        let tampered: VectorIndex = serde_json::from_value(json).unwrap();
        assert_eq!(tampered.len(), index.len());
        assert!(matches!(tampered.validate(), Err(IndexError::Inconsistent(_))));

        let mut json = serde_json::to_value(VectorIndex::new(8, IndexConfig::default())).unwrap();
        json["dims"] = serde_json::json!(4);
        let mismatched: VectorIndex = serde_json::from_value(json).unwrap();
        assert!(mismatched.validate().is_err());

        assert!(VectorIndex::new(0, IndexConfig::default()).validate().is_err());
    }
}
