//! Inverted-file (IVF) index: vectors bucketed under their nearest centroid.
//!
//! Queries rank the centroids, then scan the `nprobe` closest buckets with
//! exact distances. If those buckets hold fewer than `k` vectors the probe
//! widens to further buckets, so a query never returns fewer results than
//! the index can supply.

use serde::{Deserialize, Serialize};

use super::flat::FlatIndex;
use super::{cmp_hits, kmeans, IndexConfig, IndexError, SearchHit};
use crate::embedding::squared_l2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IvfIndex {
    dims: usize,
    nprobe: usize,
    centroids: Vec<Vec<f32>>,
    /// Ordinals per cluster, parallel to `centroids`.
    lists: Vec<Vec<usize>>,
    /// All vectors in ordinal order, for lookup and exact re-scoring.
    data: Vec<f32>,
}

impl IvfIndex {
    /// Train `clusters` centroids on every vector in `flat` and bucket them.
    pub fn train(
        flat: &FlatIndex,
        clusters: usize,
        config: &IndexConfig,
    ) -> Result<Self, IndexError> {
        let dims = flat.dims();
        let centroids = kmeans::train(
            flat.as_slice(),
            dims,
            clusters,
            config.seed,
            config.max_iterations,
        )?;

        let mut index = Self {
            dims,
            nprobe: config.nprobe.max(1),
            lists: vec![Vec::new(); centroids.len()],
            centroids,
            data: Vec::with_capacity(flat.as_slice().len()),
        };
        for v in flat.as_slice().chunks_exact(dims) {
            index.push(v);
        }
        Ok(index)
    }

    pub fn len(&self) -> usize {
        if self.dims == 0 {
            0
        } else {
            self.data.len() / self.dims
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn cluster_count(&self) -> usize {
        self.centroids.len()
    }

    pub fn get(&self, ordinal: usize) -> Option<&[f32]> {
        let start = ordinal.checked_mul(self.dims)?;
        self.data.get(start..start + self.dims)
    }

    /// Centroids and lists must be parallel, every centroid must have `dims`
    /// entries, and every ordinal must appear in exactly one list. `dims`
    /// must be non-zero.
    pub(crate) fn validate(&self, dims: usize) -> Result<(), IndexError> {
        let inconsistent = |msg: String| Err(IndexError::Inconsistent(msg));

        if self.dims != dims {
            return inconsistent(format!(
                "clustered storage has {} dimensions, index has {}",
                self.dims, dims
            ));
        }
        if self.data.len() % dims != 0 {
            return inconsistent(format!(
                "clustered storage holds {} floats, not a multiple of {}",
                self.data.len(),
                dims
            ));
        }
        if self.centroids.is_empty() {
            return inconsistent("clustered index has no centroids".to_string());
        }
        if self.lists.len() != self.centroids.len() {
            return inconsistent(format!(
                "{} inverted lists for {} centroids",
                self.lists.len(),
                self.centroids.len()
            ));
        }
        if let Some(c) = self.centroids.iter().find(|c| c.len() != dims) {
            return inconsistent(format!("centroid has {} dimensions, expected {}", c.len(), dims));
        }

        let len = self.len();
        let mut seen = vec![false; len];
        for &ordinal in self.lists.iter().flatten() {
            match seen.get_mut(ordinal) {
                None => {
                    return inconsistent(format!(
                        "list entry {} is out of range for {} vectors",
                        ordinal, len
                    ))
                }
                Some(true) => return inconsistent(format!("ordinal {} listed twice", ordinal)),
                Some(slot) => *slot = true,
            }
        }
        if let Some(missing) = seen.iter().position(|s| !s) {
            return inconsistent(format!("ordinal {} is in no list", missing));
        }
        Ok(())
    }

    pub(crate) fn push(&mut self, vector: &[f32]) {
        let ordinal = self.len();
        let cluster = kmeans::nearest(&self.centroids, vector);
        self.lists[cluster].push(ordinal);
        self.data.extend_from_slice(vector);
    }

    pub(crate) fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        let mut ranked: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, squared_l2(query, c)))
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let mut hits = Vec::new();
        for (probed, (cluster, _)) in ranked.iter().enumerate() {
            if probed >= self.nprobe && hits.len() >= k {
                break;
            }
            for &ordinal in &self.lists[*cluster] {
                let start = ordinal * self.dims;
                hits.push(SearchHit {
                    ordinal,
                    distance: squared_l2(query, &self.data[start..start + self.dims]),
                });
            }
        }

        hits.sort_by(cmp_hits);
        hits.truncate(k);
        hits
    }
}
