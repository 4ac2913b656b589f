//! Exact flat index: contiguous storage, exhaustive scan.

use serde::{Deserialize, Serialize};

use super::{cmp_hits, IndexError, SearchHit};
use crate::embedding::squared_l2;

/// Vectors stored back to back in one buffer (`len × dims` floats).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatIndex {
    dims: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            data: Vec::new(),
        }
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

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn get(&self, ordinal: usize) -> Option<&[f32]> {
        let start = ordinal.checked_mul(self.dims)?;
        self.data.get(start..start + self.dims)
    }

    /// `dims` must be non-zero.
    pub(crate) fn validate(&self, dims: usize) -> Result<(), IndexError> {
        if self.dims != dims {
            return Err(IndexError::Inconsistent(format!(
                "flat storage has {} dimensions, index has {}",
                self.dims, dims
            )));
        }
        if self.data.len() % dims != 0 {
            return Err(IndexError::Inconsistent(format!(
                "flat storage holds {} floats, not a multiple of {}",
                self.data.len(),
                dims
            )));
        }
        Ok(())
    }

    /// Raw contiguous storage, consumed by clustered training.
    pub(crate) fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub(crate) fn push(&mut self, vector: &[f32]) {
        self.data.extend_from_slice(vector);
    }

    pub(crate) fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        let mut hits: Vec<SearchHit> = self
            .data
            .chunks_exact(self.dims)
            .enumerate()
            .map(|(ordinal, v)| SearchHit {
                ordinal,
                distance: squared_l2(query, v),
            })
            .collect();
        hits.sort_by(cmp_hits);
        hits.truncate(k);
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_by_ordinal() {
        let mut flat = FlatIndex::new(2);
        flat.push(&[1.0, 0.0]);
        flat.push(&[0.0, 1.0]);
        assert_eq!(flat.len(), 2);
        assert_eq!(flat.get(1), Some(&[0.0, 1.0][..]));
        assert_eq!(flat.get(2), None);
    }

    #[test]
    fn test_ties_break_on_ordinal() {
        let mut flat = FlatIndex::new(2);
        flat.push(&[0.0, 1.0]);
        flat.push(&[1.0, 0.0]);
        flat.push(&[0.0, 1.0]);
        let hits = flat.search(&[0.0, 1.0], 3);
        assert_eq!(hits[0].ordinal, 0);
        assert_eq!(hits[1].ordinal, 2);
        assert_eq!(hits[2].ordinal, 1);
    }
}
