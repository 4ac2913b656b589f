//! Ordered document store.
//!
//! The store is the source of truth that vector-index ordinals map into:
//! ordinal `i` is the `i`-th chunk in insertion order. Ordinals are
//! positional, so any delete renumbers every later chunk and the caller
//! must rebuild the index from the survivors.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::models::Chunk;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("ordinal {ordinal} is out of range (store holds {len} chunks)")]
    InvalidOrdinal { ordinal: usize, len: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentStore {
    chunks: Vec<Chunk>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_chunks(chunks: Vec<Chunk>) -> Self {
        Self { chunks }
    }

    /// Append a chunk and return its ordinal.
    pub fn append(&mut self, chunk: Chunk) -> usize {
        self.chunks.push(chunk);
        self.chunks.len() - 1
    }

    pub fn get(&self, ordinal: usize) -> Option<&Chunk> {
        self.chunks.get(ordinal)
    }

    /// Remove every chunk whose ordinal is in `ordinals`, renumbering the
    /// rest. Returns the removed chunks in ordinal order.
    ///
    /// All ordinals are checked first; if any is out of range nothing is
    /// removed.
    pub fn delete_many(&mut self, ordinals: &BTreeSet<usize>) -> Result<Vec<Chunk>, StoreError> {
        let len = self.chunks.len();
        if let Some(&ordinal) = ordinals.iter().find(|&&o| o >= len) {
            return Err(StoreError::InvalidOrdinal { ordinal, len });
        }

        let mut removed = Vec::with_capacity(ordinals.len());
        let mut kept = Vec::with_capacity(len - ordinals.len());
        for (i, chunk) in std::mem::take(&mut self.chunks).into_iter().enumerate() {
            if ordinals.contains(&i) {
                removed.push(chunk);
            } else {
                kept.push(chunk);
            }
        }
        self.chunks = kept;
        Ok(removed)
    }

    pub fn all(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Chunks in `slot`, paired with their ordinals.
    pub fn by_slot<'a>(&'a self, slot: &'a str) -> impl Iterator<Item = (usize, &'a Chunk)> + 'a {
        self.chunks
            .iter()
            .enumerate()
            .filter(move |(_, c)| c.slot == slot)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Number of chunks per slot, for slots that hold at least one chunk.
    pub fn slot_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for chunk in &self.chunks {
            *counts.entry(chunk.slot.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Keep only the chunks matching `keep`; returns how many were removed.
    pub fn retain<F>(&mut self, keep: F) -> usize
    where
        F: FnMut(&Chunk) -> bool,
    {
        let before = self.chunks.len();
        self.chunks.retain(keep);
        before - self.chunks.len()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    pub fn into_chunks(self) -> Vec<Chunk> {
        self.chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;

    fn store_with(contents: &[(&str, &str)]) -> DocumentStore {
        let mut store = DocumentStore::new();
        for (content, slot) in contents {
            store.append(Chunk::new(*content, Metadata::new(), *slot));
        }
        store
    }

    #[test]
    fn test_append_returns_consecutive_ordinals() {
        let mut store = DocumentStore::new();
        assert_eq!(store.append(Chunk::new("a", Metadata::new(), "general")), 0);
        assert_eq!(store.append(Chunk::new("b", Metadata::new(), "general")), 1);
        assert_eq!(store.get(1).unwrap().content, "b");
        assert!(store.get(2).is_none());
    }

    #[test]
    fn test_delete_many_renumbers() {
        let mut store = store_with(&[
            ("a", "general"),
            ("b", "general"),
            ("c", "support"),
            ("d", "general"),
        ]);
        let removed = store.delete_many(&BTreeSet::from([0, 2])).unwrap();
        assert_eq!(
            removed.iter().map(|c| c.content.as_str()).collect::<Vec<_>>(),
            vec!["a", "c"]
        );
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(0).unwrap().content, "b");
        assert_eq!(store.get(1).unwrap().content, "d");
    }

    #[test]
    fn test_delete_many_invalid_ordinal_removes_nothing() {
        let mut store = store_with(&[("a", "general"), ("b", "general")]);
        let err = store.delete_many(&BTreeSet::from([0, 5])).unwrap_err();
        assert_eq!(err, StoreError::InvalidOrdinal { ordinal: 5, len: 2 });
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_by_slot_and_counts() {
        let store = store_with(&[("a", "general"), ("b", "support"), ("c", "general")]);
        let general: Vec<usize> = store.by_slot("general").map(|(i, _)| i).collect();
        assert_eq!(general, vec![0, 2]);
        let counts = store.slot_counts();
        assert_eq!(counts.get("general"), Some(&2));
        assert_eq!(counts.get("support"), Some(&1));
        assert_eq!(counts.get("custom"), None);
    }

    #[test]
    fn test_retain_reports_removed() {
        let mut store = store_with(&[("a", "general"), ("b", "support"), ("c", "general")]);
        assert_eq!(store.retain(|c| c.slot != "general"), 2);
        assert_eq!(store.all().len(), 1);
        store.clear();
        assert!(store.is_empty());
    }
}
