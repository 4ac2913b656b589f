//! Core data models shared by the index, store, and engine.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Free-form string metadata attached to a chunk (e.g. `source`, `category`).
pub type Metadata = BTreeMap<String, String>;

/// Slots created when no explicit slot list is configured.
pub const DEFAULT_SLOTS: [&str; 5] = ["general", "technical", "product", "support", "custom"];

/// A bounded segment of ingested text stored as one retrievable unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    pub metadata: Metadata,
    pub slot: String,
}

impl Chunk {
    pub fn new(content: impl Into<String>, metadata: Metadata, slot: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata,
            slot: slot.into(),
        }
    }
}

/// Structural state of a [`VectorIndex`](crate::index::VectorIndex).
///
/// An index starts `Flat` and moves to `Clustered` at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    Flat,
    Clustered,
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexState::Flat => write!(f, "flat"),
            IndexState::Clustered => write!(f, "clustered"),
        }
    }
}

/// Canonical form of a slot name: trimmed and lowercased.
///
/// `"General"`, `" general "` and `"GENERAL"` all address the same slot.
pub fn normalize_slot(name: &str) -> String {
    name.trim().to_lowercase()
}
