//! Snapshot persistence for the document store and vector index.
//!
//! A snapshot is two artifacts, always rewritten together:
//!
//! | Artifact | Format | Content |
//! |----------|--------|---------|
//! | index | bincode | the serialized [`VectorIndex`] |
//! | documents | JSON | `{documents, metadata, slots, index_state, saved_at}` |
//!
//! The documents file stores chunk contents, metadata maps, and slot names
//! as parallel arrays in ordinal order. It is the source of truth: a
//! missing or damaged index can always be rebuilt from it by re-embedding,
//! while a damaged documents file means the snapshot is unusable.
//!
//! Backends implement [`SnapshotStore`]: [`DiskSnapshotStore`] for a base
//! directory and [`MemorySnapshotStore`] for in-process use.

mod disk;
mod memory;

pub use disk::DiskSnapshotStore;
pub use memory::MemorySnapshotStore;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use knowledge_harness_core::index::VectorIndex;
use knowledge_harness_core::models::{Chunk, IndexState, Metadata};
use knowledge_harness_core::store::DocumentStore;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode snapshot: {0}")]
    Encode(String),

    #[error("snapshot is corrupt: {0}")]
    Corrupt(String),
}

impl PersistError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// What a backend hands back on load.
#[derive(Debug)]
pub struct Snapshot {
    pub documents: DocumentStore,
    /// `None` when the index artifact is missing or unreadable; the caller
    /// rebuilds it from `documents`.
    pub index: Option<VectorIndex>,
    pub saved_at: Option<DateTime<Utc>>,
}

/// Durable storage for the document store and index pair.
pub trait SnapshotStore: Send + Sync {
    /// Replace the stored snapshot with `documents` and `index`.
    fn save(&self, documents: &DocumentStore, index: &VectorIndex) -> Result<(), PersistError>;

    /// Read the stored snapshot. `Ok(None)` means nothing has been saved yet.
    fn load(&self) -> Result<Option<Snapshot>, PersistError>;

    /// Human-readable location, for log lines.
    fn describe(&self) -> String;
}

/// On-disk shape of the documents artifact.
#[derive(Debug, Serialize, Deserialize)]
struct DocumentsFile {
    documents: Vec<String>,
    metadata: Vec<Metadata>,
    slots: Vec<String>,
    index_state: IndexState,
    saved_at: DateTime<Utc>,
}

pub(crate) fn encode_documents(
    documents: &DocumentStore,
    state: IndexState,
) -> Result<Vec<u8>, PersistError> {
    let all = documents.all();
    let file = DocumentsFile {
        documents: all.iter().map(|c| c.content.clone()).collect(),
        metadata: all.iter().map(|c| c.metadata.clone()).collect(),
        slots: all.iter().map(|c| c.slot.clone()).collect(),
        index_state: state,
        saved_at: Utc::now(),
    };
    serde_json::to_vec_pretty(&file).map_err(|e| PersistError::Encode(e.to_string()))
}

/// Decoded documents artifact.
pub(crate) struct DecodedDocuments {
    pub store: DocumentStore,
    pub saved_at: DateTime<Utc>,
    /// State of the index that was saved together with these documents.
    pub index_state: IndexState,
}

pub(crate) fn decode_documents(bytes: &[u8]) -> Result<DecodedDocuments, PersistError> {
    let file: DocumentsFile = serde_json::from_slice(bytes)
        .map_err(|e| PersistError::Corrupt(format!("documents: {}", e)))?;

    if file.metadata.len() != file.documents.len() || file.slots.len() != file.documents.len() {
        return Err(PersistError::Corrupt(format!(
            "documents: {} contents, {} metadata entries, {} slots",
            file.documents.len(),
            file.metadata.len(),
            file.slots.len()
        )));
    }

    let chunks = file
        .documents
        .into_iter()
        .zip(file.metadata)
        .zip(file.slots)
        .map(|((content, metadata), slot)| Chunk::new(content, metadata, slot))
        .collect();
    Ok(DecodedDocuments {
        store: DocumentStore::from_chunks(chunks),
        saved_at: file.saved_at,
        index_state: file.index_state,
    })
}

pub(crate) fn encode_index(index: &VectorIndex) -> Result<Vec<u8>, PersistError> {
    bincode::serialize(index).map_err(|e| PersistError::Encode(e.to_string()))
}

pub(crate) fn decode_index(bytes: &[u8]) -> Result<VectorIndex, PersistError> {
    let index: VectorIndex = bincode::deserialize(bytes)
        .map_err(|e| PersistError::Corrupt(format!("index: {}", e)))?;
    index
        .validate()
        .map_err(|e| PersistError::Corrupt(format!("index: {}", e)))?;
    Ok(index)
}

/// Decode a raw index artifact, logging and discarding it if it is
/// unreadable or was not saved with documents recording `expected_state`.
pub(crate) fn decode_index_lenient(
    bytes: Option<Vec<u8>>,
    expected_state: IndexState,
    location: &str,
) -> Option<VectorIndex> {
    match bytes.map(|b| decode_index(&b)) {
        Some(Ok(index)) if index.state() == expected_state => Some(index),
        Some(Ok(index)) => {
            tracing::warn!(
                location,
                index_state = %index.state(),
                recorded_state = %expected_state,
                "index snapshot does not match documents, discarding"
            );
            None
        }
        Some(Err(e)) => {
            tracing::warn!(location, error = %e, "discarding unreadable index snapshot");
            None
        }
        None => {
            tracing::warn!(location, "index snapshot missing");
            None
        }
    }
}

/// Assemble a [`Snapshot`] from raw artifacts. Only the documents are
/// required; a bad index is dropped so the engine rebuilds it.
pub(crate) fn decode_snapshot(
    doc_bytes: &[u8],
    index_bytes: Option<Vec<u8>>,
    location: &str,
) -> Result<Snapshot, PersistError> {
    let decoded = decode_documents(doc_bytes)?;
    let index = decode_index_lenient(index_bytes, decoded.index_state, location);
    Ok(Snapshot {
        documents: decoded.store,
        index,
        saved_at: Some(decoded.saved_at),
    })
}
