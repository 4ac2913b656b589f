//! In-process snapshots.
//!
//! Holds the encoded artifacts in memory, so a save/load cycle goes through
//! the same codecs as the disk backend. Useful for tests and for embedding
//! the engine without touching the filesystem.

use parking_lot::Mutex;

use knowledge_harness_core::index::VectorIndex;
use knowledge_harness_core::store::DocumentStore;

use super::{
    decode_snapshot, encode_documents, encode_index, PersistError, Snapshot, SnapshotStore,
};

#[derive(Default)]
struct Artifacts {
    index: Option<Vec<u8>>,
    documents: Option<Vec<u8>>,
}

#[derive(Default)]
pub struct MemorySnapshotStore {
    artifacts: Mutex<Artifacts>,
    saves: Mutex<usize>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }

    /// The stored index artifact, if any.
    pub fn index_bytes(&self) -> Option<Vec<u8>> {
        self.artifacts.lock().index.clone()
    }

    /// Overwrite the stored index artifact with arbitrary bytes.
    pub fn replace_index_bytes(&self, bytes: Vec<u8>) {
        self.artifacts.lock().index = Some(bytes);
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn save(&self, documents: &DocumentStore, index: &VectorIndex) -> Result<(), PersistError> {
        let index_bytes = encode_index(index)?;
        let doc_bytes = encode_documents(documents, index.state())?;
        let mut artifacts = self.artifacts.lock();
        artifacts.index = Some(index_bytes);
        artifacts.documents = Some(doc_bytes);
        *self.saves.lock() += 1;
        Ok(())
    }

    fn load(&self) -> Result<Option<Snapshot>, PersistError> {
        let (index_bytes, doc_bytes) = {
            let artifacts = self.artifacts.lock();
            (artifacts.index.clone(), artifacts.documents.clone())
        };
        let Some(doc_bytes) = doc_bytes else {
            return Ok(None);
        };
        decode_snapshot(&doc_bytes, index_bytes, "memory").map(Some)
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
