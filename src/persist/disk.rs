//! Directory-backed snapshots.
//!
//! ```text
//! <base_dir>/
//!   docs/                  reserved for raw sources
//!   index/index.bin        bincode VectorIndex
//!   index/documents.json   documents, metadata, slots
//! ```
//!
//! Each artifact is written to a sibling `.tmp` file and renamed into
//! place, so a crash mid-save leaves the previous artifact intact.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use knowledge_harness_core::index::VectorIndex;
use knowledge_harness_core::store::DocumentStore;

use super::{
    decode_snapshot, encode_documents, encode_index, PersistError, Snapshot, SnapshotStore,
};

pub const INDEX_FILE: &str = "index.bin";
pub const DOCUMENTS_FILE: &str = "documents.json";

pub struct DiskSnapshotStore {
    base_dir: PathBuf,
}

impl DiskSnapshotStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn docs_dir(&self) -> PathBuf {
        self.base_dir.join("docs")
    }

    pub fn index_dir(&self) -> PathBuf {
        self.base_dir.join("index")
    }

    pub fn index_path(&self) -> PathBuf {
        self.index_dir().join(INDEX_FILE)
    }

    pub fn documents_path(&self) -> PathBuf {
        self.index_dir().join(DOCUMENTS_FILE)
    }

    /// Create `docs/` and `index/` if they do not exist.
    pub fn ensure_layout(&self) -> Result<(), PersistError> {
        for dir in [self.docs_dir(), self.index_dir()] {
            fs::create_dir_all(&dir).map_err(|e| PersistError::io(&dir, e))?;
        }
        Ok(())
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes).map_err(|e| PersistError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| PersistError::io(path, e))
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, PersistError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PersistError::io(path, e)),
    }
}

impl SnapshotStore for DiskSnapshotStore {
    fn save(&self, documents: &DocumentStore, index: &VectorIndex) -> Result<(), PersistError> {
        self.ensure_layout()?;
        write_atomic(&self.index_path(), &encode_index(index)?)?;
        write_atomic(
            &self.documents_path(),
            &encode_documents(documents, index.state())?,
        )?;
        Ok(())
    }

    fn load(&self) -> Result<Option<Snapshot>, PersistError> {
        let docs_bytes = read_optional(&self.documents_path())?;
        let index_bytes = read_optional(&self.index_path())?;

        let docs_bytes = match (docs_bytes, &index_bytes) {
            (None, None) => return Ok(None),
            (None, Some(_)) => {
                return Err(PersistError::Corrupt(format!(
                    "{} is missing but {} exists",
                    DOCUMENTS_FILE, INDEX_FILE
                )))
            }
            (Some(bytes), _) => bytes,
        };

        decode_snapshot(&docs_bytes, index_bytes, &self.describe()).map(Some)
    }

    fn describe(&self) -> String {
        self.base_dir.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knowledge_harness_core::index::IndexConfig;
    use knowledge_harness_core::models::{Chunk, Metadata};
    use tempfile::TempDir;

    fn sample() -> (DocumentStore, VectorIndex) {
        let mut store = DocumentStore::new();
        store.append(Chunk::new("alpha", Metadata::new(), "general"));
        let mut index = VectorIndex::new(2, IndexConfig::default());
        index.add(&[vec![1.0, 0.0]]).unwrap();
        (store, index)
    }

    #[test]
    fn test_fresh_directory_loads_nothing() {
        let tmp = TempDir::new().unwrap();
        let disk = DiskSnapshotStore::new(tmp.path().join("kb"));
        assert!(disk.load().unwrap().is_none());
    }

    #[test]
    fn test_save_creates_layout_and_roundtrips() {
        let tmp = TempDir::new().unwrap();
        let disk = DiskSnapshotStore::new(tmp.path().join("kb"));
        let (store, index) = sample();
        disk.save(&store, &index).unwrap();

        assert!(disk.docs_dir().is_dir());
        assert!(disk.index_path().is_file());
        assert!(disk.documents_path().is_file());
        assert!(!disk.index_dir().join("index.bin.tmp").exists());

        let snapshot = disk.load().unwrap().unwrap();
        assert_eq!(snapshot.documents, store);
        assert_eq!(snapshot.index.unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_index_is_dropped_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let disk = DiskSnapshotStore::new(tmp.path());
        let (store, index) = sample();
        disk.save(&store, &index).unwrap();
        fs::write(disk.index_path(), b"garbage").unwrap();

        let snapshot = disk.load().unwrap().unwrap();
        assert_eq!(snapshot.documents.len(), 1);
        assert!(snapshot.index.is_none());
    }

    #[test]
    fn test_corrupt_documents_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let disk = DiskSnapshotStore::new(tmp.path());
        let (store, index) = sample();
        disk.save(&store, &index).unwrap();
        fs::write(disk.documents_path(), b"{ not json").unwrap();
        assert!(matches!(disk.load(), Err(PersistError::Corrupt(_))));
    }

    #[test]
    fn test_save_into_unwritable_location_fails() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        let disk = DiskSnapshotStore::new(&blocker);
        let (store, index) = sample();
        assert!(matches!(
            disk.save(&store, &index),
            Err(PersistError::Io { .. })
        ));
    }
}
