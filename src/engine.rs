//! The retrieval engine: ingestion, two-phase retrieval, and destructive
//! edits over one document store and vector index pair.
//!
//! # Ingestion
//!
//! ```text
//! text ─▶ chunk_text ─▶ embed (normalized) ─▶ index.add + store.append ─▶ save
//! ```
//!
//! Chunks are embedded before the write lock is taken. Commits happen one
//! chunk at a time (index first, then store), so the store and index always
//! have the same length. If the provider fails partway, the chunks embedded
//! before the failure are committed and saved, and the error reports how
//! many made it.
//!
//! # Retrieval
//!
//! The query is embedded, `k × oversample` candidates are fetched from the
//! index (scaled up when filtering to a slot), and the candidates are
//! reranked by [`knowledge_harness_core::retrieve::rerank`]: abbreviation
//! matches first, then plain similarity.
//!
//! # Deletes
//!
//! The index has no delete. Deleting ordinals or clearing a slot
//! re-embeds every surviving chunk into a fresh index and swaps the pair
//! in under the write lock. If re-embedding fails, nothing changes.
//!
//! # Concurrency
//!
//! The store/index pair sits behind one `parking_lot::RwLock`. Queries
//! share the read lock; commits, rebuilds, and their saves hold the write
//! lock. Every call is synchronous; async callers should use
//! `spawn_blocking`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use knowledge_harness_core::chunk::{chunk_text, extract_abbreviations};
use knowledge_harness_core::embedding::{embed_normalized, embed_one, EmbedError, EmbeddingProvider};
use knowledge_harness_core::index::{IndexConfig, IndexError, VectorIndex};
use knowledge_harness_core::models::{normalize_slot, Chunk, IndexState, Metadata};
use knowledge_harness_core::retrieve::{format_context, rerank, ContextItem, RerankParams};
use knowledge_harness_core::store::{DocumentStore, StoreError};

use crate::config::Config;
use crate::embedding::create_provider;
use crate::persist::{DiskSnapshotStore, PersistError, SnapshotStore};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("text must not be empty")]
    EmptyText,

    #[error("no texts given")]
    EmptyBatch,

    #[error("got {texts} texts but {metadata} metadata entries")]
    LengthMismatch { texts: usize, metadata: usize },

    #[error("unknown slot '{slot}' (known: {})", .known.join(", "))]
    UnknownSlot { slot: String, known: Vec<String> },

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Ingestion stopped at a chunk the provider could not embed.
    /// `committed` chunks before it were stored.
    #[error("embedding failed after {committed} chunks were committed: {source}")]
    Embedding {
        committed: usize,
        #[source]
        source: EmbedError,
    },

    #[error("failed to embed query: {0}")]
    QueryEmbedding(#[source] EmbedError),

    #[error("index rebuild failed, state unchanged: {0}")]
    Rebuild(#[source] EmbedError),

    #[error(transparent)]
    Index(#[from] IndexError),

    /// The index refused a vector after `committed` chunks were stored.
    /// `embedding` holds a provider failure that had already cut the batch
    /// short.
    #[error(
        "index rejected a chunk after {committed} were committed: {source}{}",
        embedding_suffix(.embedding)
    )]
    IndexCommit {
        committed: usize,
        #[source]
        source: IndexError,
        embedding: Option<EmbedError>,
    },

    /// The in-memory state is updated and usable but was not saved.
    /// `applied` counts chunks added or removed in memory; `embedding` holds
    /// a provider failure that stopped ingestion before the save.
    #[error(
        "{applied} chunk changes applied but not saved: {source}{}",
        embedding_suffix(.embedding)
    )]
    NotDurable {
        applied: usize,
        embedding: Option<EmbedError>,
        #[source]
        source: PersistError,
    },
}

fn embedding_suffix(embedding: &Option<EmbedError>) -> String {
    match embedding {
        Some(e) => format!(" (embedding also stopped early: {e})"),
        None => String::new(),
    }
}

fn not_durable(applied: usize, source: PersistError) -> EngineError {
    EngineError::NotDurable {
        applied,
        embedding: None,
        source,
    }
}

impl EngineError {
    /// True for errors caused by the caller's input rather than a backend.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            EngineError::EmptyText
                | EngineError::EmptyBatch
                | EngineError::LengthMismatch { .. }
                | EngineError::UnknownSlot { .. }
                | EngineError::Store(StoreError::InvalidOrdinal { .. })
        )
    }
}

/// Tuning for one engine instance.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub chunk_size: usize,
    pub overlap: usize,
    pub top_k: usize,
    pub threshold: f32,
    pub oversample: usize,
    pub index: IndexConfig,
    /// Slots that accept ingestion, normalized.
    pub slots: Vec<String>,
    /// Texts per provider call when rebuilding.
    pub batch_size: usize,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_size: config.chunking.chunk_size,
            overlap: config.chunking.overlap,
            top_k: config.retrieval.top_k,
            threshold: config.retrieval.threshold,
            oversample: config.retrieval.oversample,
            index: config.index.to_index_config(),
            slots: config.slot_names(),
            batch_size: config.embedding.batch_size.max(1),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Per-query overrides; `None` falls back to [`EngineSettings`].
#[derive(Debug, Clone, Default)]
pub struct RetrieveOptions {
    pub k: Option<usize>,
    pub threshold: Option<f32>,
    pub slot: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Non-blank texts that produced at least one chunk.
    pub texts: usize,
    pub chunks: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub documents: usize,
    pub index_vectors: usize,
    pub index_state: IndexState,
    pub clusters: usize,
    pub model: String,
    pub dims: usize,
    /// Every configured slot (zero when empty) plus any other slot with data.
    pub slots: BTreeMap<String, usize>,
}

struct Corpus {
    store: DocumentStore,
    index: VectorIndex,
}

pub struct RetrievalEngine {
    provider: Arc<dyn EmbeddingProvider>,
    persistence: Arc<dyn SnapshotStore>,
    settings: EngineSettings,
    corpus: RwLock<Corpus>,
}

impl RetrievalEngine {
    /// Build an engine and load any saved snapshot.
    ///
    /// Never fails: an unreadable snapshot is logged and the engine starts
    /// empty; an unusable index is rebuilt from the saved documents.
    pub fn open(
        provider: Arc<dyn EmbeddingProvider>,
        persistence: Arc<dyn SnapshotStore>,
        settings: EngineSettings,
    ) -> Self {
        let engine = Self {
            corpus: RwLock::new(Corpus {
                store: DocumentStore::new(),
                index: VectorIndex::new(provider.dims(), settings.index.clone()),
            }),
            provider,
            persistence,
            settings,
        };
        engine.load();
        engine
    }

    /// Engine over `config.storage.base_dir` with the configured provider.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let provider = create_provider(&config.embedding)?;
        let disk = DiskSnapshotStore::new(&config.storage.base_dir);
        if let Err(e) = disk.ensure_layout() {
            warn!(error = %e, "could not create storage directories");
        }
        Ok(Self::open(
            provider,
            Arc::new(disk),
            EngineSettings::from_config(config),
        ))
    }

    fn load(&self) {
        let location = self.persistence.describe();
        let snapshot = match self.persistence.load() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                info!(location, "no saved knowledge base, starting empty");
                return;
            }
            Err(e) => {
                warn!(location, error = %e, "failed to load knowledge base, starting empty");
                return;
            }
        };

        let documents = snapshot.documents;
        let index = match snapshot.index {
            Some(index)
                if index.len() == documents.len() && index.dims() == self.provider.dims() =>
            {
                index
            }
            other => {
                if let Some(index) = other {
                    warn!(
                        location,
                        index_len = index.len(),
                        index_dims = index.dims(),
                        documents = documents.len(),
                        dims = self.provider.dims(),
                        "saved index does not match documents, rebuilding"
                    );
                }
                match self.build_index(documents.all()) {
                    Ok(index) => index,
                    Err(e) => {
                        warn!(location, error = %e, "index rebuild failed, starting empty");
                        return;
                    }
                }
            }
        };

        info!(
            location,
            documents = documents.len(),
            state = %index.state(),
            "loaded knowledge base"
        );
        *self.corpus.write() = Corpus {
            store: documents,
            index,
        };
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn provider(&self) -> &dyn EmbeddingProvider {
        self.provider.as_ref()
    }

    // ============ Ingestion ============

    /// Chunk, embed, and store `text` under `slot` (default `"general"`).
    ///
    /// Text that yields no chunks (only sentence terminators, say) is an
    /// `Ok` no-op.
    pub fn ingest(
        &self,
        text: &str,
        metadata: Metadata,
        slot: Option<&str>,
    ) -> Result<IngestReport, EngineError> {
        if text.trim().is_empty() {
            return Err(EngineError::EmptyText);
        }
        let slot = self.ingest_slot(slot)?;

        let pieces = chunk_text(text, self.settings.chunk_size, self.settings.overlap);
        if pieces.is_empty() {
            debug!("text produced no chunks, nothing to ingest");
            return Ok(IngestReport::default());
        }

        let chunks: Vec<Chunk> = pieces
            .into_iter()
            .map(|content| Chunk::new(content, metadata.clone(), slot.clone()))
            .collect();
        let committed = self.commit_chunks(chunks)?;
        Ok(IngestReport {
            texts: 1,
            chunks: committed,
        })
    }

    /// Batch form of [`ingest`](Self::ingest). `metadata`, when given, must
    /// have one entry per text. Blank texts are skipped.
    pub fn ingest_many(
        &self,
        texts: &[String],
        metadata: Option<&[Metadata]>,
        slot: Option<&str>,
    ) -> Result<IngestReport, EngineError> {
        if texts.is_empty() {
            return Err(EngineError::EmptyBatch);
        }
        if let Some(meta) = metadata {
            if meta.len() != texts.len() {
                return Err(EngineError::LengthMismatch {
                    texts: texts.len(),
                    metadata: meta.len(),
                });
            }
        }
        let slot = self.ingest_slot(slot)?;

        let mut report = IngestReport::default();
        let mut chunks = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            if text.trim().is_empty() {
                debug!(position = i, "skipping blank text in batch");
                continue;
            }
            let meta = metadata.map(|m| m[i].clone()).unwrap_or_default();
            let pieces = chunk_text(text, self.settings.chunk_size, self.settings.overlap);
            if !pieces.is_empty() {
                report.texts += 1;
            }
            chunks.extend(
                pieces
                    .into_iter()
                    .map(|content| Chunk::new(content, meta.clone(), slot.clone())),
            );
        }

        if chunks.is_empty() {
            return Ok(report);
        }
        report.chunks = self.commit_chunks(chunks)?;
        Ok(report)
    }

    fn ingest_slot(&self, slot: Option<&str>) -> Result<String, EngineError> {
        let slot = normalize_slot(slot.unwrap_or("general"));
        if self.settings.slots.contains(&slot) {
            Ok(slot)
        } else {
            Err(EngineError::UnknownSlot {
                slot,
                known: self.settings.slots.clone(),
            })
        }
    }

    /// Embed `chunks` in order, commit the embedded prefix, and save.
    fn commit_chunks(&self, chunks: Vec<Chunk>) -> Result<usize, EngineError> {
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let (vectors, embed_err) = self.embed_prefix(&texts);

        let mut committed = 0;
        let mut index_err = None;
        {
            let mut corpus = self.corpus.write();
            for (chunk, vector) in chunks.into_iter().zip(vectors) {
                if let Err(e) = corpus.index.add(std::slice::from_ref(&vector)) {
                    index_err = Some(e);
                    break;
                }
                corpus.store.append(chunk);
                committed += 1;
            }

            if committed > 0 {
                info!(
                    chunks = committed,
                    total = corpus.store.len(),
                    state = %corpus.index.state(),
                    "ingested chunks"
                );
                if let Err(source) = self.save(&corpus) {
                    if let Some(e) = &index_err {
                        warn!(committed, error = %e, "index rejected a chunk");
                    }
                    return Err(EngineError::NotDurable {
                        applied: committed,
                        embedding: embed_err,
                        source,
                    });
                }
            }
        }

        if let Some(source) = index_err {
            return Err(EngineError::IndexCommit {
                committed,
                source,
                embedding: embed_err,
            });
        }
        match embed_err {
            Some(source) => Err(EngineError::Embedding { committed, source }),
            None => Ok(committed),
        }
    }

    /// Embed texts batch by batch. A failing batch is retried one text at a
    /// time so that every text before the bad one is still returned.
    fn embed_prefix(&self, texts: &[String]) -> (Vec<Vec<f32>>, Option<EmbedError>) {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.settings.batch_size) {
            match embed_normalized(self.provider.as_ref(), batch) {
                Ok(mut v) => vectors.append(&mut v),
                Err(batch_err) => {
                    if batch.len() == 1 {
                        return (vectors, Some(batch_err));
                    }
                    for text in batch {
                        match embed_one(self.provider.as_ref(), text) {
                            Ok(v) => vectors.push(v),
                            Err(e) => return (vectors, Some(e)),
                        }
                    }
                }
            }
        }
        (vectors, None)
    }

    // ============ Retrieval ============

    /// Retrieve and format context for `query`. An empty string means no
    /// chunk met the threshold.
    pub fn retrieve(&self, query: &str, options: &RetrieveOptions) -> Result<String, EngineError> {
        Ok(format_context(&self.retrieve_items(query, options)?))
    }

    /// Retrieve accepted chunks for `query` in acceptance order.
    pub fn retrieve_items(
        &self,
        query: &str,
        options: &RetrieveOptions,
    ) -> Result<Vec<ContextItem>, EngineError> {
        let k = options.k.unwrap_or(self.settings.top_k);
        let threshold = options.threshold.unwrap_or(self.settings.threshold);
        if query.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let slot = options.slot.as_deref().map(normalize_slot);
        let abbreviations = extract_abbreviations(query);
        let query_vector =
            embed_one(self.provider.as_ref(), query).map_err(EngineError::QueryEmbedding)?;

        let corpus = self.corpus.read();
        let total = corpus.index.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let mut pool = k.saturating_mul(self.settings.oversample);
        if let Some(slot) = slot.as_deref() {
            let in_slot = corpus.store.by_slot(slot).count();
            if in_slot == 0 {
                if !self.settings.slots.iter().any(|s| s == slot) {
                    warn!(slot, "query for unknown slot");
                }
                return Ok(Vec::new());
            }
            pool = pool.saturating_mul(total.div_ceil(in_slot));
        }
        let pool = pool.min(total);

        let hits = corpus.index.search(&query_vector, pool)?;
        let reranked = rerank(
            &abbreviations,
            &hits,
            &corpus.store,
            slot.as_deref(),
            &RerankParams { k, threshold },
        );

        if reranked.items.is_empty() {
            info!(
                threshold,
                unmatched = ?reranked.unmatched_abbreviations,
                "no relevant context found"
            );
        } else if !reranked.unmatched_abbreviations.is_empty() {
            debug!(
                unmatched = ?reranked.unmatched_abbreviations,
                "query abbreviations without a matching chunk"
            );
        }
        Ok(reranked.items)
    }

    // ============ Destructive edits ============

    /// Delete chunks by ordinal and rebuild the index. Returns the number
    /// removed. Any out-of-range ordinal rejects the whole call.
    pub fn delete(&self, ordinals: &BTreeSet<usize>) -> Result<usize, EngineError> {
        if ordinals.is_empty() {
            return Ok(0);
        }
        let mut corpus = self.corpus.write();
        let mut survivors = corpus.store.clone();
        let removed = survivors.delete_many(ordinals)?.len();
        self.replace(&mut corpus, survivors)?;
        info!(removed, remaining = corpus.store.len(), "deleted chunks");
        self.save(&corpus).map_err(|e| not_durable(removed, e))?;
        Ok(removed)
    }

    /// Remove every chunk in `slot` and rebuild the index.
    pub fn clear_slot(&self, slot: &str) -> Result<usize, EngineError> {
        let slot = normalize_slot(slot);
        let mut corpus = self.corpus.write();
        let known = self.settings.slots.contains(&slot)
            || corpus.store.all().iter().any(|c| c.slot == slot);
        if !known {
            return Err(EngineError::UnknownSlot {
                slot,
                known: self.settings.slots.clone(),
            });
        }

        let mut survivors = corpus.store.clone();
        let removed = survivors.retain(|c| c.slot != slot);
        if removed > 0 {
            self.replace(&mut corpus, survivors)?;
        }
        info!(slot, removed, "cleared slot");
        self.save(&corpus).map_err(|e| not_durable(removed, e))?;
        Ok(removed)
    }

    /// Remove everything and reset to an empty flat index.
    pub fn clear_all(&self) -> Result<usize, EngineError> {
        let mut corpus = self.corpus.write();
        let removed = corpus.store.len();
        corpus.store.clear();
        corpus.index = VectorIndex::new(self.provider.dims(), self.settings.index.clone());
        info!(removed, "cleared knowledge base");
        self.save(&corpus).map_err(|e| not_durable(removed, e))?;
        Ok(removed)
    }

    /// Re-embed `survivors` into a fresh index and swap both in.
    fn replace(&self, corpus: &mut Corpus, survivors: DocumentStore) -> Result<(), EngineError> {
        let index = self.build_index(survivors.all())?;
        debug!(
            vectors = index.len(),
            state = %index.state(),
            "rebuilt vector index"
        );
        *corpus = Corpus {
            store: survivors,
            index,
        };
        Ok(())
    }

    fn build_index(&self, chunks: &[Chunk]) -> Result<VectorIndex, EngineError> {
        let mut index = VectorIndex::new(self.provider.dims(), self.settings.index.clone());
        for batch in chunks.chunks(self.settings.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let vectors =
                embed_normalized(self.provider.as_ref(), &texts).map_err(EngineError::Rebuild)?;
            index.add(&vectors)?;
        }
        Ok(index)
    }

    fn save(&self, corpus: &Corpus) -> Result<(), PersistError> {
        self.persistence
            .save(&corpus.store, &corpus.index)
            .inspect_err(|e| warn!(error = %e, "knowledge base changes are not durable"))?;
        debug!(
            location = %self.persistence.describe(),
            documents = corpus.store.len(),
            "saved knowledge base"
        );
        Ok(())
    }

    // ============ Introspection ============

    pub fn len(&self) -> usize {
        self.corpus.read().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of vectors in the index; equals [`len`](Self::len) after
    /// every completed mutation.
    pub fn index_len(&self) -> usize {
        self.corpus.read().index.len()
    }

    pub fn index_state(&self) -> IndexState {
        self.corpus.read().index.state()
    }

    /// Chunks with their ordinals, optionally restricted to one slot.
    pub fn documents(&self, slot: Option<&str>) -> Vec<(usize, Chunk)> {
        let corpus = self.corpus.read();
        match slot.map(normalize_slot) {
            Some(slot) => corpus
                .store
                .by_slot(&slot)
                .map(|(i, c)| (i, c.clone()))
                .collect(),
            None => corpus.store.all().iter().cloned().enumerate().collect(),
        }
    }

    pub fn stats(&self) -> EngineStats {
        let corpus = self.corpus.read();
        let mut slots: BTreeMap<String, usize> = self
            .settings
            .slots
            .iter()
            .map(|s| (s.clone(), 0))
            .collect();
        slots.extend(corpus.store.slot_counts());
        EngineStats {
            documents: corpus.store.len(),
            index_vectors: corpus.index.len(),
            index_state: corpus.index.state(),
            clusters: corpus.index.cluster_count(),
            model: self.provider.model_name().to_string(),
            dims: self.provider.dims(),
            slots,
        }
    }
}
