//! Configuration parsing and validation.
//!
//! Knowledge Harness is configured with a TOML file (default
//! `./config/kb.toml`). Every section is optional and falls back to the
//! defaults below, so an empty file (or no file at all) is a valid setup
//! that stores data under `./knowledge_base` with the offline `hash`
//! embedder.
//!
//! ```toml
//! [storage]
//! base_dir = "./knowledge_base"
//!
//! [chunking]
//! chunk_size = 256
//! overlap = 100
//!
//! [retrieval]
//! top_k = 20
//! threshold = 0.2
//! oversample = 3
//!
//! [index]
//! transition_threshold = 1000
//! points_per_cluster = 10
//! max_clusters = 100
//! nprobe = 10
//! seed = 42
//!
//! [embedding]
//! provider = "hash"   # hash | ollama | openai | local
//! model = "all-minilm-l6-v2"
//! dims = 384
//!
//! [slots]
//! names = ["general", "technical", "product", "support", "custom"]
//!
//! [server]
//! bind = "127.0.0.1:7341"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use knowledge_harness_core::index::IndexConfig;
use knowledge_harness_core::models::{normalize_slot, DEFAULT_SLOTS};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub index: IndexSection,
    pub embedding: EmbeddingConfig,
    pub slots: SlotsConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory holding `docs/` and `index/`.
    pub base_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./knowledge_base"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target chunk length in characters.
    pub chunk_size: usize,
    /// Characters of the previous chunk prepended to each following chunk.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 256,
            overlap: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub threshold: f32,
    /// Candidate pool multiplier: the index is asked for `top_k * oversample`.
    pub oversample: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 20,
            threshold: 0.2,
            oversample: 3,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IndexSection {
    pub transition_threshold: usize,
    pub points_per_cluster: usize,
    pub max_clusters: usize,
    pub nprobe: usize,
    pub seed: u64,
    pub max_iterations: usize,
}

impl Default for IndexSection {
    fn default() -> Self {
        let d = IndexConfig::default();
        Self {
            transition_threshold: d.transition_threshold,
            points_per_cluster: d.points_per_cluster,
            max_clusters: d.max_clusters,
            nprobe: d.nprobe,
            seed: d.seed,
            max_iterations: d.max_iterations,
        }
    }
}

impl IndexSection {
    pub fn to_index_config(&self) -> IndexConfig {
        IndexConfig {
            transition_threshold: self.transition_threshold,
            points_per_cluster: self.points_per_cluster,
            max_clusters: self.max_clusters,
            nprobe: self.nprobe,
            seed: self.seed,
            max_iterations: self.max_iterations,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub dims: usize,
    /// Base URL for the `ollama` provider.
    pub url: String,
    pub batch_size: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hash".to_string(),
            model: "all-minilm-l6-v2".to_string(),
            dims: 384,
            url: "http://localhost:11434".to_string(),
            batch_size: 64,
            max_retries: 3,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SlotsConfig {
    pub names: Vec<String>,
}

impl Default for SlotsConfig {
    fn default() -> Self {
        Self {
            names: DEFAULT_SLOTS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7341".to_string(),
        }
    }
}

impl Config {
    /// Configured slot names, normalized and deduplicated in declaration order.
    pub fn slot_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for name in self.slots.names.iter().map(|n| normalize_slot(n)) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Check invariants the engine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.overlap >= self.chunking.chunk_size {
            bail!(
                "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.overlap,
                self.chunking.chunk_size
            );
        }

        if self.retrieval.top_k == 0 {
            bail!("retrieval.top_k must be >= 1");
        }
        if self.retrieval.oversample == 0 {
            bail!("retrieval.oversample must be >= 1");
        }
        if !(-1.0..=1.0).contains(&self.retrieval.threshold) {
            bail!("retrieval.threshold must be in [-1.0, 1.0]");
        }

        if self.index.nprobe == 0 {
            bail!("index.nprobe must be >= 1");
        }
        if self.index.points_per_cluster == 0 {
            bail!("index.points_per_cluster must be >= 1");
        }

        if self.embedding.dims == 0 {
            bail!("embedding.dims must be > 0");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        match self.embedding.provider.as_str() {
            "hash" | "ollama" | "openai" | "local" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be hash, ollama, openai, or local.",
                other
            ),
        }

        if self.slot_names().iter().all(|s| s.is_empty()) {
            bail!("slots.names must list at least one slot");
        }
        if self.slot_names().iter().any(|s| s.is_empty()) {
            bail!("slots.names must not contain blank names");
        }

        Ok(())
    }
}

/// Read, parse, and validate the config file at `path`.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

/// Like [`load_config`], but a missing file yields the defaults.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }
}
