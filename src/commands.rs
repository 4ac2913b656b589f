//! Implementations of the `kb` subcommands.
//!
//! Each function opens the engine from config, performs one operation, and
//! prints a plain-text summary to stdout. Logs go to stderr.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::Path;

use knowledge_harness_core::models::Metadata;

use crate::config::Config;
use crate::engine::{RetrievalEngine, RetrieveOptions};
use crate::importer::import_path;
use crate::persist::DiskSnapshotStore;

/// Width of the content preview printed by `kb list`.
const PREVIEW_CHARS: usize = 80;

pub fn run_init(config: &Config) -> Result<()> {
    let disk = DiskSnapshotStore::new(&config.storage.base_dir);
    disk.ensure_layout().with_context(|| {
        format!(
            "Failed to create knowledge base at {}",
            config.storage.base_dir.display()
        )
    })?;
    println!(
        "Knowledge base initialized at {}",
        config.storage.base_dir.display()
    );
    Ok(())
}

pub fn run_add(config: &Config, text: &str, slot: Option<&str>, meta: Vec<(String, String)>) -> Result<()> {
    let engine = RetrievalEngine::from_config(config)?;
    let metadata: Metadata = meta.into_iter().collect();
    let report = engine.ingest(text, metadata, slot)?;
    println!("ingested chunks: {}", report.chunks);
    println!("total documents: {}", engine.len());
    Ok(())
}

pub fn run_import(config: &Config, path: &Path, slot: Option<&str>) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("Import path does not exist: {}", path.display());
    }
    let engine = RetrievalEngine::from_config(config)?;
    let report = import_path(&engine, path, slot)?;
    println!("imported files: {}", report.files);
    println!("imported texts: {}", report.texts);
    println!("ingested chunks: {}", report.chunks);
    Ok(())
}

pub fn run_context(
    config: &Config,
    query: &str,
    slot: Option<String>,
    k: Option<usize>,
    threshold: Option<f32>,
    json: bool,
) -> Result<()> {
    let engine = RetrievalEngine::from_config(config)?;
    let options = RetrieveOptions { k, threshold, slot };
    let items = engine.retrieve_items(query, &options)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if items.is_empty() {
        eprintln!("No relevant context found.");
    } else {
        println!(
            "{}",
            knowledge_harness_core::retrieve::format_context(&items)
        );
    }
    Ok(())
}

pub fn run_list(config: &Config, slot: Option<&str>) -> Result<()> {
    let engine = RetrievalEngine::from_config(config)?;
    let documents = engine.documents(slot);
    if documents.is_empty() {
        println!("No documents.");
        return Ok(());
    }
    for (ordinal, chunk) in documents {
        let source = chunk
            .metadata
            .get("source")
            .map(String::as_str)
            .unwrap_or("manual");
        println!(
            "{:>5}  [{}]  {}  ({})",
            ordinal,
            chunk.slot,
            preview(&chunk.content),
            source
        );
    }
    Ok(())
}

pub fn run_delete(config: &Config, ordinals: &[usize]) -> Result<()> {
    let engine = RetrievalEngine::from_config(config)?;
    let set: BTreeSet<usize> = ordinals.iter().copied().collect();
    let removed = engine.delete(&set)?;
    println!("deleted: {}", removed);
    println!("remaining: {}", engine.len());
    Ok(())
}

pub fn run_clear(config: &Config, slot: Option<&str>) -> Result<()> {
    let engine = RetrievalEngine::from_config(config)?;
    let removed = match slot {
        Some(slot) => engine.clear_slot(slot)?,
        None => engine.clear_all()?,
    };
    println!("cleared: {}", removed);
    Ok(())
}

pub fn run_stats(config: &Config) -> Result<()> {
    let engine = RetrievalEngine::from_config(config)?;
    let stats = engine.stats();
    println!("documents: {}", stats.documents);
    println!("index: {} ({} vectors)", stats.index_state, stats.index_vectors);
    if stats.clusters > 0 {
        println!("clusters: {}", stats.clusters);
    }
    println!("model: {} ({} dims)", stats.model, stats.dims);
    println!("slots:");
    for (slot, count) in &stats.slots {
        println!("  {}: {}", slot, count);
    }
    Ok(())
}

/// Single-line preview: whitespace collapsed, truncated with an ellipsis.
fn preview(content: &str) -> String {
    let flat: String = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(PREVIEW_CHARS - 1).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_collapses_and_truncates() {
        assert_eq!(preview("a\n\n b"), "a b");
        let long = "x".repeat(200);
        let p = preview(&long);
        assert_eq!(p.chars().count(), PREVIEW_CHARS);
        assert!(p.ends_with('…'));
    }
}
