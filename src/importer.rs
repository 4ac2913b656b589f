//! Bulk import from files and directories.
//!
//! | Extension | Handling |
//! |-----------|----------|
//! | `.json` | an object `{content, metadata}` or an array of them |
//! | anything else | the whole file is one text |
//!
//! Every imported text gets `source = <file path>` in its metadata; a
//! `source` key in the JSON metadata takes precedence. JSON metadata
//! values that are not strings are stored as their JSON rendering. A
//! `.json` file that does not parse is imported as plain text.
//!
//! Directory imports walk the tree with `walkdir`, keep files matching the
//! include globs (default `**/*.txt`, `**/*.json`, `**/*.md`), skip
//! `.git`, `target` and `node_modules`, and visit files in path order.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

use knowledge_harness_core::models::Metadata;

use crate::engine::RetrievalEngine;

pub const DEFAULT_INCLUDE_GLOBS: [&str; 3] = ["**/*.txt", "**/*.json", "**/*.md"];

const DEFAULT_EXCLUDE_GLOBS: [&str; 3] = ["**/.git/**", "**/target/**", "**/node_modules/**"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub files: usize,
    pub texts: usize,
    pub chunks: usize,
}

#[derive(Debug, Deserialize)]
struct JsonEntry {
    content: String,
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonPayload {
    Many(Vec<JsonEntry>),
    One(JsonEntry),
}

/// Read `path` into `(text, metadata)` pairs without ingesting them.
pub fn read_entries(path: &Path) -> Result<Vec<(String, Metadata)>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let source = path.display().to_string();

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        match serde_json::from_str::<JsonPayload>(&content) {
            Ok(JsonPayload::Many(entries)) => {
                return Ok(entries
                    .into_iter()
                    .map(|e| (e.content, entry_metadata(&source, e.metadata)))
                    .collect())
            }
            Ok(JsonPayload::One(entry)) => {
                return Ok(vec![(
                    entry.content,
                    entry_metadata(&source, entry.metadata),
                )])
            }
            Err(e) => {
                debug!(path = %source, error = %e, "not a knowledge JSON file, importing as text");
            }
        }
    }

    let mut metadata = Metadata::new();
    metadata.insert("source".to_string(), source);
    Ok(vec![(content, metadata)])
}

fn entry_metadata(source: &str, raw: serde_json::Map<String, serde_json::Value>) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("source".to_string(), source.to_string());
    for (key, value) in raw {
        let value = match value {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        metadata.insert(key, value);
    }
    metadata
}

/// Import one file into `slot`.
pub fn import_file(
    engine: &RetrievalEngine,
    path: &Path,
    slot: Option<&str>,
) -> Result<ImportReport> {
    let entries = read_entries(path)?;
    let mut report = ImportReport {
        files: 1,
        ..ImportReport::default()
    };
    if entries.is_empty() {
        return Ok(report);
    }

    let (texts, metadata): (Vec<String>, Vec<Metadata>) = entries.into_iter().unzip();
    let ingested = engine
        .ingest_many(&texts, Some(&metadata), slot)
        .with_context(|| format!("Failed to import {}", path.display()))?;
    report.texts = ingested.texts;
    report.chunks = ingested.chunks;
    info!(path = %path.display(), texts = report.texts, chunks = report.chunks, "imported file");
    Ok(report)
}

/// Import every matching file under `root` into `slot`.
pub fn import_dir(
    engine: &RetrievalEngine,
    root: &Path,
    include_globs: &[String],
    slot: Option<&str>,
) -> Result<ImportReport> {
    let files = scan_dir(root, include_globs)?;
    let mut report = ImportReport::default();
    for path in files {
        let file_report = import_file(engine, &path, slot)?;
        report.files += file_report.files;
        report.texts += file_report.texts;
        report.chunks += file_report.chunks;
    }
    Ok(report)
}

/// Import a file, or a directory with the default globs.
pub fn import_path(
    engine: &RetrievalEngine,
    path: &Path,
    slot: Option<&str>,
) -> Result<ImportReport> {
    if path.is_dir() {
        let globs: Vec<String> = DEFAULT_INCLUDE_GLOBS.iter().map(|g| g.to_string()).collect();
        import_dir(engine, path, &globs, slot)
    } else {
        import_file(engine, path, slot)
    }
}

/// Files under `root` matching `include_globs`, sorted by path.
pub fn scan_dir(root: &Path, include_globs: &[String]) -> Result<Vec<std::path::PathBuf>> {
    if !root.is_dir() {
        anyhow::bail!("Import root is not a directory: {}", root.display());
    }
    let include_set = build_globset(include_globs)?;
    let exclude_patterns: Vec<String> = DEFAULT_EXCLUDE_GLOBS.iter().map(|g| g.to_string()).collect();
    let exclude_set = build_globset(&exclude_patterns)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy();
        if exclude_set.is_match(rel_str.as_ref()) || !include_set.is_match(rel_str.as_ref()) {
            continue;
        }
        files.push(path.to_path_buf());
    }
    files.sort();
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
