//! Engine behavior over on-disk snapshots.

use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;

use tempfile::TempDir;

use knowledge_harness::config::Config;
use knowledge_harness::embedding::HashProvider;
use knowledge_harness::engine::{EngineError, EngineSettings, RetrievalEngine, RetrieveOptions};
use knowledge_harness::importer::import_path;
use knowledge_harness::persist::{DiskSnapshotStore, SnapshotStore};
use knowledge_harness_core::embedding::EmbeddingProvider;
use knowledge_harness_core::index::IndexConfig;
use knowledge_harness_core::models::{IndexState, Metadata};

fn provider() -> Arc<dyn EmbeddingProvider> {
    Arc::new(HashProvider::new(128))
}

fn disk_engine(base: &std::path::Path, settings: EngineSettings) -> RetrievalEngine {
    RetrievalEngine::open(provider(), Arc::new(DiskSnapshotStore::new(base)), settings)
}

fn small_index_settings() -> EngineSettings {
    EngineSettings {
        index: IndexConfig {
            transition_threshold: 40,
            points_per_cluster: 5,
            max_clusters: 8,
            nprobe: 3,
            ..IndexConfig::default()
        },
        ..EngineSettings::default()
    }
}

fn any_threshold() -> RetrieveOptions {
    RetrieveOptions {
        threshold: Some(-1.0),
        ..Default::default()
    }
}

#[test]
fn test_save_and_reload_from_disk() {
    let tmp = TempDir::new().unwrap();
    let base = tmp.path().join("kb");

    let first = disk_engine(&base, EngineSettings::default());
    let mut meta = Metadata::new();
    meta.insert("source".to_string(), "runbook".to_string());
    first
        .ingest("The CDN purges stale assets nightly. Use the API to force a purge.", meta, Some("technical"))
        .unwrap();
    first.ingest("Office plants are watered on Mondays.", Metadata::new(), None).unwrap();

    assert!(base.join("index/documents.json").is_file());
    assert!(base.join("index/index.bin").is_file());

    let second = disk_engine(&base, EngineSettings::default());
    assert_eq!(second.len(), first.len());
    assert_eq!(second.index_len(), second.len());
    assert_eq!(second.documents(None), first.documents(None));

    let options = any_threshold();
    assert_eq!(
        second.retrieve("CDN purge", &options).unwrap(),
        first.retrieve("CDN purge", &options).unwrap()
    );
}

#[test]
fn test_missing_index_file_is_rebuilt() {
    let tmp = TempDir::new().unwrap();
    let base = tmp.path().join("kb");

    let first = disk_engine(&base, EngineSettings::default());
    first.ingest("alpha. beta. gamma.", Metadata::new(), None).unwrap();
    fs::remove_file(base.join("index/index.bin")).unwrap();

    let second = disk_engine(&base, EngineSettings::default());
    assert_eq!(second.len(), first.len());
    assert_eq!(second.index_len(), second.len());
}

#[test]
fn test_corrupt_documents_start_empty() {
    let tmp = TempDir::new().unwrap();
    let base = tmp.path().join("kb");

    let first = disk_engine(&base, EngineSettings::default());
    first.ingest("something worth keeping", Metadata::new(), None).unwrap();
    fs::write(base.join("index/documents.json"), "{ truncated").unwrap();

    let second = disk_engine(&base, EngineSettings::default());
    assert!(second.is_empty());
    assert_eq!(second.index_len(), 0);
}

#[test]
fn test_index_switches_to_clustered_and_survives_reload() {
    let tmp = TempDir::new().unwrap();
    let base = tmp.path().join("kb");
    let engine = disk_engine(&base, small_index_settings());

    let texts: Vec<String> = (0..39)
        .map(|i| format!("Maintenance note {i} about rack {} and cable {}", i % 7, i * 13))
        .collect();
    engine.ingest_many(&texts, None, None).unwrap();
    assert_eq!(engine.index_state(), IndexState::Flat);

    engine
        .ingest("The UPS battery in rack 3 needs replacement.", Metadata::new(), None)
        .unwrap();
    assert_eq!(engine.len(), 40);
    assert_eq!(engine.index_state(), IndexState::Clustered);
    assert!(engine.stats().clusters > 0);

    engine.ingest("One more note after clustering.", Metadata::new(), None).unwrap();
    assert_eq!(engine.index_len(), 41);
    assert_eq!(engine.index_state(), IndexState::Clustered);

    let items = engine.retrieve_items("UPS battery", &any_threshold()).unwrap();
    assert!(items[0].content.contains("UPS battery"));

    let reloaded = disk_engine(&base, small_index_settings());
    assert_eq!(reloaded.index_state(), IndexState::Clustered);
    assert_eq!(reloaded.index_len(), 41);
}

#[test]
fn test_delete_below_threshold_returns_to_flat() {
    let tmp = TempDir::new().unwrap();
    let engine = disk_engine(&tmp.path().join("kb"), small_index_settings());

    let texts: Vec<String> = (0..45).map(|i| format!("ticket {i} resolved")).collect();
    engine.ingest_many(&texts, None, None).unwrap();
    assert_eq!(engine.index_state(), IndexState::Clustered);

    let doomed: BTreeSet<usize> = (0..10).collect();
    assert_eq!(engine.delete(&doomed).unwrap(), 10);
    assert_eq!(engine.len(), 35);
    assert_eq!(engine.index_len(), 35);
    assert_eq!(engine.index_state(), IndexState::Flat);
    assert!(engine
        .documents(None)
        .iter()
        .all(|(_, c)| c.content != "ticket 3 resolved"));
}

#[test]
fn test_clear_all_is_idempotent_on_disk() {
    let tmp = TempDir::new().unwrap();
    let base = tmp.path().join("kb");
    let engine = disk_engine(&base, EngineSettings::default());
    engine.ingest("temporary", Metadata::new(), None).unwrap();

    assert_eq!(engine.clear_all().unwrap(), 1);
    assert_eq!(engine.clear_all().unwrap(), 0);

    let snapshot = DiskSnapshotStore::new(&base).load().unwrap().unwrap();
    assert!(snapshot.documents.is_empty());
    assert_eq!(snapshot.index.map(|i| i.len()), Some(0));
}

#[test]
fn test_unwritable_base_reports_not_durable() {
    let tmp = TempDir::new().unwrap();
    let base = tmp.path().join("blocker");
    fs::write(&base, "a file where the directory should be").unwrap();

    let engine = disk_engine(&base, EngineSettings::default());
    let err = engine.ingest("still usable", Metadata::new(), None).unwrap_err();
    assert!(matches!(err, EngineError::NotDurable { applied: 1, .. }));
    assert!(!err.is_input_error());

    // The change is applied in memory.
    assert_eq!(engine.len(), 1);
    let items = engine.retrieve_items("still usable", &any_threshold()).unwrap();
    assert_eq!(items.len(), 1);
}

#[test]
fn test_from_config_and_import() {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs_in");
    fs::create_dir_all(&docs).unwrap();
    fs::write(
        docs.join("faq.json"),
        r#"{"content": "Reset your password from the SSO portal.", "metadata": {"source": "helpdesk"}}"#,
    )
    .unwrap();
    fs::write(docs.join("notes.md"), "Printers on floor two use driver v4.").unwrap();

    let mut config = Config::default();
    config.storage.base_dir = tmp.path().join("kb");
    config.embedding.dims = 64;
    let engine = RetrievalEngine::from_config(&config).unwrap();

    let report = import_path(&engine, &docs, Some("support")).unwrap();
    assert_eq!(report.files, 2);
    assert_eq!(report.texts, 2);
    assert_eq!(engine.len(), 2);

    let items = engine
        .retrieve_items(
            "SSO password",
            &RetrieveOptions {
                slot: Some("support".to_string()),
                threshold: Some(0.0),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(items[0].metadata["source"], "helpdesk");
    assert_eq!(items[0].matched, vec!["SSO".to_string()]);
}
