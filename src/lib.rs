//! # Knowledge Harness
//!
//! A local knowledge base that turns a user query into prompt context for a
//! language model.
//!
//! Text is split into sentence-aware chunks, embedded, and appended to a
//! vector index that starts as an exact scan and switches once to a
//! clustered (IVF) layout as the corpus grows. Retrieval reranks candidates
//! in two phases: chunks sharing an abbreviation with the query come first,
//! then the most similar remainder.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌─────────────┐
//! │ kb add/import│──▶│ RetrievalEngine  │──▶│ docs/ index/│
//! │ POST /ingest │   │ chunk+embed+index│   │  snapshots  │
//! └──────────────┘   └────────┬─────────┘   └─────────────┘
//!                             │ two-phase rerank
//!                  ┌──────────┴─────────┐
//!                  ▼                    ▼
//!            ┌──────────┐         ┌──────────┐
//!            │   CLI    │         │   HTTP   │
//!            │   (kb)   │         │  (axum)  │
//!            └──────────┘         └──────────┘
//! ```
//!
//! The chunker, index, store and reranker live in the
//! `knowledge-harness-core` crate and do no I/O.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`embedding`] | Embedding provider construction |
//! | [`engine`] | The retrieval engine |
//! | [`persist`] | Snapshot storage on disk or in memory |
//! | [`importer`] | File and directory import |
//! | [`commands`] | `kb` subcommand bodies |
//! | [`server`] | HTTP server |

pub mod commands;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod importer;
pub mod persist;
pub mod server;
