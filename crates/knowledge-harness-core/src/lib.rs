//! # Knowledge Harness Core
//!
//! Storage-agnostic logic for Knowledge Harness: data models, the
//! abbreviation-preserving chunker, the flat/clustered vector index, the
//! ordered document store, and the two-phase rerank used to assemble
//! prompt context.
//!
//! This crate performs no filesystem or network I/O. Embedding backends,
//! persistence, and the engine that ties everything together live in the
//! `knowledge-harness` app crate.

pub mod chunk;
pub mod embedding;
pub mod index;
pub mod models;
pub mod retrieve;
pub mod store;
