//! # Hybrid RAG Core
//!
//! Runtime-agnostic retrieval logic: the point schema, embedding traits,
//! the vector store abstraction and the two-stage fusion engine that sits
//! between them.
//!
//! Retrieval combines three signals. Dense and sparse (BM25 with IDF)
//! searches each prefetch a bounded candidate set; the union is re-ranked
//! by late-interaction MaxSim and truncated.
//!
//! This crate has no tokio, sqlx or filesystem dependencies. Network and
//! ONNX embedding backends, the SQLite store and the CLI live in the
//! `hybrid-rag` app crate.

pub mod bm25;
pub mod context;
pub mod embedding;
pub mod error;
pub mod fusion;
pub mod hashing;
pub mod index;
pub mod models;
pub mod retrieve;
pub mod similarity;
pub mod store;
pub mod summarize;
