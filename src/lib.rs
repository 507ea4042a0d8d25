//! # Hybrid RAG
//!
//! Question answering over indexed text chunks with hybrid retrieval.
//!
//! Each chunk is stored as one point carrying three representations: a
//! dense sentence embedding, a BM25 sparse vector and a late-interaction
//! multivector (one vector per token). Queries prefetch candidates from
//! the dense and sparse spaces, then re-rank the union by MaxSim over the
//! token vectors.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ chunks.json│──▶│ IndexWriter  │──▶│ SqliteStore  │
//! └────────────┘   │ embed+upsert │   │ points/alias │
//!                  └──────────────┘   └──────┬───────┘
//!                                            │
//!                         ┌──────────────────┤
//!                         ▼                  ▼
//!                  ┌──────────────┐   ┌──────────────┐
//!                  │ HybridRetr.  │   │ summarize    │
//!                  │ prefetch+rank│   │ scroll+budget│
//!                  └──────┬───────┘   └──────┬───────┘
//!                         └────────┬─────────┘
//!                                  ▼
//!                          ┌──────────────┐
//!                          │ ChatPipeline │ (Ollama)
//!                          └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! hrag init
//! hrag index ./chunks.json --collection manual
//! hrag search "what produces energy in a cell?" --collection manual
//! hrag chat --collection manual "summarize the whole document"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`chunks`] | Chunk file loading |
//! | [`embedding`] | Dense, sparse and late-interaction providers |
//! | [`sqlite_store`] | SQLite vector store |
//! | [`generation`] | Ollama generation and prompts |
//! | [`intent`] | Chat intent classification |
//! | [`chat`] | Per-session chat pipeline |
//! | [`tokens`] | Token counters for the summary budget |
//! | [`search`] | `hrag search` |
//! | [`index_cmd`] | `hrag index` / `hrag drop` |
//! | [`stats`] | `hrag stats` |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chat;
pub mod chunks;
pub mod config;
pub mod db;
pub mod embedding;
pub mod generation;
pub mod http;
pub mod index_cmd;
pub mod intent;
pub mod migrate;
pub mod search;
pub mod sqlite_store;
pub mod stats;
pub mod tokens;
