//! Bombe: structure-aware code retrieval engine.
//!
//! Ingests a local source tree, builds a persistent code graph in an
//! embedded SQLite store, and answers graph-shaped queries (symbol
//! search, caller/callee traversal, blast radius, data flow, change
//! impact, and token-budgeted context assembly) under hard guardrails
//! and determinism guarantees.

pub mod config;
pub mod error;
pub mod indexer;
pub mod models;
pub mod observability;
pub mod query;
pub mod store;
pub mod sync;
pub mod workspace;

pub use error::{Error, Result};
pub use indexer::pipeline::{full_index, incremental_index, IndexOptions};
pub use models::{FileChange, IndexStats, Language};
pub use store::Store;
