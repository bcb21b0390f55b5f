//! ragstash - per-user hybrid retrieval over saved web content and documents.
//!
//! ragstash keeps one lexical BM25 index shard per user next to a persistent
//! document store, talks to an external embedding provider and vector index
//! for semantic recall, and fuses both branches into a single deterministic
//! ranking. Every operation is scoped to exactly one user; no query ever
//! crosses user boundaries.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ragstash::{
//!     DataDir, LexicalIndex, RedbStore, RetrievalEngine,
//!     engine::{EngineConfig, SearchRequest},
//!     vector::{MemoryVectorIndex, UnconfiguredEmbedder},
//! };
//!
//! # async fn run() -> ragstash::Result<()> {
//! let data_dir = DataDir::resolve(None)?;
//! let engine = RetrievalEngine::new(
//!     Arc::new(RedbStore::open(&data_dir.store_db())?),
//!     Arc::new(LexicalIndex::new()),
//!     Arc::new(UnconfiguredEmbedder),
//!     Arc::new(MemoryVectorIndex::new()),
//!     EngineConfig::default(),
//! );
//! engine.rebuild()?;
//!
//! let response = engine.search(&SearchRequest::new(1, "rust borrow checker")).await?;
//! for r in &response.results {
//!     println!("#{} {:.3} {}", r.doc_id, r.fused_score, r.metadata_snapshot.title);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod data_dir;
pub mod document;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod lexical;
pub mod mcp;
pub mod store;
pub mod vector;
pub mod vector_db;

pub use data_dir::DataDir;
pub use document::{ContentType, DocId, Document, TenantId};
pub use engine::{RetrievalEngine, SearchMode};
pub use error::{Error, Result};
pub use lexical::LexicalIndex;
pub use store::RedbStore;
pub use vector_db::RedbVectorIndex;
