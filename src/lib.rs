//! # ragindex: retrieval-augmented generation core
//!
//! Splits documents into overlapping chunks, embeds them into a persistent
//! vector index, and answers questions by packing the best-matching chunks
//! into a bounded prompt for a generation backend.
//!
//! ## Architecture
//!
//! - **[`indexer`]**: Character-window chunking and the concurrent build pipeline
//! - **[`index`]**: Vector index with exact and partitioned search plus a versioned file format
//! - **[`embedder`]**: Embedding port and its mock / OpenAI-compatible backends
//! - **[`generator`]**: Generation port and its mock / OpenAI-compatible backends
//! - **[`retriever`]**: Query embedding followed by index search
//! - **[`qa`]**: Context packing, prompt assembly and retried generation
//! - **[`config`]**: JSON configuration with defaults and validation
//! - **[`error`]**: Error taxonomy shared by every component

pub mod config;
pub mod embedder;
pub mod error;
pub mod generator;
pub mod index;
pub mod indexer;
pub mod models;
pub mod qa;
pub mod retriever;

pub use error::{RagError, Result};
pub use index::{SimilarityMetric, VectorIndex};
pub use models::{Answer, Chunk, Document, EmbeddingVector, RetrievalResult, ScoredChunk};
