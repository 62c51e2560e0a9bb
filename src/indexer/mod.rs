//! Build-time side of the pipeline: splitting documents into chunks and
//! embedding them into a [`crate::index::VectorIndex`].
pub mod chunker;
pub mod core;

pub use chunker::{ChunkingConfig, chunk_document, split};
pub use self::core::{IndexBuilder, IndexSyncResult, ProgressFn};
