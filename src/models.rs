//! Plain data carried between the chunker, the index and the query path.
use serde::{Deserialize, Serialize};

/// A source document. Owned by the caller; never mutated by the crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub raw_text: String,
}

impl Document {
    pub fn new(id: impl Into<String>, raw_text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            raw_text: raw_text.into(),
        }
    }
}

/// A contiguous slice of a document. Offsets count characters, not bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

impl Chunk {
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.end_offset - self.start_offset
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector {
    pub chunk_id: String,
    pub values: Vec<f32>,
}

impl EmbeddingVector {
    pub fn new(chunk_id: impl Into<String>, values: Vec<f32>) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            values,
        }
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.values.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Higher is more similar.
    pub score: f32,
}

/// Ranked search hits, best first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub hits: Vec<ScoredChunk>,
}

impl RetrievalResult {
    #[must_use]
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ScoredChunk> {
        self.hits.iter()
    }

    pub fn chunk_ids(&self) -> Vec<&str> {
        self.hits.iter().map(|h| h.chunk.id.as_str()).collect()
    }
}

impl<'a> IntoIterator for &'a RetrievalResult {
    type Item = &'a ScoredChunk;
    type IntoIter = std::slice::Iter<'a, ScoredChunk>;

    fn into_iter(self) -> Self::IntoIter {
        self.hits.iter()
    }
}

/// A generated answer and the chunks that made it into the prompt, in rank order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Answer {
    pub text: String,
    pub used_chunk_ids: Vec<String>,
}
