use crate::error::{RagError, Result};
use crate::models::{Chunk, Document};

/// Window size and overlap for [`split`], both in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::config("chunk_size", "must be positive"));
        }
        if self.overlap >= self.chunk_size {
            return Err(RagError::config(
                "chunk_overlap",
                format!(
                    "overlap {} must be smaller than chunk_size {}",
                    self.overlap, self.chunk_size
                ),
            ));
        }
        Ok(())
    }

    /// Distance between the starts of two consecutive windows.
    #[must_use]
    pub fn stride(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

/// Splits a document's text into overlapping fixed-size windows.
pub fn chunk_document(document: &Document, config: ChunkingConfig) -> Result<Vec<Chunk>> {
    split(&document.id, &document.raw_text, config)
}

/// Sliding window over `text` by character position.
///
/// Window `i` starts at `i * stride` and spans `chunk_size` characters; the
/// last window ends exactly at the end of the text and may be shorter.
/// Empty text yields no chunks.
pub fn split(document_id: &str, text: &str, config: ChunkingConfig) -> Result<Vec<Chunk>> {
    config.validate()?;

    // Byte offset of every char boundary, plus the end of the string.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(b, _)| b)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = boundaries.len() - 1;

    let mut chunks = Vec::new();
    if char_count == 0 {
        return Ok(chunks);
    }

    let mut start = 0;
    loop {
        let end = (start + config.chunk_size).min(char_count);
        chunks.push(Chunk {
            id: format!("{document_id}#{}", chunks.len()),
            document_id: document_id.to_string(),
            text: text[boundaries[start]..boundaries[end]].to_string(),
            start_offset: start,
            end_offset: end,
        });
        if end == char_count {
            break;
        }
        start += config.stride();
    }

    Ok(chunks)
}
