//! Context assembly and prompt templates for answer generation.
use crate::models::ScoredChunk;

const INSTRUCTION: &str = "Answer the question using only the numbered context passages below. \
If the passages do not contain the answer, say that you do not know. \
Cite passages as [n].";

const NO_CONTEXT_INSTRUCTION: &str = "No reference passages were found for this question. \
Answer from general knowledge and state clearly that the answer is not grounded in the indexed documents.";

/// Separator placed between passages in the context block.
pub const PASSAGE_SEPARATOR: &str = "\n\n";

/// Characters the `[1] ` label adds to the top-ranked passage.
pub const FIRST_PASSAGE_OVERHEAD: usize = 4;

/// A rendered context block and the chunk ids it contains, in rank order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    pub block: String,
    pub chunk_ids: Vec<String>,
}

impl Context {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunk_ids.is_empty()
    }

    /// Length of the block in characters.
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.block.chars().count()
    }
}

/// Render ranked chunks as `[n] text` passages, keeping the longest ranked
/// prefix whose block stays within `max_chars` characters.
///
/// Passages are never cut mid-text: the first one that does not fit ends
/// the block, so lower-ranked chunks are always the ones dropped.
pub fn build_context(hits: &[ScoredChunk], max_chars: usize) -> Context {
    let mut context = Context::default();
    let mut used = 0usize;

    for (i, hit) in hits.iter().enumerate() {
        let passage = format!("[{}] {}", i + 1, hit.chunk.text);
        let separator = if context.is_empty() {
            0
        } else {
            PASSAGE_SEPARATOR.len()
        };
        let cost = separator + passage.chars().count();
        if used + cost > max_chars {
            break;
        }

        if separator > 0 {
            context.block.push_str(PASSAGE_SEPARATOR);
        }
        context.block.push_str(&passage);
        context.chunk_ids.push(hit.chunk.id.clone());
        used += cost;
    }

    context
}

/// Full prompt: instruction, context block, question.
pub fn format_prompt(query: &str, context: &Context) -> String {
    if context.is_empty() {
        return format!("{NO_CONTEXT_INSTRUCTION}\n\nQuestion: {query}\n\nAnswer:");
    }
    format!(
        "{INSTRUCTION}\n\nContext:\n{}\n\nQuestion: {query}\n\nAnswer:",
        context.block
    )
}
