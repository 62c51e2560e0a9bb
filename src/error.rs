//! Error taxonomy shared by the chunker, the vector index and the query path.
//!
//! Errors from the two backend ports keep their own enums
//! ([`EmbedderError`], [`GeneratorError`]) and are carried as sources so the
//! caller can still see what the backend reported.
use std::path::PathBuf;

use thiserror::Error;

use crate::embedder::EmbedderError;
use crate::generator::GeneratorError;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    /// Invalid chunking, retrieval or backend settings. Raised before any work starts.
    #[error("configuration error: {field}: {reason}")]
    Configuration { field: &'static str, reason: String },

    /// A vector disagrees with the declared dimensionality of the index.
    #[error("dimension mismatch in {operation} for {entity}: expected {expected}, got {actual}")]
    DimensionMismatch {
        operation: &'static str,
        entity: String,
        expected: usize,
        actual: usize,
    },

    #[error("corrupt index file {}: {reason}", path.display())]
    CorruptIndex { path: PathBuf, reason: String },

    #[error("unsupported index format version {found} in {} (supported: {supported})", path.display())]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        supported: u32,
    },

    #[error("embedding backend unavailable while embedding {entity}")]
    EmbeddingUnavailable {
        entity: String,
        #[source]
        source: EmbedderError,
    },

    #[error("generation backend unavailable after {attempts} attempt(s)")]
    GenerationUnavailable {
        attempts: u32,
        #[source]
        source: GeneratorError,
    },

    #[error("{operation} cancelled by caller")]
    Cancelled { operation: &'static str },

    #[error("i/o error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RagError {
    pub(crate) fn config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Configuration {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the same call could plausibly succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingUnavailable { .. } | Self::GenerationUnavailable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_names_operation_and_entity() {
        let err = RagError::DimensionMismatch {
            operation: "append",
            entity: "notes#3".to_string(),
            expected: 384,
            actual: 128,
        };
        let msg = err.to_string();
        assert!(msg.contains("append"));
        assert!(msg.contains("notes#3"));
        assert!(msg.contains("384"));
        assert!(msg.contains("128"));
    }

    #[test]
    fn test_transient_classification() {
        let err = RagError::EmbeddingUnavailable {
            entity: "query".to_string(),
            source: EmbedderError::Timeout(std::time::Duration::from_secs(30)),
        };
        assert!(err.is_transient());
        assert!(!RagError::config("top_k", "must be positive").is_transient());
    }
}
