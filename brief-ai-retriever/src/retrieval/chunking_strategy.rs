use crate::error::{Result, RetrievalError};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// A bounded segment of a document, the unit of embedding and retrieval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Identifier of the document the chunk came from
    pub source: String,
    /// Byte position of the chunk start within the document text
    pub offset: usize,
    pub text: String,
}

/// Fixed-window chunker.
///
/// Windows are `chunk_size` characters long and do not overlap; the last one
/// may be shorter. Boundaries always fall on character boundaries, so a
/// window never splits a multi-byte UTF-8 sequence.
#[derive(Debug, Clone)]
pub struct ChunkingStrategy {
    chunk_size: usize,
}

impl ChunkingStrategy {
    pub fn new(chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RetrievalError::invalid_config("chunk_size must be at least 1"));
        }
        Ok(Self { chunk_size })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Split `content` into windows tagged with `source` and their byte offset
    pub fn chunk_content(&self, source: &str, content: &str) -> Vec<Chunk> {
        let chunks: Vec<Chunk> = content
            .char_indices()
            .map(|(offset, _)| offset)
            .step_by(self.chunk_size)
            .chain(std::iter::once(content.len()))
            .tuple_windows()
            .map(|(start, end)| Chunk {
                source: source.to_string(),
                offset: start,
                text: content[start..end].to_string(),
            })
            .collect();

        tracing::debug!(
            "Chunked {} into {} chunks (window: {} chars)",
            source,
            chunks.len(),
            self.chunk_size
        );

        chunks
    }
}
