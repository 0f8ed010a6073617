use super::chunking_strategy::Chunk;
use super::vector_index::SlotId;
use crate::error::{Result, RetrievalError};
use std::ops::Range;

/// Ordered, append-only chunk records.
///
/// Entry `i` describes the vector stored at slot `i` of the vector index.
/// Records are never updated or removed.
#[derive(Debug, Clone, Default)]
pub struct MetadataStore {
    chunks: Vec<Chunk>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_chunks(chunks: Vec<Chunk>) -> Self {
        Self { chunks }
    }

    /// Append records in the same order as the matching vectors
    pub fn append(&mut self, chunks: Vec<Chunk>) -> Range<SlotId> {
        let start = self.chunks.len();
        self.chunks.extend(chunks);
        start..self.chunks.len()
    }

    /// Look up the record for `slot`
    pub fn get(&self, slot: SlotId) -> Result<&Chunk> {
        self.chunks.get(slot).ok_or(RetrievalError::OutOfRange {
            slot,
            count: self.chunks.len(),
        })
    }

    pub fn count(&self) -> usize {
        self.chunks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(offset: usize, text: &str) -> Chunk {
        Chunk {
            source: "doc".to_string(),
            offset,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_append_and_get() {
        let mut store = MetadataStore::new();
        let first = store.append(vec![chunk(0, "ab"), chunk(2, "cd")]);
        let second = store.append(vec![chunk(4, "e")]);

        assert_eq!(first, 0..2);
        assert_eq!(second, 2..3);
        assert_eq!(store.count(), 3);
        assert_eq!(store.get(1).unwrap().text, "cd");
        assert_eq!(store.get(2).unwrap().offset, 4);
    }

    #[test]
    fn test_get_past_end_is_out_of_range() {
        let store = MetadataStore::from_chunks(vec![chunk(0, "only")]);
        assert!(matches!(
            store.get(1),
            Err(RetrievalError::OutOfRange { slot: 1, count: 1 })
        ));
        assert!(matches!(
            MetadataStore::new().get(0),
            Err(RetrievalError::OutOfRange { slot: 0, count: 0 })
        ));
    }
}
