//! In-memory nearest-neighbour search over fixed-dimension vectors.
//!
//! Slots are assigned in insertion order starting at zero and are never
//! reused or removed. Distances are squared Euclidean; results are ordered by
//! ascending distance with ties broken by ascending slot id, so a search over
//! the same contents always returns the same list.

use crate::error::{Result, RetrievalError};
use std::cmp::Ordering;
use std::ops::Range;

/// Slot id of a vector: its position in insertion order.
pub type SlotId = usize;

/// Search contract shared by exact and approximate index structures.
pub trait VectorIndex: std::fmt::Debug + Send + Sync {
    fn dimension(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append vectors at slots `len..len + vectors.len()`.
    ///
    /// Either every vector is appended or none is.
    fn add(&mut self, vectors: Vec<Vec<f32>>) -> Result<Range<SlotId>>;

    /// Return up to `k` `(slot, distance)` pairs nearest to `query`.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(SlotId, f32)>>;
}

/// Squared Euclidean distance between two vectors of equal length.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

fn by_distance_then_slot(a: &(SlotId, f32), b: &(SlotId, f32)) -> Ordering {
    a.1.total_cmp(&b.1).then(a.0.cmp(&b.0))
}

/// Exact brute-force index. Vectors are stored contiguously.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    /// Build an index already holding `vectors` at slots `0..vectors.len()`
    pub fn from_vectors(dimension: usize, vectors: Vec<Vec<f32>>) -> Result<Self> {
        let mut index = Self::new(dimension);
        index.add(vectors)?;
        Ok(index)
    }

    fn vector(&self, slot: SlotId) -> &[f32] {
        let start = slot * self.dimension;
        &self.data[start..start + self.dimension]
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

impl VectorIndex for FlatIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    fn add(&mut self, vectors: Vec<Vec<f32>>) -> Result<Range<SlotId>> {
        for vector in &vectors {
            self.check_dimension(vector)?;
        }

        let start = self.len();
        self.data.reserve(vectors.len() * self.dimension);
        for vector in &vectors {
            self.data.extend_from_slice(vector);
        }
        Ok(start..start + vectors.len())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(SlotId, f32)>> {
        self.check_dimension(query)?;

        let mut scored: Vec<(SlotId, f32)> = (0..self.len())
            .map(|slot| (slot, squared_l2(query, self.vector(slot))))
            .collect();

        if k < scored.len() {
            if k > 0 {
                scored.select_nth_unstable_by(k - 1, by_distance_then_slot);
            }
            scored.truncate(k);
        }
        scored.sort_unstable_by(by_distance_then_slot);
        Ok(scored)
    }
}
