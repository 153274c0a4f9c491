#[cfg(test)]
mod tests;

use std::cmp::Ordering;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FlatIndexError {
    #[error("Vector has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("{len} stored values do not divide into {dimension}-dimensional vectors")]
    Truncated { len: usize, dimension: usize },
    #[error("Index dimension must be non-zero")]
    ZeroDimension,
}

/// A nearest-neighbor candidate: vector slot and squared Euclidean distance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub slot: usize,
    pub distance: f32,
}

/// Exact nearest-neighbor index over row-major `f32` vectors.
///
/// Slots are dense and assigned in insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dimension: usize,
    values: Vec<f32>,
}

impl FlatIndex {
    #[inline]
    pub fn new(dimension: usize) -> Result<Self, FlatIndexError> {
        Self::with_capacity(dimension, 0)
    }

    #[inline]
    pub fn with_capacity(dimension: usize, vectors: usize) -> Result<Self, FlatIndexError> {
        if dimension == 0 {
            return Err(FlatIndexError::ZeroDimension);
        }
        Ok(Self {
            dimension,
            values: Vec::with_capacity(dimension * vectors),
        })
    }

    /// Rebuild from a row-major buffer, as stored on disk
    #[inline]
    pub fn from_values(dimension: usize, values: Vec<f32>) -> Result<Self, FlatIndexError> {
        if dimension == 0 {
            return Err(FlatIndexError::ZeroDimension);
        }
        if values.len() % dimension != 0 {
            return Err(FlatIndexError::Truncated {
                len: values.len(),
                dimension,
            });
        }
        Ok(Self { dimension, values })
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len() / self.dimension
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Append a vector and return its slot
    #[inline]
    pub fn add(&mut self, vector: &[f32]) -> Result<usize, FlatIndexError> {
        self.check_dimension(vector)?;
        let slot = self.len();
        self.values.extend_from_slice(vector);
        Ok(slot)
    }

    #[inline]
    pub fn vector(&self, slot: usize) -> Option<&[f32]> {
        let start = slot.checked_mul(self.dimension)?;
        self.values.get(start..start + self.dimension)
    }

    /// The `k` nearest slots by ascending squared distance; ties go to the lower slot
    #[inline]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, FlatIndexError> {
        self.check_dimension(query)?;

        let k = k.min(self.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut neighbors: Vec<Neighbor> = self
            .values
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(slot, vector)| Neighbor {
                slot,
                distance: squared_l2(query, vector),
            })
            .collect();

        if k < neighbors.len() {
            neighbors.select_nth_unstable_by(k - 1, compare_neighbors);
            neighbors.truncate(k);
        }
        neighbors.sort_unstable_by(compare_neighbors);

        Ok(neighbors)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), FlatIndexError> {
        if vector.len() == self.dimension {
            Ok(())
        } else {
            Err(FlatIndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            })
        }
    }
}

fn compare_neighbors(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| a.slot.cmp(&b.slot))
}

#[inline]
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Map a distance onto (0, 1], decreasing as distance grows
#[inline]
pub fn similarity(distance: f32) -> f32 {
    1.0 / (1.0 + distance.max(0.0))
}
