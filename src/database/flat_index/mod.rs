
use std::cmp::Ordering;

/// Exhaustive inner-product index over vectors stored back to back
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatIndex {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    #[inline]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    /// Rebuild an index from contiguous vector data.
    ///
    /// Returns `None` when `data` is not a whole number of vectors.
    #[inline]
    pub fn from_raw(dimension: usize, data: Vec<f32>) -> Option<Self> {
        if dimension == 0 {
            return data.is_empty().then(|| Self::new(0));
        }
        (data.len() % dimension == 0).then_some(Self { dimension, data })
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn vector(&self, ordinal: usize) -> Option<&[f32]> {
        let start = ordinal.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    /// Append a vector. Its length must equal the index dimension.
    #[inline]
    pub fn push(&mut self, vector: &[f32]) {
        debug_assert_eq!(vector.len(), self.dimension);
        self.data.extend_from_slice(vector);
    }

    /// Top `k` `(ordinal, score)` pairs by descending inner product with
    /// `query`, ties going to the lower ordinal. `k` is clamped to the
    /// index size.
    #[inline]
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        let k = k.min(self.len());
        if k == 0 || query.len() != self.dimension {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f32)> = self
            .data
            .chunks_exact(self.dimension)
            .map(|vector| dot(vector, query))
            .enumerate()
            .collect();

        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, rank);
            scored.truncate(k);
        }
        scored.sort_unstable_by(rank);
        scored
    }
}

fn rank(a: &(usize, f32), b: &(usize, f32)) -> Ordering {
    b.1.total_cmp(&a.1).then(a.0.cmp(&b.0))
}

#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
