#[cfg(test)]
mod tests;

pub mod persist;

use std::cmp::Ordering;
use std::collections::HashMap;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::catalog::ItemId;
use crate::{CinebrainError, Result};

/// Width of the grid scores are compared on. Scores rounding to the same
/// grid cell are ties and are ordered by id.
pub const SCORE_TIE_TOLERANCE: f64 = 1e-9;

/// Rows scanned between cancellation checks.
const SCAN_BLOCK_ROWS: usize = 1024;

/// A single search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: ItemId,
    /// Cosine similarity in [-1, 1].
    pub score: f64,
}

/// Exact (brute-force) cosine similarity index.
///
/// Vectors are stored L2-normalized in one contiguous row-major buffer, so a
/// query costs one dot product per row. Slots are dense `0..len()`; the
/// slot↔id mapping is owned here and nowhere else.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    dimension: Option<usize>,
    vectors: Vec<f32>,
    ids: Vec<ItemId>,
    slots: HashMap<ItemId, usize>,
}

impl VectorIndex {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty index that only accepts vectors of `dimension`.
    #[inline]
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: Some(dimension),
            ..Self::default()
        }
    }

    /// Build a fresh index from `(id, vector)` pairs.
    ///
    /// The first vector fixes the dimension. A later duplicate id replaces
    /// the earlier vector in place.
    #[inline]
    pub fn build<I, V>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (ItemId, V)>,
        V: AsRef<[f32]>,
    {
        let mut index = Self::new();
        for (id, vector) in entries {
            index.upsert(id, vector.as_ref())?;
        }
        info!(
            "Built vector index with {} entries ({} dimensions)",
            index.len(),
            index.dimension.unwrap_or(0)
        );
        Ok(index)
    }

    /// Insert a vector, or replace the one already stored for `id`.
    #[inline]
    pub fn upsert(&mut self, id: ItemId, vector: &[f32]) -> Result<()> {
        // Validate before the first vector gets to fix the dimension.
        if vector.is_empty() {
            return Err(CinebrainError::DimensionMismatch {
                expected: self.dimension.unwrap_or(0),
                actual: 0,
            });
        }
        if !vector.iter().all(|value| value.is_finite()) {
            return Err(CinebrainError::InvalidResponse(format!(
                "vector for {} contains non-finite values",
                id
            )));
        }

        let dimension = *self.dimension.get_or_insert(vector.len());
        if vector.len() != dimension {
            return Err(CinebrainError::DimensionMismatch {
                expected: dimension,
                actual: vector.len(),
            });
        }

        let normalized = normalize(vector);
        match self.slots.get(&id) {
            Some(&slot) => {
                let start = slot * dimension;
                self.vectors[start..start + dimension].copy_from_slice(&normalized);
                debug!("Replaced vector for {} in slot {}", id, slot);
            }
            None => {
                let slot = self.ids.len();
                self.vectors.extend_from_slice(&normalized);
                self.slots.insert(id.clone(), slot);
                self.ids.push(id);
            }
        }
        Ok(())
    }

    /// Top-`k` entries by descending cosine similarity.
    #[inline]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.search_cancellable(query, k, &CancellationToken::new())
    }

    /// Like [`Self::search`], checking `cancel` between scan blocks.
    #[inline]
    pub fn search_cancellable(
        &self,
        query: &[f32],
        k: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchHit>> {
        let dimension = match self.dimension {
            Some(dimension) if !self.ids.is_empty() => dimension,
            _ => return Err(CinebrainError::EmptyIndex),
        };
        if query.len() != dimension {
            return Err(CinebrainError::DimensionMismatch {
                expected: dimension,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let query = normalize(query);
        let mut scored: Vec<(usize, f64)> = Vec::with_capacity(self.ids.len());
        for (block_index, block) in self
            .vectors
            .chunks(SCAN_BLOCK_ROWS * dimension)
            .enumerate()
        {
            if cancel.is_cancelled() {
                return Err(CinebrainError::Cancelled);
            }
            let base = block_index * SCAN_BLOCK_ROWS;
            scored.extend(
                block
                    .chunks_exact(dimension)
                    .enumerate()
                    .map(|(row, stored)| (base + row, dot(&query, stored))),
            );
        }

        let compare = |a: &(usize, f64), b: &(usize, f64)| {
            compare_scores(a.1, &self.ids[a.0], b.1, &self.ids[b.0])
        };
        let k = k.min(scored.len());
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, compare);
            scored.truncate(k);
        }
        scored.sort_by(compare);

        Ok(scored
            .into_iter()
            .map(|(slot, score)| SearchHit {
                id: self.ids[slot].clone(),
                score: score.clamp(-1.0, 1.0),
            })
            .collect())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Dimension fixed by the first vector, if any.
    #[inline]
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Identifiers in slot order.
    #[inline]
    pub fn ids(&self) -> &[ItemId] {
        &self.ids
    }

    #[inline]
    pub fn contains(&self, id: &ItemId) -> bool {
        self.slots.contains_key(id)
    }

    #[inline]
    pub fn slot_of(&self, id: &ItemId) -> Option<usize> {
        self.slots.get(id).copied()
    }

    /// The stored (normalized) vector for `id`.
    #[inline]
    pub fn vector(&self, id: &ItemId) -> Option<&[f32]> {
        let dimension = self.dimension?;
        let slot = self.slot_of(id)?;
        self.vectors.get(slot * dimension..(slot + 1) * dimension)
    }

    pub(crate) fn raw_vectors(&self) -> &[f32] {
        &self.vectors
    }

    /// Reassemble from already-normalized parts; callers validate lengths.
    pub(crate) fn from_raw_parts(dimension: usize, vectors: Vec<f32>, ids: Vec<ItemId>) -> Self {
        let slots = ids
            .iter()
            .enumerate()
            .map(|(slot, id)| (id.clone(), slot))
            .collect();
        Self {
            dimension: Some(dimension),
            vectors,
            ids,
            slots,
        }
    }
}

/// Cosine similarity `dot(a, b) / (|a| |b|)`, zero when either norm is zero.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let norm_a = norm(a);
    let norm_b = norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot(a, b) / (norm_a * norm_b)
}

/// Descending score, then ascending id for scores in the same tolerance cell.
///
/// Cells make the order transitive across chains of near-equal scores.
#[inline]
pub fn compare_scores(score_a: f64, id_a: &ItemId, score_b: f64, id_b: &ItemId) -> Ordering {
    score_cell(score_b)
        .cmp(&score_cell(score_a))
        .then_with(|| id_a.cmp(id_b))
}

fn score_cell(score: f64) -> i64 {
    // Scores are cosines in [-1, 1], far inside i64 range once scaled.
    (score / SCORE_TIE_TOLERANCE).round() as i64
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum()
}

fn norm(v: &[f32]) -> f64 {
    v.iter().map(|x| f64::from(*x) * f64::from(*x)).sum::<f64>().sqrt()
}

/// Unit-length copy of `v`; zero vectors stay zero.
fn normalize(v: &[f32]) -> Vec<f32> {
    let length = norm(v);
    if length == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| (f64::from(*x) / length) as f32).collect()
}
