//! Flat (brute-force) vector index.
//!
//! Vectors live in one contiguous buffer and are addressed by slot, the order
//! in which they were appended. There is no remove or replace: a slot stays
//! valid only while the index is grown by appends, so callers rebuild a fresh
//! index whenever a vector has to change or disappear.

use serde::{Deserialize, Serialize};
use simdex_core::{AppError, AppResult};
use std::cmp::Ordering;

/// Distance metric, fixed when an index is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Squared Euclidean distance; lower is closer.
    #[default]
    L2,
    /// Inner product of unit vectors; higher is closer.
    Cosine,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::L2 => "l2",
            Metric::Cosine => "cosine",
        }
    }

    pub fn parse(value: &str) -> AppResult<Self> {
        match value.to_ascii_lowercase().as_str() {
            "l2" => Ok(Metric::L2),
            "cosine" => Ok(Metric::Cosine),
            other => Err(AppError::Config(format!(
                "Unknown metric '{}'. Supported: l2, cosine",
                other
            ))),
        }
    }

    /// Whether `a` ranks ahead of `b` under this metric.
    pub fn is_better(&self, a: f32, b: f32) -> bool {
        match self {
            Metric::L2 => a < b,
            Metric::Cosine => a > b,
        }
    }

    /// Whether a score passes a threshold (maximum distance for L2,
    /// minimum similarity for cosine).
    pub fn passes(&self, score: f32, threshold: f32) -> bool {
        match self {
            Metric::L2 => score <= threshold,
            Metric::Cosine => score >= threshold,
        }
    }

    fn compare(&self, a: f32, b: f32) -> Ordering {
        match self {
            Metric::L2 => a.total_cmp(&b),
            Metric::Cosine => b.total_cmp(&a),
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `(slot, score)` pair returned by [`FlatIndex::nearest`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub slot: usize,
    pub score: f32,
}

/// Append-only exact nearest-neighbor index.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dimension: usize,
    metric: Metric,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dimension: usize, metric: Metric) -> Self {
        Self {
            dimension,
            metric,
            data: Vec::new(),
        }
    }

    /// Rebuild an index from a raw row-major buffer.
    ///
    /// Cosine buffers are taken as already normalized.
    pub fn from_raw(dimension: usize, metric: Metric, data: Vec<f32>) -> AppResult<Self> {
        if dimension == 0 || data.len() % dimension != 0 {
            return Err(AppError::Persistence(format!(
                "Vector buffer of {} floats does not divide into rows of {}",
                data.len(),
                dimension
            )));
        }
        Ok(Self {
            dimension,
            metric,
            data,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn size(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn raw(&self) -> &[f32] {
        &self.data
    }

    pub fn vector(&self, slot: usize) -> Option<&[f32]> {
        let start = slot.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    /// Append a vector and return its slot.
    pub fn append(&mut self, vector: &[f32]) -> AppResult<usize> {
        if vector.len() != self.dimension {
            return Err(AppError::Embedding(format!(
                "Vector dimension mismatch: expected {}, got {}",
                self.dimension,
                vector.len()
            )));
        }

        let slot = self.size();
        match self.metric {
            Metric::L2 => self.data.extend_from_slice(vector),
            Metric::Cosine => self.data.extend(normalized(vector)),
        }
        Ok(slot)
    }

    /// Up to `k` nearest slots, best first, ties broken by ascending slot.
    pub fn nearest(&self, query: &[f32], k: usize) -> AppResult<Vec<Neighbor>> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        if query.len() != self.dimension {
            return Err(AppError::Embedding(format!(
                "Query dimension mismatch: expected {}, got {}",
                self.dimension,
                query.len()
            )));
        }

        let query: Vec<f32> = match self.metric {
            Metric::L2 => query.to_vec(),
            Metric::Cosine => normalized(query).collect(),
        };

        let mut scored: Vec<Neighbor> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(slot, row)| Neighbor {
                slot,
                score: match self.metric {
                    Metric::L2 => squared_l2(&query, row),
                    Metric::Cosine => dot_product(&query, row),
                },
            })
            .collect();

        scored.sort_by(|a, b| {
            self.metric
                .compare(a.score, b.score)
                .then_with(|| a.slot.cmp(&b.slot))
        });
        scored.truncate(k);

        Ok(scored)
    }
}

/// Scale a vector to unit length; zero vectors stay zero.
fn normalized(vector: &[f32]) -> impl Iterator<Item = f32> + '_ {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    let scale = if norm > 0.0 { 1.0 / norm } else { 0.0 };
    vector.iter().map(move |x| x * scale)
}

fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}
