//! Distance metrics for vector similarity.
//!
//! Three metrics are supported: squared Euclidean, cosine distance, and
//! negated inner product. All of them return a value where **lower is
//! better** (more similar), so the same heap logic works for every metric.
//!
//! The kernels process elements in blocks of four with independent
//! accumulators so the compiler can autovectorize the inner loops. Metric
//! dispatch happens once per distance call (a match on a three-variant
//! enum), never per element.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Distance metric used for vector similarity computation.
///
/// All metrics return a distance where **lower means more similar**.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Squared Euclidean distance (no square root; monotone equivalent).
    Euclidean,
    /// Cosine distance: `1 - cosine_similarity`. Range: \[0, 2\].
    Cosine,
    /// Negated inner product: `-dot(a, b)`.
    InnerProduct,
}

impl DistanceMetric {
    /// Computes the distance between two equal-length vectors.
    ///
    /// For the cosine metric, a zero-norm operand yields a distance of 1.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if the vectors have different lengths.
    #[must_use]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len(), "vector dimensions must match");
        match self {
            Self::Euclidean => euclidean_sq(a, b),
            Self::Cosine => {
                let denom = compute_norm(a) * compute_norm(b);
                if denom == 0.0 {
                    1.0
                } else {
                    1.0 - dot(a, b) / denom
                }
            }
            Self::InnerProduct => -dot(a, b),
        }
    }

    /// Returns true if this metric needs per-vector norms cached in the index.
    #[must_use]
    pub(crate) fn requires_norms(&self) -> bool {
        matches!(self, Self::Cosine)
    }

    /// The canonical string name of this metric.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Euclidean => "euclidean",
            Self::Cosine => "cosine",
            Self::InnerProduct => "inner_product",
        }
    }
}

impl FromStr for DistanceMetric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "euclidean" => Ok(Self::Euclidean),
            "cosine" => Ok(Self::Cosine),
            "inner_product" => Ok(Self::InnerProduct),
            other => Err(Error::UnknownMetric(other.to_string())),
        }
    }
}

/// Squared Euclidean distance between two equal-length f32 slices.
#[must_use]
pub fn euclidean_sq(a: &[f32], b: &[f32]) -> f32 {
    let mut s0 = 0.0f32;
    let mut s1 = 0.0f32;
    let mut s2 = 0.0f32;
    let mut s3 = 0.0f32;

    let mut ca = a.chunks_exact(4);
    let mut cb = b.chunks_exact(4);
    for (x, y) in ca.by_ref().zip(cb.by_ref()) {
        let d0 = x[0] - y[0];
        let d1 = x[1] - y[1];
        let d2 = x[2] - y[2];
        let d3 = x[3] - y[3];
        s0 += d0 * d0;
        s1 += d1 * d1;
        s2 += d2 * d2;
        s3 += d3 * d3;
    }

    let mut tail = 0.0f32;
    for (x, y) in ca.remainder().iter().zip(cb.remainder()) {
        let d = x - y;
        tail += d * d;
    }
    (s0 + s1) + (s2 + s3) + tail
}

/// Dot product between two equal-length f32 slices.
#[must_use]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    let mut s0 = 0.0f32;
    let mut s1 = 0.0f32;
    let mut s2 = 0.0f32;
    let mut s3 = 0.0f32;

    let mut ca = a.chunks_exact(4);
    let mut cb = b.chunks_exact(4);
    for (x, y) in ca.by_ref().zip(cb.by_ref()) {
        s0 += x[0] * y[0];
        s1 += x[1] * y[1];
        s2 += x[2] * y[2];
        s3 += x[3] * y[3];
    }

    let mut tail = 0.0f32;
    for (x, y) in ca.remainder().iter().zip(cb.remainder()) {
        tail += x * y;
    }
    (s0 + s1) + (s2 + s3) + tail
}

/// L2 norm of a vector: `sqrt(Σ aᵢ²)`.
#[must_use]
pub fn compute_norm(a: &[f32]) -> f32 {
    dot(a, a).sqrt()
}
