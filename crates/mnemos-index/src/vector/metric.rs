//! Similarity metrics.
//!
//! Every metric is expressed as a *similarity* (higher is better) so search
//! results rank the same way regardless of the metric chosen.

use serde::{Deserialize, Serialize};

/// Similarity function injected into a vector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Cosine similarity.  Vectors are expected to be L2-normalised, so this
    /// is computed as the plain dot product.
    #[default]
    Cosine,
    /// `1 / (1 + ‖a − b‖₂)`.
    Euclidean,
    /// Raw inner product.
    Dot,
    /// `1 / (1 + ‖a − b‖₁)`.
    Manhattan,
}

impl Metric {
    pub fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Cosine | Metric::Dot => dot(a, b),
            Metric::Euclidean => {
                let d: f32 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
                1.0 / (1.0 + d.sqrt())
            }
            Metric::Manhattan => {
                let d: f32 = a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum();
                1.0 / (1.0 + d)
            }
        }
    }

    /// Metrics whose meaning collapses for a zero vector.
    pub fn rejects_zero_norm(&self) -> bool {
        matches!(self, Metric::Cosine | Metric::Dot)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Some(Metric::Cosine),
            "euclidean" | "l2" => Some(Metric::Euclidean),
            "dot" | "inner" => Some(Metric::Dot),
            "manhattan" | "l1" => Some(Metric::Manhattan),
            _ => None,
        }
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale `v` to unit length in place.  Returns `false` for a zero vector,
/// which is left untouched.
pub fn normalize(v: &mut [f32]) -> bool {
    let norm = l2_norm(v);
    if norm == 0.0 || !norm.is_finite() {
        return false;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    true
}
