//! Vector Index contract and backend selection.
//!
//! [`VectorIndex`] is the k-NN contract every backend implements: fixed
//! dimension, opaque string IDs, results ranked best-first by the injected
//! [`Metric`].  Two backends exist:
//!
//! | Backend | Kind | Notes |
//! |---|---|---|
//! | [`hnsw::HnswIndex`] | [`BackendKind::Native`] | HNSW graph from `hnsw_rs`; compiled with the `hnsw` feature |
//! | [`flat::FlatIndex`] | [`BackendKind::Portable`] | exact linear scan; always available |
//!
//! [`select_backend`] picks one at startup.  A forced native request fails
//! hard when the native backend cannot be built; auto-detection falls back
//! to the portable index silently (logged at `info`).
//!
//! Callers must L2-normalise vectors before inserting them into a cosine
//! index: cosine similarity is computed as the plain dot product.

pub mod flat;
#[cfg(feature = "hnsw")]
pub mod hnsw;
pub mod metric;

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::persist::PersistError;

pub use flat::FlatIndex;
pub use metric::Metric;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from vector index operations.
#[derive(Error, Debug)]
pub enum VectorError {
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("vector contains non-finite values")]
    NonFinite,
    #[error("zero-norm vector cannot be indexed under {0:?}")]
    ZeroNorm(Metric),
    #[error("vector backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("vector index I/O: {0}")]
    Persist(#[from] PersistError),
    #[error("vector index encoding: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("incompatible vector index file: {0}")]
    Incompatible(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Contract types
// ─────────────────────────────────────────────────────────────────────────────

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub similarity: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

/// Which implementation backs an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Native,
    Portable,
}

/// Caller's backend request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Prefer native, fall back to portable.
    #[default]
    Auto,
    /// Native or fail.
    Native,
    Portable,
}

impl BackendPreference {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Some(BackendPreference::Auto),
            "native" | "hnsw" => Some(BackendPreference::Native),
            "portable" | "flat" => Some(BackendPreference::Portable),
            _ => None,
        }
    }
}

/// Description of the selected backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendInfo {
    #[serde(rename = "type")]
    pub kind: BackendKind,
    pub available: bool,
    pub performance: String,
    pub description: String,
}

impl BackendInfo {
    pub fn native() -> Self {
        Self {
            kind: BackendKind::Native,
            available: native_backend_available(),
            performance: "high".to_string(),
            description: "HNSW approximate nearest-neighbour graph (hnsw_rs)".to_string(),
        }
    }

    pub fn portable() -> Self {
        Self {
            kind: BackendKind::Portable,
            available: true,
            performance: "baseline".to_string(),
            description: "exact in-process linear scan".to_string(),
        }
    }
}

/// Approximate k-NN index over fixed-dimension vectors keyed by ID.
pub trait VectorIndex: Send + Sync {
    fn dimension(&self) -> usize;

    fn metric(&self) -> Metric;

    fn info(&self) -> BackendInfo;

    /// Insert or replace the vector stored under `id`.
    fn insert(&mut self, id: &str, vector: &[f32]) -> Result<(), VectorError>;

    /// Up to `k` hits ranked by descending similarity.
    fn search(
        &self,
        query: &[f32],
        k: usize,
        include_vectors: bool,
    ) -> Result<Vec<SearchHit>, VectorError>;

    fn get_vector(&self, id: &str) -> Option<Vec<f32>>;

    /// Remove `id`.  Returns `false` when it was not present.
    fn delete(&mut self, id: &str) -> bool;

    fn count(&self) -> usize;

    /// Every stored ID, sorted.
    fn ids(&self) -> Vec<String>;

    fn save(&self, path: &Path) -> Result<(), VectorError>;

    /// Replace the contents of this index with the file at `path`.
    fn load(&mut self, path: &Path) -> Result<(), VectorError>;

    fn clear(&mut self);
}

/// Index handle shared by the episode store, the vector service and
/// rollback closures.
pub type SharedVectorIndex = Arc<RwLock<Box<dyn VectorIndex>>>;

pub fn shared(index: Box<dyn VectorIndex>) -> SharedVectorIndex {
    Arc::new(RwLock::new(index))
}

/// Reject vectors of the wrong length, with NaN/∞ components, or with zero
/// norm under a metric that cannot rank them.
pub fn validate_vector(vector: &[f32], dimension: usize, metric: Metric) -> Result<(), VectorError> {
    if vector.len() != dimension {
        return Err(VectorError::DimensionMismatch {
            expected: dimension,
            actual: vector.len(),
        });
    }
    if vector.iter().any(|x| !x.is_finite()) {
        return Err(VectorError::NonFinite);
    }
    if metric.rejects_zero_norm() && vector.iter().all(|x| *x == 0.0) {
        return Err(VectorError::ZeroNorm(metric));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// On-disk blob
// ─────────────────────────────────────────────────────────────────────────────

/// Shared bincode layout for both backends.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct VectorBlob {
    pub backend: BackendKind,
    pub dimension: usize,
    pub metric: Metric,
    pub records: Vec<(String, Vec<f32>)>,
}

impl VectorBlob {
    pub(crate) fn check_compatible(&self, dimension: usize, metric: Metric) -> Result<(), VectorError> {
        if self.dimension != dimension {
            return Err(VectorError::Incompatible(format!(
                "file dimension {} does not match index dimension {}",
                self.dimension, dimension
            )));
        }
        if self.metric != metric {
            return Err(VectorError::Incompatible(format!(
                "file metric {:?} does not match index metric {:?}",
                self.metric, metric
            )));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend selection
// ─────────────────────────────────────────────────────────────────────────────

/// True when the native backend was compiled in.
pub fn native_backend_available() -> bool {
    cfg!(feature = "hnsw")
}

#[cfg(feature = "hnsw")]
fn native_index(dimension: usize, metric: Metric) -> Result<Box<dyn VectorIndex>, VectorError> {
    Ok(Box::new(hnsw::HnswIndex::new(dimension, metric, hnsw::HnswParams::default())))
}

#[cfg(not(feature = "hnsw"))]
fn native_index(_dimension: usize, _metric: Metric) -> Result<Box<dyn VectorIndex>, VectorError> {
    Err(VectorError::BackendUnavailable(
        "mnemos-index was built without the `hnsw` feature".to_string(),
    ))
}

/// Build the vector index requested by `preference`.
///
/// # Errors
///
/// [`VectorError::BackendUnavailable`] when `preference` is
/// [`BackendPreference::Native`] and the native backend cannot be built.
pub fn select_backend(
    preference: BackendPreference,
    dimension: usize,
    metric: Metric,
) -> Result<Box<dyn VectorIndex>, VectorError> {
    match preference {
        BackendPreference::Native => native_index(dimension, metric),
        BackendPreference::Portable => Ok(Box::new(FlatIndex::new(dimension, metric))),
        BackendPreference::Auto => match native_index(dimension, metric) {
            Ok(index) => {
                info!(dimension, ?metric, "native vector backend selected");
                Ok(index)
            }
            Err(e) => {
                info!(reason = %e, "native vector backend unavailable; using portable index");
                Ok(Box::new(FlatIndex::new(dimension, metric)))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portable_selection_always_succeeds() {
        let idx = select_backend(BackendPreference::Portable, 4, Metric::Cosine).unwrap();
        assert_eq!(idx.info().kind, BackendKind::Portable);
        assert!(idx.info().available);
    }

    #[test]
    fn auto_selection_matches_native_availability() {
        let idx = select_backend(BackendPreference::Auto, 4, Metric::Cosine).unwrap();
        let expected = if native_backend_available() {
            BackendKind::Native
        } else {
            BackendKind::Portable
        };
        assert_eq!(idx.info().kind, expected);
    }

    #[cfg(not(feature = "hnsw"))]
    #[test]
    fn forced_native_without_feature_is_fatal() {
        let err = select_backend(BackendPreference::Native, 4, Metric::Cosine)
            .err()
            .expect("native must be unavailable");
        assert!(matches!(err, VectorError::BackendUnavailable(_)));
        assert!(!BackendInfo::native().available);
    }

    #[cfg(feature = "hnsw")]
    #[test]
    fn forced_native_with_feature_builds_hnsw() {
        let idx = select_backend(BackendPreference::Native, 4, Metric::Cosine).unwrap();
        assert_eq!(idx.info().kind, BackendKind::Native);
        assert!(native_backend_available());
    }

    #[test]
    fn validate_rejects_bad_vectors() {
        assert!(matches!(
            validate_vector(&[1.0, 0.0], 3, Metric::Cosine),
            Err(VectorError::DimensionMismatch { expected: 3, actual: 2 })
        ));
        assert!(matches!(
            validate_vector(&[f32::NAN, 0.0], 2, Metric::Euclidean),
            Err(VectorError::NonFinite)
        ));
        assert!(matches!(
            validate_vector(&[0.0, 0.0], 2, Metric::Cosine),
            Err(VectorError::ZeroNorm(Metric::Cosine))
        ));
        assert!(validate_vector(&[0.0, 0.0], 2, Metric::Euclidean).is_ok());
    }

    #[test]
    fn preference_parse() {
        assert_eq!(BackendPreference::parse("HNSW"), Some(BackendPreference::Native));
        assert_eq!(BackendPreference::parse("flat"), Some(BackendPreference::Portable));
        assert_eq!(BackendPreference::parse("gpu"), None);
    }
}
