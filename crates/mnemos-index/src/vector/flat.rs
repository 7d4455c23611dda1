//! Portable exact-scan backend.

use std::collections::HashMap;
use std::path::Path;

use crate::persist::{self, RetryPolicy};

use super::{
    BackendInfo, BackendKind, Metric, SearchHit, VectorBlob, VectorError, VectorIndex,
    validate_vector,
};

/// In-process index that scores every stored vector on each search.
///
/// Results are exact, so it doubles as the reference the native backend is
/// tested against.
pub struct FlatIndex {
    dimension: usize,
    metric: Metric,
    records: HashMap<String, Vec<f32>>,
    retry: RetryPolicy,
}

impl FlatIndex {
    pub fn new(dimension: usize, metric: Metric) -> Self {
        Self {
            dimension,
            metric,
            records: HashMap::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl VectorIndex for FlatIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn info(&self) -> BackendInfo {
        BackendInfo::portable()
    }

    fn insert(&mut self, id: &str, vector: &[f32]) -> Result<(), VectorError> {
        validate_vector(vector, self.dimension, self.metric)?;
        self.records.insert(id.to_string(), vector.to_vec());
        Ok(())
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        include_vectors: bool,
    ) -> Result<Vec<SearchHit>, VectorError> {
        validate_vector(query, self.dimension, self.metric)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut scored: Vec<(&String, f32)> = self
            .records
            .iter()
            .map(|(id, v)| (id, self.metric.similarity(query, v)))
            .collect();
        // Ties broken by ID so results are deterministic.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        scored.truncate(k);
        Ok(scored
            .into_iter()
            .map(|(id, similarity)| SearchHit {
                id: id.clone(),
                similarity,
                vector: include_vectors.then(|| self.records[id].clone()),
            })
            .collect())
    }

    fn get_vector(&self, id: &str) -> Option<Vec<f32>> {
        self.records.get(id).cloned()
    }

    fn delete(&mut self, id: &str) -> bool {
        self.records.remove(id).is_some()
    }

    fn count(&self) -> usize {
        self.records.len()
    }

    fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.records.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn save(&self, path: &Path) -> Result<(), VectorError> {
        let mut records: Vec<(String, Vec<f32>)> =
            self.records.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        let blob = VectorBlob {
            backend: BackendKind::Portable,
            dimension: self.dimension,
            metric: self.metric,
            records,
        };
        let bytes = bincode::serialize(&blob)?;
        persist::write_atomic(path, &bytes, &self.retry)?;
        Ok(())
    }

    fn load(&mut self, path: &Path) -> Result<(), VectorError> {
        let bytes = persist::read_with_retry(path, &self.retry)?;
        let blob: VectorBlob = bincode::deserialize(&bytes)?;
        blob.check_compatible(self.dimension, self.metric)?;
        for (_, v) in &blob.records {
            validate_vector(v, self.dimension, self.metric)?;
        }
        self.records = blob.records.into_iter().collect();
        Ok(())
    }

    fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::metric::normalize;

    fn unit(v: &[f32]) -> Vec<f32> {
        let mut v = v.to_vec();
        normalize(&mut v);
        v
    }

    fn populated() -> FlatIndex {
        let mut idx = FlatIndex::new(3, Metric::Cosine).with_retry(RetryPolicy::immediate(1));
        idx.insert("x", &unit(&[1.0, 0.0, 0.0])).unwrap();
        idx.insert("y", &unit(&[0.0, 1.0, 0.0])).unwrap();
        idx.insert("xy", &unit(&[1.0, 1.0, 0.0])).unwrap();
        idx
    }

    #[test]
    fn search_ranks_best_first() {
        let idx = populated();
        let hits = idx.search(&[1.0, 0.0, 0.0], 3, false).unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "xy", "y"]);
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        assert!(hits[0].vector.is_none());
    }

    #[test]
    fn search_truncates_to_k_and_includes_vectors() {
        let idx = populated();
        let hits = idx.search(&[0.0, 1.0, 0.0], 1, true).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "y");
        assert_eq!(hits[0].vector.as_deref(), Some(&[0.0, 1.0, 0.0][..]));
    }

    #[test]
    fn search_with_k_zero_is_empty() {
        assert!(populated().search(&[1.0, 0.0, 0.0], 0, false).unwrap().is_empty());
    }

    #[test]
    fn insert_rejects_wrong_dimension() {
        let mut idx = populated();
        assert!(matches!(
            idx.insert("bad", &[1.0, 0.0]),
            Err(VectorError::DimensionMismatch { .. })
        ));
        assert_eq!(idx.count(), 3);
    }

    #[test]
    fn reinsert_replaces_vector() {
        let mut idx = populated();
        idx.insert("x", &[0.0, 0.0, 1.0]).unwrap();
        assert_eq!(idx.count(), 3);
        assert_eq!(idx.get_vector("x"), Some(vec![0.0, 0.0, 1.0]));
    }

    #[test]
    fn delete_reports_presence() {
        let mut idx = populated();
        assert!(idx.delete("x"));
        assert!(!idx.delete("x"));
        assert!(idx.get_vector("x").is_none());
        assert_eq!(idx.count(), 2);
    }

    #[test]
    fn ids_are_sorted_and_track_deletes() {
        let mut idx = populated();
        assert_eq!(idx.ids(), vec!["x", "xy", "y"]);
        idx.delete("xy");
        assert_eq!(idx.ids(), vec!["x", "y"]);
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.bin");
        let idx = populated();
        idx.save(&path).unwrap();

        let mut fresh = FlatIndex::new(3, Metric::Cosine);
        fresh.insert("stale", &[1.0, 0.0, 0.0]).unwrap();
        fresh.load(&path).unwrap();
        assert_eq!(fresh.count(), 3);
        assert!(fresh.get_vector("stale").is_none());
        assert_eq!(fresh.get_vector("xy"), idx.get_vector("xy"));
    }

    #[test]
    fn load_rejects_other_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.bin");
        populated().save(&path).unwrap();
        let mut other = FlatIndex::new(4, Metric::Cosine);
        assert!(matches!(other.load(&path), Err(VectorError::Incompatible(_))));
    }

    #[test]
    fn clear_empties_index() {
        let mut idx = populated();
        idx.clear();
        assert_eq!(idx.count(), 0);
        assert!(idx.search(&[1.0, 0.0, 0.0], 5, false).unwrap().is_empty());
    }
}
