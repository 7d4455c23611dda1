//! Native HNSW backend built on `hnsw_rs`.
//!
//! `hnsw_rs` has no delete, so removals are tombstones: the graph point
//! stays, its data ID is unmapped, and searches over-fetch by the number of
//! tombstones before filtering.  Once tombstones outnumber live points the
//! graph is rebuilt from the stored vectors.
//!
//! Candidates are re-scored with the exact [`Metric`] similarity, so the
//! reported scores match [`super::FlatIndex`] for the same data.

use std::collections::HashMap;
use std::path::Path;

use hnsw_rs::hnsw::Hnsw;
use hnsw_rs::prelude::*;
use tracing::debug;

use crate::persist::{self, RetryPolicy};

use super::{
    BackendInfo, BackendKind, Metric, SearchHit, VectorBlob, VectorError, VectorIndex,
    validate_vector,
};

/// Graph construction and search parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HnswParams {
    /// Max connections per node per layer.
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub max_layer: usize,
    /// Initial capacity hint.
    pub max_elements: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 64,
            max_layer: 16,
            max_elements: 10_000,
        }
    }
}

enum Graph {
    // Cosine and dot both walk the angular graph; exact re-ranking restores
    // raw inner-product order for `Metric::Dot`.
    Angular(Hnsw<'static, f32, DistCosine>),
    L2(Hnsw<'static, f32, DistL2>),
    L1(Hnsw<'static, f32, DistL1>),
}

impl Graph {
    fn build(metric: Metric, params: &HnswParams, capacity: usize) -> Self {
        let max_elements = params.max_elements.max(capacity);
        match metric {
            Metric::Cosine | Metric::Dot => Graph::Angular(Hnsw::<f32, DistCosine>::new(
                params.m,
                max_elements,
                params.max_layer,
                params.ef_construction,
                DistCosine {},
            )),
            Metric::Euclidean => Graph::L2(Hnsw::<f32, DistL2>::new(
                params.m,
                max_elements,
                params.max_layer,
                params.ef_construction,
                DistL2 {},
            )),
            Metric::Manhattan => Graph::L1(Hnsw::<f32, DistL1>::new(
                params.m,
                max_elements,
                params.max_layer,
                params.ef_construction,
                DistL1 {},
            )),
        }
    }

    fn insert(&self, vector: &[f32], data_id: usize) {
        match self {
            Graph::Angular(h) => h.insert_slice((vector, data_id)),
            Graph::L2(h) => h.insert_slice((vector, data_id)),
            Graph::L1(h) => h.insert_slice((vector, data_id)),
        }
    }

    fn search(&self, query: &[f32], k: usize, ef: usize) -> Vec<usize> {
        let neighbours = match self {
            Graph::Angular(h) => h.search(query, k, ef),
            Graph::L2(h) => h.search(query, k, ef),
            Graph::L1(h) => h.search(query, k, ef),
        };
        neighbours.into_iter().map(|n| n.d_id).collect()
    }
}

/// HNSW-backed [`VectorIndex`].
pub struct HnswIndex {
    dimension: usize,
    metric: Metric,
    params: HnswParams,
    graph: Graph,
    vectors: HashMap<String, Vec<f32>>,
    id_to_data: HashMap<String, usize>,
    data_to_id: HashMap<usize, String>,
    next_data_id: usize,
    tombstones: usize,
    retry: RetryPolicy,
}

impl HnswIndex {
    pub fn new(dimension: usize, metric: Metric, params: HnswParams) -> Self {
        debug!(dimension, ?metric, m = params.m, "building HNSW index");
        Self {
            dimension,
            metric,
            params,
            graph: Graph::build(metric, &params, 0),
            vectors: HashMap::new(),
            id_to_data: HashMap::new(),
            data_to_id: HashMap::new(),
            next_data_id: 0,
            tombstones: 0,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn place(&mut self, id: &str, vector: &[f32]) {
        let data_id = self.next_data_id;
        self.next_data_id += 1;
        self.graph.insert(vector, data_id);
        self.id_to_data.insert(id.to_string(), data_id);
        self.data_to_id.insert(data_id, id.to_string());
    }

    fn unmap(&mut self, id: &str) -> bool {
        match self.id_to_data.remove(id) {
            Some(data_id) => {
                self.data_to_id.remove(&data_id);
                self.tombstones += 1;
                true
            }
            None => false,
        }
    }

    /// Rebuild the graph from the live vectors, dropping tombstones.
    fn rebuild(&mut self) {
        debug!(
            live = self.vectors.len(),
            tombstones = self.tombstones,
            "rebuilding HNSW graph"
        );
        self.graph = Graph::build(self.metric, &self.params, self.vectors.len());
        self.id_to_data.clear();
        self.data_to_id.clear();
        self.next_data_id = 0;
        self.tombstones = 0;
        let mut entries: Vec<(String, Vec<f32>)> = self
            .vectors
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        for (id, v) in entries {
            self.place(&id, &v);
        }
    }

    fn maybe_compact(&mut self) {
        if self.tombstones > 64 && self.tombstones > self.vectors.len() {
            self.rebuild();
        }
    }
}

impl VectorIndex for HnswIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn info(&self) -> BackendInfo {
        BackendInfo::native()
    }

    fn insert(&mut self, id: &str, vector: &[f32]) -> Result<(), VectorError> {
        validate_vector(vector, self.dimension, self.metric)?;
        self.unmap(id);
        self.place(id, vector);
        self.vectors.insert(id.to_string(), vector.to_vec());
        self.maybe_compact();
        Ok(())
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        include_vectors: bool,
    ) -> Result<Vec<SearchHit>, VectorError> {
        validate_vector(query, self.dimension, self.metric)?;
        if k == 0 || self.vectors.is_empty() {
            return Ok(Vec::new());
        }
        let fetch = k + self.tombstones;
        let ef = self.params.ef_search.max(fetch);
        let mut hits: Vec<SearchHit> = self
            .graph
            .search(query, fetch, ef)
            .into_iter()
            .filter_map(|data_id| self.data_to_id.get(&data_id))
            .filter_map(|id| {
                self.vectors.get(id).map(|v| SearchHit {
                    id: id.clone(),
                    similarity: self.metric.similarity(query, v),
                    vector: include_vectors.then(|| v.clone()),
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    fn get_vector(&self, id: &str) -> Option<Vec<f32>> {
        self.vectors.get(id).cloned()
    }

    fn delete(&mut self, id: &str) -> bool {
        if self.vectors.remove(id).is_none() {
            return false;
        }
        self.unmap(id);
        self.maybe_compact();
        true
    }

    fn count(&self) -> usize {
        self.vectors.len()
    }

    fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.vectors.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn save(&self, path: &Path) -> Result<(), VectorError> {
        let mut records: Vec<(String, Vec<f32>)> = self
            .vectors
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        let blob = VectorBlob {
            backend: BackendKind::Native,
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
        self.vectors = blob.records.into_iter().collect();
        self.rebuild();
        Ok(())
    }

    fn clear(&mut self) {
        self.vectors.clear();
        self.rebuild();
    }
}
