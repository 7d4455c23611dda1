//! Vector service.
//!
//! A standalone k-NN index next to the episode store, for embeddings that
//! are not episodes.  With a `data_dir` it persists to
//! `standalone_vectors.bin` on [`VectorService::save`].

use std::path::PathBuf;

use mnemos_index::vector::shared;
use mnemos_index::{SearchHit, SharedVectorIndex, VectorError, select_backend};
use mnemos_types::MnemosError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{Cleared, Created, Deleted, IdRequest, Lookup, ServiceResult, parse, to_value, unknown_method};
use crate::config::MemoryConfig;

pub const STANDALONE_VECTORS_FILE: &str = "standalone_vectors.bin";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddVectorRequest {
    pub id: String,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: Vec<f32>,
    pub k: usize,
    #[serde(default)]
    pub include_vectors: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEntry {
    pub id: String,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorStats {
    pub count: usize,
    pub dimension: usize,
}

fn vector_error(e: VectorError) -> MnemosError {
    match e {
        VectorError::DimensionMismatch { .. } | VectorError::NonFinite | VectorError::ZeroNorm(_) => {
            MnemosError::Validation(e.to_string())
        }
        VectorError::BackendUnavailable(msg) => MnemosError::BackendUnavailable(msg),
        other => MnemosError::Persistence(other.to_string()),
    }
}

/// Add / search / get / delete over a standalone vector index.
pub struct VectorService {
    index: SharedVectorIndex,
    path: Option<PathBuf>,
}

impl VectorService {
    pub fn new(index: SharedVectorIndex) -> Self {
        Self { index, path: None }
    }

    /// Build an index with the config's backend, dimension and metric, and
    /// load `standalone_vectors.bin` when it exists.
    pub fn from_config(config: &MemoryConfig) -> ServiceResult<Self> {
        let mut index =
            select_backend(config.backend, config.dimension, config.metric).map_err(vector_error)?;
        let path = config.data_dir.as_ref().map(|d| d.join(STANDALONE_VECTORS_FILE));
        if let Some(p) = &path
            && p.exists()
        {
            index.load(p).map_err(vector_error)?;
            info!(path = %p.display(), count = index.count(), "standalone vectors loaded");
        }
        Ok(Self {
            index: shared(index),
            path,
        })
    }

    pub fn add(&self, request: &AddVectorRequest) -> ServiceResult<Created> {
        if request.id.is_empty() {
            return Err(MnemosError::Validation("vector id must not be empty".into()));
        }
        self.index
            .write()
            .insert(&request.id, &request.vector)
            .map_err(vector_error)?;
        Ok(Created {
            id: request.id.clone(),
        })
    }

    pub fn search(&self, request: &SearchRequest) -> ServiceResult<SearchResponse> {
        let results = self
            .index
            .read()
            .search(&request.query, request.k, request.include_vectors)
            .map_err(vector_error)?;
        Ok(SearchResponse {
            count: results.len(),
            results,
        })
    }

    pub fn get(&self, id: &str) -> ServiceResult<Lookup<VectorEntry>> {
        let vector = self.index.read().get_vector(id);
        Ok(Lookup::from_option(vector.map(|vector| VectorEntry {
            id: id.to_string(),
            vector,
        })))
    }

    pub fn delete(&self, id: &str) -> ServiceResult<Deleted> {
        Ok(Deleted {
            deleted: self.index.write().delete(id),
        })
    }

    pub fn stats(&self) -> ServiceResult<VectorStats> {
        let index = self.index.read();
        Ok(VectorStats {
            count: index.count(),
            dimension: index.dimension(),
        })
    }

    pub fn clear(&self) -> ServiceResult<Cleared> {
        self.index.write().clear();
        Ok(Cleared { cleared: true })
    }

    /// Persist the index.  A no-op without a data directory.
    pub fn save(&self) -> ServiceResult<()> {
        if let Some(p) = &self.path {
            self.index.read().save(p).map_err(vector_error)?;
        }
        Ok(())
    }

    pub(crate) fn dispatch(&self, op: &str, params: Value) -> ServiceResult<Value> {
        match op {
            "add" => to_value(self.add(&parse(params)?)?),
            "search" => to_value(self.search(&parse(params)?)?),
            "get" => to_value(self.get(&parse::<IdRequest>(params)?.id)?),
            "delete" => to_value(self.delete(&parse::<IdRequest>(params)?.id)?),
            "stats" => to_value(self.stats()?),
            "clear" => to_value(self.clear()?),
            _ => Err(unknown_method(&format!("vector.{op}"))),
        }
    }
}
