//! Episode Store.
//!
//! Composes the record table, the vector index, the time index and the graph
//! into one write path.  Every mutating call runs as a transaction on the
//! store's own [`TransactionCoordinator`]: each step registers its undo right
//! after it succeeds, and any failure replays the undo log in reverse.
//!
//! | step | writes | undo |
//! |---|---|---|
//! | 1 | vector index | delete vector |
//! | 2 | `episodes` row | delete row |
//! | 3 | time index | remove `(start_time, id)` |
//! | 4 | graph node + `linked_to` edges | delete node (edges cascade) |
//!
//! Reads never touch the coordinator.  [`EpisodeStore::get`] is served from
//! an LRU cache above the record table; the cache is dropped for an ID
//! whenever a write to it fails or succeeds.
//!
//! # On-disk layout
//!
//! With `data_dir` set the store keeps `episodes.db` and `graph.db`
//! (SQLite), plus `vectors.bin` and `time_index.json` written by
//! [`EpisodeStore::save`].  On open, any episode missing from the loaded
//! indexes is re-inserted from its row, so a crash between saves loses no
//! searchable episode.
//!
//! # Example
//!
//! ```rust
//! use mnemos_memory::{EpisodeStore, MemoryConfig, NewEpisode, TimeRangeQuery};
//!
//! let store = EpisodeStore::open(MemoryConfig::in_memory(3)).unwrap();
//! let id = store
//!     .create(NewEpisode::new("task-1", vec![1.0, 0.0, 0.0]).starting_at(1000))
//!     .unwrap();
//!
//! let found = store
//!     .query_time_range(&TimeRangeQuery::new(500, 1500))
//!     .unwrap();
//! assert_eq!(found.episodes[0].id, id);
//! ```

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use mnemos_graph::{GraphError, GraphStore, LINKED_TO, NewEdge, NewNode};
use mnemos_index::vector::metric::normalize;
use mnemos_index::vector::{shared, validate_vector};
use mnemos_index::{
    BackendInfo, CacheStats, LruCache, Metric, SharedVectorIndex, SystemMemoryGauge, TimeIndex,
    TimeIndexError, TreeStats, VectorError, select_backend,
};
use mnemos_kernel::{Operation, OperationKind, RollbackReport, TransactionCoordinator, TxError};
use mnemos_types::{
    CAUSES, CausalLoop, EPISODE_NODE_TYPE, Episode, MnemosError, Timestamp, new_id,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, MemoryConfig};
use crate::records::EpisodeRecords;

pub const EPISODES_DB: &str = "episodes.db";
pub const GRAPH_DB: &str = "graph.db";
pub const VECTORS_FILE: &str = "vectors.bin";
pub const TIME_INDEX_FILE: &str = "time_index.json";

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from episode store operations.
#[derive(Error, Debug)]
pub enum EpisodeError {
    #[error("Episode not found: {0}")]
    NotFound(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Vector(#[from] VectorError),
    #[error(transparent)]
    TimeIndex(#[from] TimeIndexError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("SQLite error: {0}")]
    Records(#[from] rusqlite::Error),
    #[error(transparent)]
    Transaction(#[from] TxError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The write failed and at least one compensation failed too.
    #[error("{cause} (rollback left {} compensation(s) unapplied)", .report.failures.len())]
    PartialRollback {
        cause: Box<EpisodeError>,
        report: RollbackReport,
    },
}

impl EpisodeError {
    pub fn is_not_found(&self) -> bool {
        match self {
            EpisodeError::NotFound(_) => true,
            EpisodeError::Graph(e) => e.is_not_found(),
            _ => false,
        }
    }
}

impl From<EpisodeError> for MnemosError {
    fn from(e: EpisodeError) -> Self {
        match e {
            EpisodeError::NotFound(id) => MnemosError::not_found("episode", &id),
            EpisodeError::Validation(msg) => MnemosError::Validation(msg),
            EpisodeError::Vector(
                err @ (VectorError::DimensionMismatch { .. }
                | VectorError::NonFinite
                | VectorError::ZeroNorm(_)),
            ) => MnemosError::Validation(err.to_string()),
            EpisodeError::Vector(VectorError::BackendUnavailable(msg)) => {
                MnemosError::BackendUnavailable(msg)
            }
            EpisodeError::Vector(err) => MnemosError::Persistence(err.to_string()),
            EpisodeError::TimeIndex(err) => MnemosError::Persistence(err.to_string()),
            EpisodeError::Io(err) => MnemosError::Persistence(err.to_string()),
            EpisodeError::Graph(err) => err.into(),
            EpisodeError::Records(err) => MnemosError::Storage(err.to_string()),
            EpisodeError::Transaction(err) => err.into(),
            EpisodeError::Config(err) => MnemosError::Validation(err.to_string()),
            err @ EpisodeError::PartialRollback { .. } => MnemosError::Transaction(err.to_string()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request / result types
// ─────────────────────────────────────────────────────────────────────────────

/// Input to [`EpisodeStore::create`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEpisode {
    #[serde(default)]
    pub id: Option<String>,
    pub task_id: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: Value,
    /// Defaults to now.
    #[serde(default)]
    pub start_time: Option<Timestamp>,
    #[serde(default)]
    pub end_time: Option<Timestamp>,
    /// Existing episodes the new one is linked to with `linked_to` edges.
    #[serde(default)]
    pub linked_episodes: Vec<String>,
}

impl NewEpisode {
    pub fn new(task_id: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            task_id: task_id.into(),
            embedding,
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn starting_at(mut self, start_time: Timestamp) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn ending_at(mut self, end_time: Timestamp) -> Self {
        self.end_time = Some(end_time);
        self
    }

    pub fn linked_to(mut self, episode_id: impl Into<String>) -> Self {
        self.linked_episodes.push(episode_id.into());
        self
    }
}

/// Partial update applied by [`EpisodeStore::update`].  Absent fields are
/// left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodePatch {
    #[serde(default)]
    pub start_time: Option<Timestamp>,
    #[serde(default)]
    pub end_time: Option<Timestamp>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl EpisodePatch {
    pub fn is_empty(&self) -> bool {
        self.start_time.is_none()
            && self.end_time.is_none()
            && self.embedding.is_none()
            && self.metadata.is_none()
    }
}

/// Episodes whose start time falls in `[start_time, end_time]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRangeQuery {
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    /// Also return episodes still running that started before the range.
    #[serde(default)]
    pub include_ongoing: bool,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl TimeRangeQuery {
    pub fn new(start_time: Timestamp, end_time: Timestamp) -> Self {
        Self {
            start_time,
            end_time,
            include_ongoing: false,
            limit: None,
        }
    }
}

/// The `k` episodes most similar to `embedding`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityQuery {
    pub embedding: Vec<f32>,
    pub k: usize,
    #[serde(default)]
    pub min_similarity: Option<f32>,
    /// Restrict results to these tasks.
    #[serde(default)]
    pub task_ids: Option<Vec<String>>,
}

impl SimilarityQuery {
    pub fn new(embedding: Vec<f32>, k: usize) -> Self {
        Self {
            embedding,
            k,
            min_similarity: None,
            task_ids: None,
        }
    }
}

/// Either query shape, tagged by `queryType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "queryType", rename_all = "camelCase")]
pub enum EpisodeQuery {
    #[serde(rename_all = "camelCase")]
    TimeRange { time_range: TimeRangeQuery },
    Similarity { similarity: SimilarityQuery },
}

/// Result of an episode query.  `similarities` is parallel to `episodes`
/// for similarity queries and empty otherwise.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub episodes: Vec<Episode>,
    pub count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub similarities: Vec<f32>,
}

/// Counters reported by [`EpisodeStore::stats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeStats {
    pub episode_count: usize,
    pub vector_count: usize,
    pub db_size_bytes: u64,
    pub time_index: TreeStats,
    pub cache: CacheStats,
    pub backend: BackendInfo,
    pub pending_transactions: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// EpisodeStore
// ─────────────────────────────────────────────────────────────────────────────

/// Transactional episode memory over a vector index, a time index and a
/// graph.
pub struct EpisodeStore {
    config: MemoryConfig,
    records: Arc<EpisodeRecords>,
    vectors: SharedVectorIndex,
    time_index: Arc<RwLock<TimeIndex>>,
    graph: Arc<GraphStore>,
    cache: Mutex<LruCache<String, Episode>>,
    coordinator: Arc<TransactionCoordinator>,
}

impl EpisodeStore {
    /// Open (or create) a store as described by `config`.
    ///
    /// # Errors
    ///
    /// Fails on an invalid config, a forced native backend that is not
    /// compiled in, or a persisted index that cannot be read.
    pub fn open(config: MemoryConfig) -> Result<Self, EpisodeError> {
        config.validate()?;

        let (records, graph) = match &config.data_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                (
                    EpisodeRecords::open(&dir.join(EPISODES_DB))?,
                    GraphStore::open(&dir.join(GRAPH_DB))?,
                )
            }
            None => (EpisodeRecords::open_in_memory()?, GraphStore::open_in_memory()?),
        };

        let mut vectors = select_backend(config.backend, config.dimension, config.metric)?;
        let mut time_index = TimeIndex::new(config.btree_order);
        if let Some(dir) = &config.data_dir {
            let vector_path = dir.join(VECTORS_FILE);
            if vector_path.exists() {
                vectors.load(&vector_path)?;
            }
            let time_path = dir.join(TIME_INDEX_FILE);
            if time_path.exists() {
                time_index = TimeIndex::restore_index(&time_path, &config.retry)?;
            }
        }

        // The records are authoritative: the saved indexes may predate
        // later creates, updates and deletes.
        let episodes = records.all()?;
        let starts: HashMap<&str, i64> =
            episodes.iter().map(|e| (e.id.as_str(), e.start_time)).collect();

        let mut dropped = 0usize;
        for id in vectors.ids() {
            if !starts.contains_key(id.as_str()) {
                vectors.delete(&id);
                dropped += 1;
            }
        }
        let stale: Vec<(i64, String)> = time_index
            .iter()
            .filter(|(ts, id)| starts.get(id) != Some(ts))
            .map(|(ts, id)| (ts, id.to_string()))
            .collect();
        for (ts, id) in &stale {
            time_index.remove(*ts, id);
        }
        dropped += stale.len();

        let mut reindexed = 0usize;
        for episode in &episodes {
            if vectors.get_vector(&episode.id).as_deref() != Some(episode.embedding.as_slice()) {
                vectors.insert(&episode.id, &episode.embedding)?;
                reindexed += 1;
            }
            if !time_index.get(episode.start_time).contains(&episode.id) {
                time_index.insert(episode.start_time, episode.id.clone());
            }
        }

        let restored = restore_episode_nodes(&episodes, &graph)?;

        let cache = LruCache::with_gauge(config.cache_capacity, Box::new(SystemMemoryGauge::default()))
            .with_pressure_policy(config.memory_pressure_threshold, config.pressure_eviction_ratio);

        let info = vectors.info();
        info!(
            data_dir = ?config.data_dir,
            backend = ?info.kind,
            dimension = config.dimension,
            vectors = vectors.count(),
            reindexed,
            dropped,
            restored,
            "episode store opened"
        );

        Ok(Self {
            coordinator: Arc::new(TransactionCoordinator::new(config.transaction_max_age())),
            records: Arc::new(records),
            vectors: shared(vectors),
            time_index: Arc::new(RwLock::new(time_index)),
            graph: Arc::new(graph),
            cache: Mutex::new(cache),
            config,
        })
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn graph(&self) -> &Arc<GraphStore> {
        &self.graph
    }

    pub fn coordinator(&self) -> &Arc<TransactionCoordinator> {
        &self.coordinator
    }

    pub fn backend_info(&self) -> BackendInfo {
        self.vectors.read().info()
    }

    /// Start the abandoned-transaction sweep on the current tokio runtime.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        self.coordinator.spawn_sweeper(self.config.sweep_interval())
    }

    // ── writes ───────────────────────────────────────────────────────────────

    /// Record a new episode and return its ID.
    ///
    /// Linked episodes must already exist; a missing one fails the whole
    /// create and rolls back every index it touched.
    pub fn create(&self, new: NewEpisode) -> Result<String, EpisodeError> {
        if new.task_id.trim().is_empty() {
            return Err(EpisodeError::Validation("taskId must not be empty".into()));
        }
        let mut embedding = new.embedding;
        self.prepare_embedding(&mut embedding)?;

        let id = new.id.unwrap_or_else(new_id);
        if id.is_empty() {
            return Err(EpisodeError::Validation("episode id must not be empty".into()));
        }
        if self.records.contains(&id)? {
            return Err(EpisodeError::Validation(format!("episode already exists: {id}")));
        }
        let start_time = new.start_time.unwrap_or_else(|| Utc::now().timestamp_millis());
        check_time_order(start_time, new.end_time)?;

        let mut seen = HashSet::new();
        let linked: Vec<String> = new
            .linked_episodes
            .into_iter()
            .filter(|l| *l != id && seen.insert(l.clone()))
            .collect();

        let now = Utc::now();
        let episode = Episode {
            id: id.clone(),
            task_id: new.task_id,
            start_time,
            end_time: new.end_time,
            embedding,
            metadata: new.metadata,
            linked_episodes: linked.clone(),
            created_at: now,
            updated_at: now,
        };

        self.run_transaction(&id, |tx| {
            self.vectors.write().insert(&id, &episode.embedding)?;
            self.coordinator
                .add_operation(tx, Operation::vector_delete(Arc::clone(&self.vectors), &id))?;

            self.records.put(&episode)?;
            self.coordinator.add_operation(tx, self.record_delete(&id))?;

            self.time_index.write().insert(start_time, id.clone());
            self.coordinator.add_operation(
                tx,
                Operation::time_index_remove(Arc::clone(&self.time_index), start_time, &id),
            )?;

            let mut node = mirror_node(&episode);
            node.link_to = linked.clone();
            self.graph.create_node(node)?;
            self.coordinator
                .add_operation(tx, Operation::node_delete(Arc::clone(&self.graph), &id))?;
            Ok(())
        })?;

        debug!(episode_id = %id, task_id = %episode.task_id, links = linked.len(), "episode created");
        self.cache.lock().set(id.clone(), episode);
        Ok(id)
    }

    /// Link `source` to `target` with an edge of `link_type` and record the
    /// target in `source.linked_episodes`.
    ///
    /// Idempotent: returns `Ok(false)` when the link already exists.
    /// `causes` links that would close a causal loop are rejected before
    /// anything is written.
    pub fn link(&self, source: &str, target: &str, link_type: &str) -> Result<bool, EpisodeError> {
        if link_type.trim().is_empty() {
            return Err(EpisodeError::Validation("link type must not be empty".into()));
        }
        let current = self
            .records
            .get(source)?
            .ok_or_else(|| EpisodeError::NotFound(source.to_string()))?;
        if !self.records.contains(target)? {
            return Err(EpisodeError::NotFound(target.to_string()));
        }

        let has_edge = self.graph.find_edge(source, target, link_type)?.is_some();
        let has_record_link = current.linked_episodes.iter().any(|l| l == target);
        if has_edge && has_record_link {
            return Ok(false);
        }
        if link_type == CAUSES
            && !has_edge
            && let Some(path) = self.graph.would_create_cycle(source, target)?
        {
            return Err(GraphError::Cycle { path }.into());
        }

        self.run_transaction(source, |tx| {
            if !has_record_link {
                let mut updated = current.clone();
                updated.linked_episodes.push(target.to_string());
                updated.updated_at = Utc::now();
                self.records.put(&updated)?;
                self.coordinator.add_operation(tx, self.record_restore(current.clone()))?;
            }
            if !has_edge {
                let edge_id = self.graph.create_edge(NewEdge::new(source, target, link_type))?;
                self.coordinator
                    .add_operation(tx, Operation::edge_delete(Arc::clone(&self.graph), edge_id))?;
            }
            Ok(())
        })?;

        self.cache.lock().delete(source);
        debug!(source, target, link_type, "episodes linked");
        Ok(true)
    }

    /// Apply `patch` to an existing episode and return the new state.
    pub fn update(&self, id: &str, patch: EpisodePatch) -> Result<Episode, EpisodeError> {
        let current = self
            .records
            .get(id)?
            .ok_or_else(|| EpisodeError::NotFound(id.to_string()))?;
        if patch.is_empty() {
            return Ok(current);
        }

        let mut updated = current.clone();
        if let Some(mut embedding) = patch.embedding {
            self.prepare_embedding(&mut embedding)?;
            updated.embedding = embedding;
        }
        if let Some(start) = patch.start_time {
            updated.start_time = start;
        }
        if let Some(end) = patch.end_time {
            updated.end_time = Some(end);
        }
        if let Some(metadata) = patch.metadata {
            updated.metadata = metadata;
        }
        check_time_order(updated.start_time, updated.end_time)?;
        updated.updated_at = Utc::now();

        self.run_transaction(id, |tx| {
            if updated.embedding != current.embedding {
                self.vectors.write().insert(id, &updated.embedding)?;
                let vectors = Arc::clone(&self.vectors);
                let (target, previous) = (id.to_string(), current.embedding.clone());
                self.coordinator.add_operation(
                    tx,
                    Operation::new(OperationKind::VectorInsert, id, move || {
                        vectors.write().insert(&target, &previous).map_err(|e| e.to_string())
                    }),
                )?;
            }
            if updated.start_time != current.start_time {
                {
                    let mut index = self.time_index.write();
                    index.remove(current.start_time, id);
                    index.insert(updated.start_time, id.to_string());
                }
                let index = Arc::clone(&self.time_index);
                let (target, old, new) = (id.to_string(), current.start_time, updated.start_time);
                self.coordinator.add_operation(
                    tx,
                    Operation::new(OperationKind::TimeIndexInsert, id, move || {
                        let mut index = index.write();
                        index.remove(new, &target);
                        index.insert(old, target);
                        Ok(())
                    }),
                )?;
            }
            self.records.put(&updated)?;
            self.coordinator.add_operation(tx, self.record_restore(current.clone()))?;
            Ok(())
        })?;

        debug!(episode_id = id, "episode updated");
        self.cache.lock().set(id.to_string(), updated.clone());
        Ok(updated)
    }

    /// Remove an episode from every index.  Returns `false` when it did not
    /// exist.  Episodes that listed it in `linked_episodes` keep the
    /// dangling ID.
    ///
    /// The graph node goes last; if any step fails the earlier removals are
    /// compensated and the episode stays whole.
    pub fn delete(&self, id: &str) -> Result<bool, EpisodeError> {
        let Some(episode) = self.records.get(id)? else {
            return Ok(false);
        };

        self.run_transaction(id, |tx| {
            self.records.delete(id)?;
            self.coordinator.add_operation(tx, self.record_restore(episode.clone()))?;

            if self.vectors.write().delete(id) {
                let vectors = Arc::clone(&self.vectors);
                let (target, previous) = (id.to_string(), episode.embedding.clone());
                self.coordinator.add_operation(
                    tx,
                    Operation::new(OperationKind::VectorInsert, id, move || {
                        vectors.write().insert(&target, &previous).map_err(|e| e.to_string())
                    }),
                )?;
            }

            if self.time_index.write().remove(episode.start_time, id) {
                let index = Arc::clone(&self.time_index);
                let (target, start) = (id.to_string(), episode.start_time);
                self.coordinator.add_operation(
                    tx,
                    Operation::new(OperationKind::TimeIndexInsert, id, move || {
                        index.write().insert(start, target);
                        Ok(())
                    }),
                )?;
            }

            self.graph.delete_node(id)?;
            Ok(())
        })?;

        self.cache.lock().delete(id);
        debug!(episode_id = id, "episode deleted");
        Ok(true)
    }

    /// Re-create the graph node of every episode that has none, e.g. after
    /// the graph was cleared.  `linked_episodes` come back as `linked_to`
    /// edges; other edge types are not recorded on the episode and stay
    /// gone.  Returns how many nodes were added.
    pub fn restore_graph_nodes(&self) -> Result<usize, EpisodeError> {
        let restored = restore_episode_nodes(&self.records.all()?, &self.graph)?;
        if restored > 0 {
            info!(restored, "episode graph nodes restored");
        }
        Ok(restored)
    }

    /// Write `vectors.bin` and `time_index.json`.  A no-op in memory.
    ///
    /// Callers must not run two saves on the same directory concurrently.
    pub fn save(&self) -> Result<(), EpisodeError> {
        let Some(dir) = &self.config.data_dir else {
            debug!("in-memory episode store; nothing to save");
            return Ok(());
        };
        self.vectors.read().save(&dir.join(VECTORS_FILE))?;
        self.time_index
            .read()
            .persist_index(&dir.join(TIME_INDEX_FILE), &self.config.retry)?;
        info!(dir = %dir.display(), "episode indexes saved");
        Ok(())
    }

    // ── reads ────────────────────────────────────────────────────────────────

    pub fn get(&self, id: &str) -> Result<Option<Episode>, EpisodeError> {
        if let Some(hit) = self.cache.lock().get(id) {
            return Ok(Some(hit.clone()));
        }
        let episode = self.records.get(id)?;
        if let Some(ep) = &episode {
            self.cache.lock().set(id.to_string(), ep.clone());
        }
        Ok(episode)
    }

    pub fn query(&self, query: &EpisodeQuery) -> Result<QueryResult, EpisodeError> {
        match query {
            EpisodeQuery::TimeRange { time_range } => self.query_time_range(time_range),
            EpisodeQuery::Similarity { similarity } => self.query_similar(similarity),
        }
    }

    /// Episodes ordered by `(start_time, id)`.
    pub fn query_time_range(&self, q: &TimeRangeQuery) -> Result<QueryResult, EpisodeError> {
        if q.start_time > q.end_time {
            return Err(EpisodeError::Validation(format!(
                "startTime {} is after endTime {}",
                q.start_time, q.end_time
            )));
        }
        let hits = self.time_index.read().range(q.start_time, q.end_time);

        let mut seen = HashSet::new();
        let mut episodes = Vec::with_capacity(hits.len());
        for (_, id) in hits {
            if seen.insert(id.clone())
                && let Some(ep) = self.get(&id)?
            {
                episodes.push(ep);
            }
        }
        if q.include_ongoing {
            for ep in self.records.ongoing_started_before(q.start_time)? {
                if seen.insert(ep.id.clone()) {
                    episodes.push(ep);
                }
            }
        }
        episodes.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = q.limit {
            episodes.truncate(limit);
        }
        Ok(QueryResult {
            count: episodes.len(),
            episodes,
            similarities: Vec::new(),
        })
    }

    /// Best-first similarity search.
    ///
    /// The vector index is over-fetched (doubling) until `k` episodes pass
    /// the `minSimilarity` and `taskIds` filters or the index is exhausted.
    pub fn query_similar(&self, q: &SimilarityQuery) -> Result<QueryResult, EpisodeError> {
        let mut query = q.embedding.clone();
        self.prepare_embedding(&mut query)?;
        if q.k == 0 {
            return Ok(QueryResult::default());
        }

        let total = self.vectors.read().count();
        let mut fetch = q.k.min(total);
        loop {
            let hits = self.vectors.read().search(&query, fetch, false)?;
            let mut episodes = Vec::with_capacity(q.k);
            let mut similarities = Vec::with_capacity(q.k);
            let mut below_threshold = false;
            for hit in &hits {
                if let Some(min) = q.min_similarity
                    && hit.similarity < min
                {
                    below_threshold = true;
                    break;
                }
                let Some(ep) = self.get(&hit.id)? else {
                    continue;
                };
                if let Some(tasks) = &q.task_ids
                    && !tasks.contains(&ep.task_id)
                {
                    continue;
                }
                episodes.push(ep);
                similarities.push(hit.similarity);
                if episodes.len() == q.k {
                    break;
                }
            }
            if episodes.len() == q.k || below_threshold || fetch >= total || hits.len() < fetch {
                return Ok(QueryResult {
                    count: episodes.len(),
                    episodes,
                    similarities,
                });
            }
            fetch = (fetch * 2).min(total);
        }
    }

    /// Causal loops among `causes` edges, labelled with `chain_id`.
    pub fn validate_causal_chain(&self, chain_id: &str) -> Result<Vec<CausalLoop>, EpisodeError> {
        Ok(self.graph.validate_causal_chain(chain_id)?)
    }

    pub fn stats(&self) -> Result<EpisodeStats, EpisodeError> {
        let (vector_count, backend) = {
            let vectors = self.vectors.read();
            (vectors.count(), vectors.info())
        };
        Ok(EpisodeStats {
            episode_count: self.records.count()?,
            vector_count,
            db_size_bytes: self.db_size_bytes(),
            time_index: self.time_index.read().stats(),
            cache: self.cache.lock().stats(),
            backend,
            pending_transactions: self.coordinator.pending_count(),
        })
    }

    // ── internals ────────────────────────────────────────────────────────────

    /// Validate `embedding` and normalise it in place for cosine.
    fn prepare_embedding(&self, embedding: &mut [f32]) -> Result<(), EpisodeError> {
        validate_vector(embedding, self.config.dimension, self.config.metric)?;
        if self.config.normalize_embeddings && self.config.metric == Metric::Cosine {
            normalize(embedding);
        }
        Ok(())
    }

    fn record_delete(&self, id: &str) -> Operation {
        let records = Arc::clone(&self.records);
        let target = id.to_string();
        Operation::new(OperationKind::RecordInsert, id, move || {
            records.delete(&target).map(|_| ()).map_err(|e| e.to_string())
        })
    }

    fn record_restore(&self, previous: Episode) -> Operation {
        let records = Arc::clone(&self.records);
        let target = previous.id.clone();
        Operation::new(OperationKind::RecordUpdate, target, move || {
            records.put(&previous).map_err(|e| e.to_string())
        })
    }

    /// Run `body` inside a fresh transaction: commit on success, roll back on
    /// failure.  The cache entry for `id` is dropped on failure.
    fn run_transaction<T>(
        &self,
        id: &str,
        body: impl FnOnce(&str) -> Result<T, EpisodeError>,
    ) -> Result<T, EpisodeError> {
        let tx = self.coordinator.start_transaction();
        match body(&tx) {
            Ok(value) => {
                self.coordinator.commit(&tx)?;
                Ok(value)
            }
            Err(cause) => {
                let report = self.coordinator.rollback(&tx);
                self.cache.lock().delete(id);
                warn!(tx_id = %tx, episode_id = id, error = %cause, "episode write rolled back");
                if report.is_clean() {
                    Err(cause)
                } else {
                    Err(EpisodeError::PartialRollback {
                        cause: Box::new(cause),
                        report,
                    })
                }
            }
        }
    }

    fn db_size_bytes(&self) -> u64 {
        let Some(dir) = &self.config.data_dir else {
            return 0;
        };
        artifact_paths(dir)
            .iter()
            .filter_map(|p| fs::metadata(p).ok())
            .map(|m| m.len())
            .sum()
    }
}

fn mirror_node(episode: &Episode) -> NewNode {
    NewNode::new(EPISODE_NODE_TYPE)
        .with_id(&episode.id)
        .with_properties(json!({ "taskId": episode.task_id, "startTime": episode.start_time }))
}

fn restore_episode_nodes(episodes: &[Episode], graph: &GraphStore) -> Result<usize, EpisodeError> {
    let mut missing = HashSet::new();
    for episode in episodes {
        if !graph.has_node(&episode.id)? {
            graph.create_node(mirror_node(episode))?;
            missing.insert(episode.id.as_str());
        }
    }
    if missing.is_empty() {
        return Ok(0);
    }
    // Nodes first so links between two restored episodes resolve.
    for episode in episodes {
        for target in &episode.linked_episodes {
            if (missing.contains(episode.id.as_str()) || missing.contains(target.as_str()))
                && graph.has_node(target)?
                && graph.find_edge(&episode.id, target, LINKED_TO)?.is_none()
            {
                graph.create_edge(NewEdge::new(&episode.id, target, LINKED_TO))?;
            }
        }
    }
    Ok(missing.len())
}

fn artifact_paths(dir: &Path) -> [PathBuf; 4] {
    [
        dir.join(EPISODES_DB),
        dir.join(GRAPH_DB),
        dir.join(VECTORS_FILE),
        dir.join(TIME_INDEX_FILE),
    ]
}

fn check_time_order(start: Timestamp, end: Option<Timestamp>) -> Result<(), EpisodeError> {
    match end {
        Some(end) if end < start => Err(EpisodeError::Validation(format!(
            "endTime {end} is before startTime {start}"
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> EpisodeStore {
        EpisodeStore::open(MemoryConfig::in_memory(3)).unwrap()
    }

    fn unit(x: f32, y: f32, z: f32) -> Vec<f32> {
        vec![x, y, z]
    }

    #[test]
    fn create_writes_every_index() {
        let s = store();
        let id = s
            .create(NewEpisode::new("t1", unit(1.0, 0.0, 0.0)).starting_at(1000))
            .unwrap();
        assert!(s.get(&id).unwrap().is_some());
        assert_eq!(s.vectors.read().count(), 1);
        assert_eq!(s.time_index.read().get(1000), &[id.clone()]);
        let node = s.graph.get_node(&id).unwrap().unwrap();
        assert_eq!(node.node_type, EPISODE_NODE_TYPE);
        assert_eq!(s.coordinator.pending_count(), 0);
    }

    #[test]
    fn create_normalises_cosine_embeddings() {
        let s = store();
        let id = s.create(NewEpisode::new("t", unit(3.0, 4.0, 0.0))).unwrap();
        let ep = s.get(&id).unwrap().unwrap();
        assert!((ep.embedding[0] - 0.6).abs() < 1e-6);
        assert!((ep.embedding[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn create_rejects_bad_input() {
        let s = store();
        assert!(matches!(
            s.create(NewEpisode::new("t", vec![1.0, 0.0])),
            Err(EpisodeError::Vector(VectorError::DimensionMismatch { .. }))
        ));
        assert!(matches!(
            s.create(NewEpisode::new("t", unit(1.0, 0.0, 0.0)).starting_at(10).ending_at(5)),
            Err(EpisodeError::Validation(_))
        ));
        s.create(NewEpisode::new("t", unit(1.0, 0.0, 0.0)).with_id("dup")).unwrap();
        assert!(matches!(
            s.create(NewEpisode::new("t", unit(1.0, 0.0, 0.0)).with_id("dup")),
            Err(EpisodeError::Validation(_))
        ));
    }

    #[test]
    fn missing_link_target_rolls_back_everything() {
        let s = store();
        let err = s
            .create(
                NewEpisode::new("t", unit(1.0, 0.0, 0.0))
                    .with_id("orphan")
                    .starting_at(500)
                    .linked_to("ghost"),
            )
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(s.get("orphan").unwrap().is_none());
        assert_eq!(s.vectors.read().count(), 0);
        assert!(s.time_index.read().is_empty());
        assert!(!s.graph.has_node("orphan").unwrap());
        assert_eq!(s.coordinator.pending_count(), 0);
    }

    #[test]
    fn linked_episodes_become_graph_edges() {
        let s = store();
        let a = s.create(NewEpisode::new("t", unit(1.0, 0.0, 0.0))).unwrap();
        let b = s
            .create(NewEpisode::new("t", unit(0.0, 1.0, 0.0)).linked_to(&a).linked_to(&a))
            .unwrap();
        assert_eq!(s.get(&b).unwrap().unwrap().linked_episodes, vec![a.clone()]);
        assert!(s.graph.find_edge(&b, &a, LINKED_TO).unwrap().is_some());
    }

    #[test]
    fn link_is_idempotent() {
        let s = store();
        let a = s.create(NewEpisode::new("t", unit(1.0, 0.0, 0.0))).unwrap();
        let b = s.create(NewEpisode::new("t", unit(0.0, 1.0, 0.0))).unwrap();
        assert!(s.link(&a, &b, "related").unwrap());
        assert!(!s.link(&a, &b, "related").unwrap());
        let ep = s.get(&a).unwrap().unwrap();
        assert_eq!(ep.linked_episodes, vec![b.clone()]);
        assert_eq!(s.graph.edges_from(&a).unwrap().len(), 1);
    }

    #[test]
    fn causal_link_closing_a_loop_is_rejected_without_writes() {
        let s = store();
        let a = s.create(NewEpisode::new("t", unit(1.0, 0.0, 0.0))).unwrap();
        let b = s.create(NewEpisode::new("t", unit(0.0, 1.0, 0.0))).unwrap();
        let c = s.create(NewEpisode::new("t", unit(0.0, 0.0, 1.0))).unwrap();
        s.link(&a, &b, CAUSES).unwrap();
        s.link(&b, &c, CAUSES).unwrap();

        let err = s.link(&c, &a, CAUSES).unwrap_err();
        let boundary: MnemosError = err.into();
        assert!(matches!(boundary, MnemosError::CycleViolation { .. }));
        assert!(s.get(&c).unwrap().unwrap().linked_episodes.is_empty());
        assert!(s.validate_causal_chain("chain").unwrap().is_empty());
    }

    #[test]
    fn link_to_missing_episode_is_not_found() {
        let s = store();
        let a = s.create(NewEpisode::new("t", unit(1.0, 0.0, 0.0))).unwrap();
        assert!(s.link(&a, "ghost", "related").unwrap_err().is_not_found());
        assert!(s.link("ghost", &a, "related").unwrap_err().is_not_found());
    }

    #[test]
    fn update_moves_time_and_vector() {
        let s = store();
        let id = s
            .create(NewEpisode::new("t", unit(1.0, 0.0, 0.0)).starting_at(100))
            .unwrap();
        let updated = s
            .update(
                &id,
                EpisodePatch {
                    start_time: Some(200),
                    end_time: Some(300),
                    embedding: Some(unit(0.0, 1.0, 0.0)),
                    metadata: Some(json!({"status": "done"})),
                },
            )
            .unwrap();
        assert_eq!(updated.end_time, Some(300));
        assert!(s.time_index.read().get(100).is_empty());
        assert_eq!(s.time_index.read().get(200), &[id.clone()]);
        assert_eq!(s.vectors.read().get_vector(&id).unwrap(), unit(0.0, 1.0, 0.0));
        assert_eq!(s.get(&id).unwrap().unwrap().metadata["status"], "done");
    }

    #[test]
    fn rejected_update_leaves_episode_untouched() {
        let s = store();
        let id = s
            .create(NewEpisode::new("t", unit(1.0, 0.0, 0.0)).starting_at(100))
            .unwrap();
        let patch = EpisodePatch {
            end_time: Some(50),
            ..EpisodePatch::default()
        };
        assert!(matches!(s.update(&id, patch), Err(EpisodeError::Validation(_))));
        assert_eq!(s.get(&id).unwrap().unwrap().end_time, None);
        assert!(s.update("ghost", EpisodePatch::default()).unwrap_err().is_not_found());
    }

    #[test]
    fn delete_removes_from_all_indexes() {
        let s = store();
        let id = s
            .create(NewEpisode::new("t", unit(1.0, 0.0, 0.0)).starting_at(7))
            .unwrap();
        assert!(s.delete(&id).unwrap());
        assert!(!s.delete(&id).unwrap());
        assert!(s.get(&id).unwrap().is_none());
        assert_eq!(s.vectors.read().count(), 0);
        assert!(s.time_index.read().get(7).is_empty());
        assert!(!s.graph.has_node(&id).unwrap());
    }

    #[test]
    fn time_range_with_ongoing_and_limit() {
        let s = store();
        s.create(NewEpisode::new("t", unit(1.0, 0.0, 0.0)).with_id("early-open").starting_at(10))
            .unwrap();
        s.create(
            NewEpisode::new("t", unit(1.0, 0.0, 0.0))
                .with_id("early-done")
                .starting_at(20)
                .ending_at(30),
        )
        .unwrap();
        s.create(NewEpisode::new("t", unit(1.0, 0.0, 0.0)).with_id("in-b").starting_at(150))
            .unwrap();
        s.create(NewEpisode::new("t", unit(1.0, 0.0, 0.0)).with_id("in-a").starting_at(150))
            .unwrap();

        let ids = |r: QueryResult| r.episodes.into_iter().map(|e| e.id).collect::<Vec<_>>();

        let plain = s.query_time_range(&TimeRangeQuery::new(100, 200)).unwrap();
        assert_eq!(ids(plain), vec!["in-a", "in-b"]);

        let mut q = TimeRangeQuery::new(100, 200);
        q.include_ongoing = true;
        assert_eq!(ids(s.query_time_range(&q).unwrap()), vec!["early-open", "in-a", "in-b"]);

        q.limit = Some(1);
        assert_eq!(ids(s.query_time_range(&q).unwrap()), vec!["early-open"]);

        assert!(s.query_time_range(&TimeRangeQuery::new(5, 1)).is_err());
    }

    #[test]
    fn similarity_filters_by_threshold_and_task() {
        let s = store();
        s.create(NewEpisode::new("alpha", unit(1.0, 0.0, 0.0)).with_id("x")).unwrap();
        s.create(NewEpisode::new("beta", unit(0.9, 0.1, 0.0)).with_id("y")).unwrap();
        s.create(NewEpisode::new("alpha", unit(0.0, 0.0, 1.0)).with_id("z")).unwrap();

        let mut q = SimilarityQuery::new(unit(1.0, 0.0, 0.0), 3);
        q.min_similarity = Some(0.5);
        let r = s.query_similar(&q).unwrap();
        let ids: Vec<_> = r.episodes.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y"]);
        assert!(r.similarities[0] >= r.similarities[1]);

        q.task_ids = Some(vec!["alpha".into()]);
        q.min_similarity = None;
        q.k = 5;
        let r = s.query_similar(&q).unwrap();
        let ids: Vec<_> = r.episodes.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "z"]);

        q.k = 0;
        assert_eq!(s.query_similar(&q).unwrap().count, 0);
    }

    #[test]
    fn similarity_over_fetches_past_filtered_hits() {
        let s = store();
        for i in 0..10 {
            s.create(
                NewEpisode::new("noise", unit(1.0, 0.01 * i as f32, 0.0)).with_id(format!("n{i}")),
            )
            .unwrap();
        }
        s.create(NewEpisode::new("wanted", unit(0.5, 0.5, 0.0)).with_id("w")).unwrap();
        let mut q = SimilarityQuery::new(unit(1.0, 0.0, 0.0), 1);
        q.task_ids = Some(vec!["wanted".into()]);
        let r = s.query_similar(&q).unwrap();
        assert_eq!(r.episodes[0].id, "w");
    }

    #[test]
    fn query_dispatches_on_tag() {
        let s = store();
        s.create(NewEpisode::new("t", unit(1.0, 0.0, 0.0)).with_id("a").starting_at(5))
            .unwrap();
        let q: EpisodeQuery = serde_json::from_value(json!({
            "queryType": "timeRange",
            "timeRange": {"startTime": 0, "endTime": 10}
        }))
        .unwrap();
        assert_eq!(s.query(&q).unwrap().count, 1);

        let q: EpisodeQuery = serde_json::from_value(json!({
            "queryType": "similarity",
            "similarity": {"embedding": [1.0, 0.0, 0.0], "k": 1}
        }))
        .unwrap();
        assert_eq!(s.query(&q).unwrap().episodes[0].id, "a");
    }

    #[test]
    fn cache_serves_repeat_reads() {
        let s = store();
        let id = s.create(NewEpisode::new("t", unit(1.0, 0.0, 0.0))).unwrap();
        s.get(&id).unwrap();
        s.get(&id).unwrap();
        assert!(s.stats().unwrap().cache.hits >= 2);
    }

    #[test]
    fn stats_in_memory() {
        let s = store();
        s.create(NewEpisode::new("t", unit(1.0, 0.0, 0.0))).unwrap();
        let st = s.stats().unwrap();
        assert_eq!(st.episode_count, 1);
        assert_eq!(st.vector_count, 1);
        assert_eq!(st.db_size_bytes, 0);
        assert_eq!(st.time_index.size, 1);
        s.save().unwrap();
    }

    #[test]
    fn boundary_error_mapping() {
        let e: MnemosError = EpisodeError::NotFound("x".into()).into();
        assert!(e.is_not_found());
        let e: MnemosError = EpisodeError::Vector(VectorError::NonFinite).into();
        assert!(matches!(e, MnemosError::Validation(_)));
        let e: MnemosError = EpisodeError::Vector(VectorError::BackendUnavailable("x".into())).into();
        assert!(matches!(e, MnemosError::BackendUnavailable(_)));
    }
}
