//! Service groups.
//!
//! The four surfaces an IPC layer calls into.  Every request and response is
//! a serde type, and [`Services::dispatch`] routes a `group.operation` method
//! name plus JSON params straight to the matching call.
//!
//! | Method | Params | Result |
//! |---|---|---|
//! | `episode.create` | [`NewEpisode`](crate::NewEpisode) | `{episodeId}` |
//! | `episode.query` | [`EpisodeQuery`](crate::EpisodeQuery) | `{episodes, count}` |
//! | `episode.link` | `{sourceId, targetId, linkType}` | `{found, linked}` |
//! | `episode.get` / `episode.delete` | `{id}` | lookup / `{deleted}` |
//! | `episode.update` | `{id, patch}` | lookup |
//! | `episode.save` / `episode.stats` | none | `{saved}` / stats |
//! | `graph.addNode` / `graph.addEdge` | node / edge | `{id}` |
//! | `graph.query` / `graph.traverse` | filter / `{startNodeId, depth}` | nodes / traversal |
//! | `graph.stats` / `graph.clear` | none | `{nodeCount, edgeCount}` / `{cleared}` |
//! | `hyperedge.create` / `hyperedge.createTemporal` | hyperedge | `{id}` |
//! | `hyperedge.query` / `hyperedge.expand` | query / `{id}` | list / lookup |
//! | `hyperedge.stats` | none | counters |
//! | `vector.add` / `vector.search` | `{id, vector}` / `{query, k}` | `{id}` / hits |
//! | `vector.get` / `vector.delete` | `{id}` | lookup / `{deleted}` |
//! | `vector.stats` / `vector.clear` | none | `{count, dimension}` / `{cleared}` |
//!
//! A missing entity is reported as `{"found": false}`, never as an error.

pub mod episode;
pub mod graph;
pub mod hyperedge;
pub mod vector;

use std::sync::Arc;

use mnemos_types::MnemosError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::episode_store::EpisodeStore;

pub use episode::EpisodeService;
pub use graph::GraphService;
pub use hyperedge::HyperedgeService;
pub use vector::VectorService;

/// Result type of every service call.
pub type ServiceResult<T> = Result<T, MnemosError>;

/// Response to a lookup: `{"found": false}` or `{"found": true, ...value}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lookup<T> {
    pub found: bool,
    #[serde(flatten)]
    pub value: Option<T>,
}

impl<T> Lookup<T> {
    pub fn hit(value: T) -> Self {
        Self {
            found: true,
            value: Some(value),
        }
    }

    pub fn miss() -> Self {
        Self {
            found: false,
            value: None,
        }
    }

    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(v) => Self::hit(v),
            None => Self::miss(),
        }
    }

    /// Fold a not-found error into a miss.
    pub fn from_result<E>(result: Result<Option<T>, E>) -> ServiceResult<Self>
    where
        E: Into<MnemosError>,
    {
        match result.map_err(Into::into) {
            Ok(value) => Ok(Self::from_option(value)),
            Err(e) if e.is_not_found() => Ok(Self::miss()),
            Err(e) => Err(e),
        }
    }
}

/// `{"id": ...}` request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdRequest {
    pub id: String,
}

/// `{"deleted": bool}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deleted {
    pub deleted: bool,
}

/// `{"cleared": true}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cleared {
    pub cleared: bool,
}

/// `{"id": ...}` returned by create calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Created {
    pub id: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Services
// ─────────────────────────────────────────────────────────────────────────────

/// All four service groups over one episode store.
///
/// The graph and hyperedge services share the store's graph, so episode
/// nodes are visible to them.  The vector service owns a separate index of
/// the same dimension and metric.
pub struct Services {
    pub episodes: EpisodeService,
    pub graph: GraphService,
    pub hyperedges: HyperedgeService,
    pub vectors: VectorService,
}

impl Services {
    pub fn new(store: Arc<EpisodeStore>) -> ServiceResult<Self> {
        let vectors = VectorService::from_config(store.config())?;
        Ok(Self {
            graph: GraphService::for_store(Arc::clone(&store)),
            hyperedges: HyperedgeService::new(Arc::clone(store.graph())),
            episodes: EpisodeService::new(store),
            vectors,
        })
    }

    /// Persist the episode indexes and the standalone vector index.
    pub fn save(&self) -> ServiceResult<()> {
        self.episodes.save()?;
        self.vectors.save()
    }

    /// Route `method` (`group.operation`) with JSON `params`.
    ///
    /// # Errors
    ///
    /// [`MnemosError::Validation`] for an unknown method or params that do
    /// not match the operation's request type.
    pub fn dispatch(&self, method: &str, params: Value) -> ServiceResult<Value> {
        let Some((group, op)) = method.split_once('.') else {
            return Err(MnemosError::Validation(format!("malformed method: {method}")));
        };
        match group {
            "episode" => self.episodes.dispatch(op, params),
            "graph" => self.graph.dispatch(op, params),
            "hyperedge" => self.hyperedges.dispatch(op, params),
            "vector" => self.vectors.dispatch(op, params),
            _ => Err(unknown_method(method)),
        }
    }
}

pub(crate) fn parse<T: DeserializeOwned>(params: Value) -> ServiceResult<T> {
    serde_json::from_value(params).map_err(|e| MnemosError::Validation(format!("invalid params: {e}")))
}

pub(crate) fn to_value<T: Serialize>(value: T) -> ServiceResult<Value> {
    serde_json::to_value(value).map_err(|e| MnemosError::Storage(format!("response encoding: {e}")))
}

pub(crate) fn unknown_method(method: &str) -> MnemosError {
    MnemosError::Validation(format!("unknown method: {method}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use serde_json::json;

    fn services() -> Services {
        let store = Arc::new(EpisodeStore::open(MemoryConfig::in_memory(2)).unwrap());
        Services::new(store).unwrap()
    }

    #[test]
    fn lookup_serializes_flat() {
        #[derive(Serialize)]
        struct Item {
            name: &'static str,
        }
        let hit = serde_json::to_value(Lookup::hit(Item { name: "a" })).unwrap();
        assert_eq!(hit, json!({"found": true, "name": "a"}));
        let miss = serde_json::to_value(Lookup::<Item>::miss()).unwrap();
        assert_eq!(miss, json!({"found": false}));
    }

    #[test]
    fn lookup_folds_not_found_errors() {
        let r: Result<Option<u8>, MnemosError> = Err(MnemosError::not_found("node", "x"));
        assert!(!Lookup::from_result(r).unwrap().found);
        let r: Result<Option<u8>, MnemosError> = Err(MnemosError::Storage("disk".into()));
        assert!(Lookup::from_result(r).is_err());
    }

    #[test]
    fn dispatch_routes_by_group() {
        let s = services();
        let created = s
            .dispatch(
                "episode.create",
                json!({"taskId": "t", "embedding": [1.0, 0.0], "startTime": 10}),
            )
            .unwrap();
        let id = created["episodeId"].as_str().unwrap().to_string();

        let got = s.dispatch("episode.get", json!({"id": id})).unwrap();
        assert_eq!(got["found"], true);
        assert_eq!(got["taskId"], "t");

        let stats = s.dispatch("graph.stats", Value::Null).unwrap();
        assert_eq!(stats["nodeCount"], 1);

        let vec_stats = s.dispatch("vector.stats", Value::Null).unwrap();
        assert_eq!(vec_stats, json!({"count": 0, "dimension": 2}));
    }

    #[test]
    fn dispatch_rejects_unknown_and_malformed() {
        let s = services();
        assert!(matches!(s.dispatch("nope", Value::Null), Err(MnemosError::Validation(_))));
        assert!(matches!(s.dispatch("graph.fly", Value::Null), Err(MnemosError::Validation(_))));
        assert!(matches!(
            s.dispatch("episode.get", json!({"wrong": 1})),
            Err(MnemosError::Validation(_))
        ));
    }
}
