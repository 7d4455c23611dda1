//! Hyperedge service.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use mnemos_graph::{GraphStore, HyperedgeExpansion, NewHyperedge};
use mnemos_types::{Hyperedge, MnemosError, TemporalGranularity};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Created, Deleted, IdRequest, Lookup, ServiceResult, parse, to_value, unknown_method};

/// Input to [`HyperedgeService::create_temporal`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTemporalHyperedge {
    #[serde(flatten)]
    pub hyperedge: NewHyperedge,
    pub expires_at: DateTime<Utc>,
    pub granularity: TemporalGranularity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HyperedgeQueryType {
    ByNode,
    All,
}

/// Expired hyperedges are left out unless `includeExpired` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HyperedgeQuery {
    pub query_type: HyperedgeQueryType,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub include_expired: bool,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl HyperedgeQuery {
    pub fn all() -> Self {
        Self {
            query_type: HyperedgeQueryType::All,
            node_id: None,
            include_expired: false,
            limit: None,
        }
    }

    pub fn by_node(node_id: impl Into<String>) -> Self {
        Self {
            query_type: HyperedgeQueryType::ByNode,
            node_id: Some(node_id.into()),
            ..Self::all()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HyperedgeList {
    pub hyperedges: Vec<Hyperedge>,
    pub count: usize,
    pub execution_time_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HyperedgeStats {
    pub hyperedge_count: usize,
    pub temporal_count: usize,
    pub expired_count: usize,
    pub total_node_references: usize,
}

/// N-ary relationship operations over the shared graph.
pub struct HyperedgeService {
    graph: Arc<GraphStore>,
}

impl HyperedgeService {
    pub fn new(graph: Arc<GraphStore>) -> Self {
        Self { graph }
    }

    pub fn create(&self, hyperedge: NewHyperedge) -> ServiceResult<Created> {
        Ok(Created {
            id: self.graph.create_hyperedge(hyperedge)?,
        })
    }

    pub fn create_temporal(&self, request: NewTemporalHyperedge) -> ServiceResult<Created> {
        Ok(Created {
            id: self
                .graph
                .create_temporal_hyperedge(request.hyperedge, request.expires_at, request.granularity)?,
        })
    }

    pub fn query(&self, query: &HyperedgeQuery) -> ServiceResult<HyperedgeList> {
        let started = Instant::now();
        let raw = match query.query_type {
            HyperedgeQueryType::All => self.graph.get_all_hyperedges()?,
            HyperedgeQueryType::ByNode => {
                let Some(node_id) = &query.node_id else {
                    return Err(MnemosError::Validation("byNode query requires nodeId".into()));
                };
                self.graph.get_hyperedges_by_node(node_id)?
            }
        };
        let now = Utc::now();
        let hyperedges: Vec<Hyperedge> = raw
            .into_iter()
            .filter(|h| query.include_expired || !h.is_expired_at(now))
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(HyperedgeList {
            count: hyperedges.len(),
            hyperedges,
            execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    pub fn expand(&self, id: &str) -> ServiceResult<Lookup<HyperedgeExpansion>> {
        Lookup::from_result(self.graph.expand_hyperedge(id))
    }

    pub fn delete(&self, id: &str) -> ServiceResult<Deleted> {
        Ok(Deleted {
            deleted: self.graph.delete_hyperedge(id)?,
        })
    }

    pub fn stats(&self) -> ServiceResult<HyperedgeStats> {
        let stats = self.graph.stats()?;
        Ok(HyperedgeStats {
            hyperedge_count: stats.hyperedge_count,
            temporal_count: stats.temporal_count,
            expired_count: stats.expired_count,
            total_node_references: stats.total_node_references,
        })
    }

    pub(crate) fn dispatch(&self, op: &str, params: Value) -> ServiceResult<Value> {
        match op {
            "create" => to_value(self.create(parse(params)?)?),
            "createTemporal" => to_value(self.create_temporal(parse(params)?)?),
            "query" => to_value(self.query(&parse(params)?)?),
            "expand" => to_value(self.expand(&parse::<IdRequest>(params)?.id)?),
            "delete" => to_value(self.delete(&parse::<IdRequest>(params)?.id)?),
            "stats" => to_value(self.stats()?),
            _ => Err(unknown_method(&format!("hyperedge.{op}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use mnemos_graph::NewNode;
    use serde_json::json;

    fn service() -> HyperedgeService {
        HyperedgeService::new(Arc::new(GraphStore::open_in_memory().unwrap()))
    }

    #[test]
    fn expired_entries_respect_include_flag() {
        let s = service();
        s.create(NewHyperedge::new(["a", "b"], "team")).unwrap();
        s.create_temporal(NewTemporalHyperedge {
            hyperedge: NewHyperedge::new(["a", "c"], "meeting"),
            expires_at: Utc::now() - Duration::seconds(1),
            granularity: TemporalGranularity::Minute,
        })
        .unwrap();

        let live = s.query(&HyperedgeQuery::by_node("a")).unwrap();
        assert_eq!(live.count, 1);
        assert_eq!(live.hyperedges[0].edge_type, "team");

        let mut q = HyperedgeQuery::by_node("a");
        q.include_expired = true;
        assert_eq!(s.query(&q).unwrap().count, 2);

        let stats = s.stats().unwrap();
        assert_eq!(
            stats,
            HyperedgeStats {
                hyperedge_count: 2,
                temporal_count: 1,
                expired_count: 1,
                total_node_references: 4,
            }
        );
    }

    #[test]
    fn limit_and_missing_node_id() {
        let s = service();
        for i in 0..3 {
            s.create(NewHyperedge::new([format!("x{i}"), "hub".to_string()], "star")).unwrap();
        }
        let mut q = HyperedgeQuery::all();
        q.limit = Some(2);
        assert_eq!(s.query(&q).unwrap().count, 2);

        q.query_type = HyperedgeQueryType::ByNode;
        assert!(matches!(s.query(&q), Err(MnemosError::Validation(_))));
    }

    #[test]
    fn fewer_than_two_nodes_is_rejected() {
        let s = service();
        let err = s.create(NewHyperedge::new(["solo"], "x")).unwrap_err();
        assert!(matches!(err, MnemosError::Validation(_)));
    }

    #[test]
    fn expand_resolves_members_or_reports_miss() {
        let graph = Arc::new(GraphStore::open_in_memory().unwrap());
        graph.create_node(NewNode::new("agent").with_id("a")).unwrap();
        let s = HyperedgeService::new(Arc::clone(&graph));
        let id = s.create(NewHyperedge::new(["a", "b"], "pair")).unwrap().id;

        let expanded = s.expand(&id).unwrap();
        assert!(expanded.found);
        let expansion = expanded.value.unwrap();
        assert_eq!(expansion.nodes.len(), 1);
        assert_eq!(expansion.missing, vec!["b"]);

        assert!(!s.expand("ghost").unwrap().found);
    }

    #[test]
    fn dispatch_create_temporal_from_json() {
        let s = service();
        let created = s
            .dispatch(
                "createTemporal",
                json!({
                    "nodes": ["a", "b"],
                    "type": "sprint",
                    "expiresAt": "2999-01-01T00:00:00Z",
                    "granularity": "week"
                }),
            )
            .unwrap();
        assert!(created["id"].is_string());
        let listed = s.dispatch("query", json!({"queryType": "all"})).unwrap();
        assert_eq!(listed["count"], 1);
        assert_eq!(listed["hyperedges"][0]["granularity"], "week");
    }
}
