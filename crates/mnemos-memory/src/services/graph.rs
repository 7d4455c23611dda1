//! Graph service.

use std::sync::Arc;

use mnemos_graph::{GraphStore, NewEdge, NewNode, NodeFilter, Traversal};
use mnemos_types::GraphNode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::episode_store::EpisodeStore;

use super::{Cleared, Created, IdRequest, Lookup, ServiceResult, parse, to_value, unknown_method};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeList {
    pub nodes: Vec<GraphNode>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraverseRequest {
    pub start_node_id: String,
    #[serde(default = "default_depth")]
    pub depth: usize,
}

fn default_depth() -> usize {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphCounts {
    pub node_count: usize,
    pub edge_count: usize,
}

/// Node and edge operations over the shared graph.
pub struct GraphService {
    graph: Arc<GraphStore>,
    episodes: Option<Arc<EpisodeStore>>,
}

impl GraphService {
    /// Service over a graph with no episodes behind it.
    pub fn new(graph: Arc<GraphStore>) -> Self {
        Self { graph, episodes: None }
    }

    /// Service over the episode store's own graph.
    pub fn for_store(store: Arc<EpisodeStore>) -> Self {
        Self {
            graph: Arc::clone(store.graph()),
            episodes: Some(store),
        }
    }

    pub fn add_node(&self, node: NewNode) -> ServiceResult<Created> {
        Ok(Created {
            id: self.graph.create_node(node)?,
        })
    }

    pub fn add_edge(&self, edge: NewEdge) -> ServiceResult<Created> {
        Ok(Created {
            id: self.graph.create_edge(edge)?,
        })
    }

    pub fn get_node(&self, id: &str) -> ServiceResult<Lookup<GraphNode>> {
        Lookup::from_result(self.graph.get_node(id))
    }

    pub fn query(&self, filter: &NodeFilter) -> ServiceResult<NodeList> {
        let nodes = self.graph.query_nodes(filter)?;
        Ok(NodeList {
            count: nodes.len(),
            nodes,
        })
    }

    /// Unknown start nodes come back as `found: false`.
    pub fn traverse(&self, request: &TraverseRequest) -> ServiceResult<Lookup<Traversal>> {
        Lookup::from_result(
            self.graph
                .traverse_hops(&request.start_node_id, request.depth)
                .map(Some),
        )
    }

    pub fn stats(&self) -> ServiceResult<GraphCounts> {
        let stats = self.graph.stats()?;
        Ok(GraphCounts {
            node_count: stats.node_count,
            edge_count: stats.edge_count,
        })
    }

    /// Drops every node, edge and hyperedge.  Episode nodes are then
    /// re-created from the episode records, so episodes stay linkable; their
    /// links come back as `linked_to` edges.
    pub fn clear(&self) -> ServiceResult<Cleared> {
        self.graph.clear()?;
        if let Some(store) = &self.episodes {
            store.restore_graph_nodes()?;
        }
        Ok(Cleared { cleared: true })
    }

    pub(crate) fn dispatch(&self, op: &str, params: Value) -> ServiceResult<Value> {
        match op {
            "addNode" => to_value(self.add_node(parse(params)?)?),
            "addEdge" => to_value(self.add_edge(parse(params)?)?),
            "getNode" => to_value(self.get_node(&parse::<IdRequest>(params)?.id)?),
            "query" => {
                let filter = if params.is_null() {
                    NodeFilter::default()
                } else {
                    parse(params)?
                };
                to_value(self.query(&filter)?)
            }
            "traverse" => to_value(self.traverse(&parse(params)?)?),
            "stats" => to_value(self.stats()?),
            "clear" => to_value(self.clear()?),
            _ => Err(unknown_method(&format!("graph.{op}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemos_types::MnemosError;
    use serde_json::json;

    fn service() -> GraphService {
        GraphService::new(Arc::new(GraphStore::open_in_memory().unwrap()))
    }

    #[test]
    fn add_query_traverse() {
        let g = service();
        let a = g
            .add_node(NewNode::new("agent").with_properties(json!({"namespace": "swarm", "key": "coder"})))
            .unwrap()
            .id;
        let b = g
            .add_node(NewNode::new("agent").with_properties(json!({"namespace": "swarm", "key": "tester"})))
            .unwrap()
            .id;
        g.add_node(NewNode::new("agent").with_properties(json!({"namespace": "other"})))
            .unwrap();
        g.add_edge(NewEdge::new(&a, &b, "collaborates")).unwrap();

        let filter = NodeFilter {
            namespace: Some("swarm".into()),
            key_pattern: Some("cod*".into()),
            ..NodeFilter::default()
        };
        let listed = g.query(&filter).unwrap();
        assert_eq!(listed.count, 1);
        assert_eq!(listed.nodes[0].id, a);

        let t = g
            .traverse(&TraverseRequest {
                start_node_id: a.clone(),
                depth: 2,
            })
            .unwrap();
        assert!(t.found);
        assert_eq!(t.value.unwrap().node_ids, vec![b]);

        assert_eq!(g.stats().unwrap(), GraphCounts { node_count: 3, edge_count: 1 });
    }

    #[test]
    fn traverse_unknown_start_is_found_false() {
        let g = service();
        let t = g
            .traverse(&TraverseRequest {
                start_node_id: "ghost".into(),
                depth: 1,
            })
            .unwrap();
        assert!(!t.found);
        assert!(!g.get_node("ghost").unwrap().found);
    }

    #[test]
    fn edge_to_missing_node_is_an_error() {
        let g = service();
        let a = g.add_node(NewNode::new("x")).unwrap().id;
        let err = g.add_edge(NewEdge::new(&a, "ghost", "rel")).unwrap_err();
        assert!(matches!(err, MnemosError::NotFound { .. }));
    }

    #[test]
    fn dispatch_query_without_params_and_clear() {
        let g = service();
        g.dispatch("addNode", json!({"type": "agent"})).unwrap();
        let listed = g.dispatch("query", Value::Null).unwrap();
        assert_eq!(listed["count"], 1);
        assert_eq!(g.dispatch("clear", Value::Null).unwrap(), json!({"cleared": true}));
        assert_eq!(g.stats().unwrap().node_count, 0);
    }

    #[test]
    fn clear_keeps_episodes_linkable() {
        use crate::config::MemoryConfig;
        use crate::episode_store::NewEpisode;
        use mnemos_graph::LINKED_TO;

        let store = Arc::new(EpisodeStore::open(MemoryConfig::in_memory(2)).unwrap());
        let a = store.create(NewEpisode::new("t", vec![1.0, 0.0]).with_id("a")).unwrap();
        let b = store
            .create(NewEpisode::new("t", vec![0.0, 1.0]).with_id("b").linked_to(&a))
            .unwrap();
        let g = GraphService::for_store(Arc::clone(&store));
        g.add_node(NewNode::new("agent").with_id("scratch")).unwrap();

        g.clear().unwrap();

        assert_eq!(g.stats().unwrap(), GraphCounts { node_count: 2, edge_count: 1 });
        assert!(store.graph().find_edge(&b, &a, LINKED_TO).unwrap().is_some());
        assert!(!g.get_node("scratch").unwrap().found);
        assert!(store.link(&a, &b, "follows").unwrap());
        store
            .create(NewEpisode::new("t", vec![1.0, 1.0]).with_id("c").linked_to(&a))
            .unwrap();
    }
}
