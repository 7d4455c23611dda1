//! Graph Store.
//!
//! Typed property graph plus n-ary hyperedges, persisted to SQLite.
//!
//! # Storage layout
//!
//! | table               | key                         | contents                                      |
//! |---------------------|-----------------------------|-----------------------------------------------|
//! | `graph_nodes`       | `id`                        | type, JSON properties, optional f32 embedding |
//! | `graph_edges`       | `id`                        | directed `source → target`, type, metadata    |
//! | `hyperedges`        | `id`                        | type, metadata, optional `expires_at`         |
//! | `hyperedge_members` | `(hyperedge_id, node_id)`   | member order via `position`                   |
//!
//! Edges require both endpoints to exist.  Hyperedge members do not: a
//! hyperedge may group IDs owned by other stores.
//!
//! # Causal edges
//!
//! An edge typed [`CAUSES`] is checked with the
//! [`ReachabilityDetector`] before it is written; an edge that would close
//! a loop is rejected with [`GraphError::Cycle`] and nothing is stored.
//!
//! # Example
//!
//! ```rust
//! use mnemos_graph::{GraphStore, NewEdge, NewNode};
//!
//! let graph = GraphStore::open_in_memory().unwrap();
//! let a = graph.create_node(NewNode::new("concept")).unwrap();
//! let b = graph.create_node(NewNode::new("concept")).unwrap();
//! graph.create_edge(NewEdge::new(&a, &b, "causes")).unwrap();
//!
//! // b → a would close a loop.
//! assert!(graph.create_edge(NewEdge::new(&b, &a, "causes")).is_err());
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use glob::Pattern;
use mnemos_types::{
    CAUSES, CausalLink, CausalLoop, CausalNode, GraphEdge, GraphNode, Hyperedge, MnemosError,
    TemporalGranularity, new_id,
};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::causal;
use crate::cycle::ReachabilityDetector;

/// Edge type written for [`NewNode::link_to`] targets.
pub const LINKED_TO: &str = "linked_to";

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from graph store operations.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("{kind} already exists: {id}")]
    Duplicate { kind: &'static str, id: String },
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Causal cycle rejected: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },
    #[error("Invalid key pattern: {0}")]
    InvalidPattern(#[from] glob::PatternError),
}

impl GraphError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GraphError::NotFound { .. })
    }
}

impl From<GraphError> for MnemosError {
    fn from(e: GraphError) -> Self {
        match e {
            GraphError::NotFound { kind, id } => MnemosError::not_found(kind, &id),
            GraphError::Validation(msg) => MnemosError::Validation(msg),
            GraphError::Duplicate { .. } | GraphError::InvalidPattern(_) => {
                MnemosError::Validation(e.to_string())
            }
            GraphError::Cycle { path } => MnemosError::CycleViolation { path },
            GraphError::Sqlite(_) | GraphError::Json(_) => MnemosError::Storage(e.to_string()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request / result types
// ─────────────────────────────────────────────────────────────────────────────

/// Input to [`GraphStore::create_node`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNode {
    /// Caller-chosen ID; a UUID is generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub properties: Value,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    /// Existing nodes to connect with a [`LINKED_TO`] edge.
    #[serde(default)]
    pub link_to: Vec<String>,
}

impl NewNode {
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn linked_to(mut self, target: impl Into<String>) -> Self {
        self.link_to.push(target.into());
        self
    }
}

/// Input to [`GraphStore::create_edge`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEdge {
    #[serde(default)]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub edge_type: String,
    #[serde(default)]
    pub metadata: Value,
}

impl NewEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>, edge_type: impl Into<String>) -> Self {
        Self {
            id: None,
            source: source.into(),
            target: target.into(),
            edge_type: edge_type.into(),
            metadata: Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Input to [`GraphStore::create_hyperedge`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewHyperedge {
    #[serde(default)]
    pub id: Option<String>,
    pub nodes: Vec<String>,
    #[serde(rename = "type")]
    pub edge_type: String,
    #[serde(default)]
    pub metadata: Value,
}

impl NewHyperedge {
    pub fn new<I, S>(nodes: I, edge_type: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: None,
            nodes: nodes.into_iter().map(Into::into).collect(),
            edge_type: edge_type.into(),
            metadata: Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Node filter for [`GraphStore::query_nodes`].
///
/// `key_pattern` is a Unix-style glob (`*`, `?`, `[a-z]`, `[!x]`; `[*]` for a
/// literal star) matched against the node ID and against a string `key`
/// property.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeFilter {
    #[serde(default, rename = "type")]
    pub node_type: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub key_pattern: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Result of [`GraphStore::traverse_hops`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Traversal {
    /// Reached nodes in BFS order, start node excluded.
    pub node_ids: Vec<String>,
    pub count: usize,
    pub execution_time_ms: f64,
}

/// A hyperedge together with its resolved member nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HyperedgeExpansion {
    pub hyperedge: Hyperedge,
    pub nodes: Vec<GraphNode>,
    /// Member IDs with no node in this store.
    pub missing: Vec<String>,
}

/// Counters reported by [`GraphStore::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub hyperedge_count: usize,
    pub temporal_count: usize,
    pub expired_count: usize,
    pub total_node_references: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Row helpers
// ─────────────────────────────────────────────────────────────────────────────

const NODE_COLUMNS: &str = "id, node_type, properties, embedding, created_at";
const EDGE_COLUMNS: &str = "id, source, target, edge_type, metadata, created_at";
const HYPEREDGE_COLUMNS: &str = "id, edge_type, metadata, created_at, expires_at, granularity";

fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    s.parse::<DateTime<Utc>>()
        .map_err(|e| rusqlite::Error::InvalidColumnType(idx, e.to_string(), Type::Text))
}

fn json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Value> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<GraphNode> {
    let blob: Option<Vec<u8>> = row.get(3)?;
    let created: String = row.get(4)?;
    Ok(GraphNode {
        id: row.get(0)?,
        node_type: row.get(1)?,
        properties: json_column(row, 2)?,
        embedding: blob.map(|b| bytes_to_embedding(&b)),
        created_at: parse_ts(4, &created)?,
    })
}

fn edge_from_row(row: &Row<'_>) -> rusqlite::Result<GraphEdge> {
    let created: String = row.get(5)?;
    Ok(GraphEdge {
        id: row.get(0)?,
        source: row.get(1)?,
        target: row.get(2)?,
        edge_type: row.get(3)?,
        metadata: json_column(row, 4)?,
        created_at: parse_ts(5, &created)?,
    })
}

/// Hyperedge header; members are filled in separately.
fn hyperedge_from_row(row: &Row<'_>) -> rusqlite::Result<Hyperedge> {
    let created: String = row.get(3)?;
    let expires: Option<String> = row.get(4)?;
    let granularity: Option<String> = row.get(5)?;
    Ok(Hyperedge {
        id: row.get(0)?,
        nodes: Vec::new(),
        edge_type: row.get(1)?,
        metadata: json_column(row, 2)?,
        created_at: parse_ts(3, &created)?,
        expires_at: expires.as_deref().map(|s| parse_ts(4, s)).transpose()?,
        granularity: granularity.as_deref().and_then(TemporalGranularity::parse),
    })
}

fn object_or_empty(v: Value) -> Value {
    if v.is_null() {
        Value::Object(Default::default())
    } else {
        v
    }
}

fn node_exists(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM graph_nodes WHERE id = ?1", [id], |_| Ok(()))
        .optional()
        .map(|r| r.is_some())
}

fn edge_exists(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM graph_edges WHERE id = ?1", [id], |_| Ok(()))
        .optional()
        .map(|r| r.is_some())
}

fn insert_edge(
    conn: &Connection,
    id: &str,
    source: &str,
    target: &str,
    edge_type: &str,
    metadata: &Value,
    created_at: DateTime<Utc>,
) -> Result<(), GraphError> {
    conn.execute(
        "INSERT INTO graph_edges (id, source, target, edge_type, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id,
            source,
            target,
            edge_type,
            serde_json::to_string(metadata)?,
            created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Every `causes` edge as a one-cause, one-effect link.
fn causal_links_in(conn: &Connection) -> rusqlite::Result<Vec<CausalLink>> {
    let mut stmt = conn.prepare(
        "SELECT id, source, target FROM graph_edges WHERE edge_type = ?1 ORDER BY rowid",
    )?;
    let rows = stmt.query_map([CAUSES], |row| {
        Ok(CausalLink {
            id: row.get(0)?,
            causes: vec![row.get(1)?],
            effects: vec![row.get(2)?],
        })
    })?;
    rows.collect()
}

fn load_members(conn: &Connection, hyperedges: &mut [Hyperedge]) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(
        "SELECT node_id FROM hyperedge_members WHERE hyperedge_id = ?1 ORDER BY position",
    )?;
    for h in hyperedges.iter_mut() {
        h.nodes = stmt
            .query_map([&h.id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<_>>()?;
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// GraphStore
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed property graph with hyperedges.
///
/// Methods take `&self`; the connection sits behind a mutex so one store can
/// be shared through an `Arc` by the episode store and its compensations.
pub struct GraphStore {
    conn: Mutex<Connection>,
    detector: Mutex<ReachabilityDetector>,
}

impl GraphStore {
    /// Open (or create) a persistent graph database at `path`.
    pub fn open(path: &Path) -> Result<Self, GraphError> {
        Self::with_connection(Connection::open(path)?)
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, GraphError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, GraphError> {
        let store = Self {
            conn: Mutex::new(conn),
            detector: Mutex::new(ReachabilityDetector::default()),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), GraphError> {
        self.conn.lock().execute_batch(
            "CREATE TABLE IF NOT EXISTS graph_nodes (
                id         TEXT NOT NULL PRIMARY KEY,
                node_type  TEXT NOT NULL,
                properties TEXT NOT NULL,
                embedding  BLOB,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_graph_nodes_type ON graph_nodes(node_type);
            CREATE TABLE IF NOT EXISTS graph_edges (
                id         TEXT NOT NULL PRIMARY KEY,
                source     TEXT NOT NULL,
                target     TEXT NOT NULL,
                edge_type  TEXT NOT NULL,
                metadata   TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_graph_edges_source ON graph_edges(source);
            CREATE INDEX IF NOT EXISTS idx_graph_edges_target ON graph_edges(target);
            CREATE INDEX IF NOT EXISTS idx_graph_edges_type ON graph_edges(edge_type);
            CREATE TABLE IF NOT EXISTS hyperedges (
                id          TEXT NOT NULL PRIMARY KEY,
                edge_type   TEXT NOT NULL,
                metadata    TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                expires_at  TEXT,
                granularity TEXT
            );
            CREATE TABLE IF NOT EXISTS hyperedge_members (
                hyperedge_id TEXT NOT NULL,
                node_id      TEXT NOT NULL,
                position     INTEGER NOT NULL,
                PRIMARY KEY (hyperedge_id, node_id)
            );
            CREATE INDEX IF NOT EXISTS idx_hyperedge_members_node ON hyperedge_members(node_id);",
        )?;
        Ok(())
    }

    // ── nodes ────────────────────────────────────────────────────────────────

    /// Create a node and its [`LINKED_TO`] edges in one SQLite transaction.
    pub fn create_node(&self, node: NewNode) -> Result<String, GraphError> {
        if node.node_type.trim().is_empty() {
            return Err(GraphError::Validation("node type must not be empty".into()));
        }
        if let Some(e) = &node.embedding
            && e.iter().any(|x| !x.is_finite())
        {
            return Err(GraphError::Validation(
                "node embedding contains non-finite values".into(),
            ));
        }
        let id = node.id.unwrap_or_else(new_id);
        if id.is_empty() {
            return Err(GraphError::Validation("node id must not be empty".into()));
        }
        let now = Utc::now();
        let properties = object_or_empty(node.properties);

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        if node_exists(&tx, &id)? {
            return Err(GraphError::Duplicate { kind: "node", id });
        }
        tx.execute(
            "INSERT INTO graph_nodes (id, node_type, properties, embedding, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id,
                node.node_type,
                serde_json::to_string(&properties)?,
                node.embedding.as_deref().map(embedding_to_bytes),
                now.to_rfc3339(),
            ],
        )?;
        let empty = Value::Object(Default::default());
        for target in &node.link_to {
            if !node_exists(&tx, target)? {
                return Err(GraphError::NotFound {
                    kind: "node",
                    id: target.clone(),
                });
            }
            insert_edge(&tx, &new_id(), &id, target, LINKED_TO, &empty, now)?;
        }
        tx.commit()?;
        debug!(node_id = %id, node_type = %node.node_type, links = node.link_to.len(), "graph node created");
        Ok(id)
    }

    pub fn get_node(&self, id: &str) -> Result<Option<GraphNode>, GraphError> {
        let conn = self.conn.lock();
        let node = conn
            .query_row(
                &format!("SELECT {NODE_COLUMNS} FROM graph_nodes WHERE id = ?1"),
                [id],
                node_from_row,
            )
            .optional()?;
        Ok(node)
    }

    pub fn has_node(&self, id: &str) -> Result<bool, GraphError> {
        Ok(node_exists(&self.conn.lock(), id)?)
    }

    /// Delete a node, its incident edges and its hyperedge memberships.
    /// Hyperedges left with fewer than two members are deleted too.
    ///
    /// Returns `false` when the node did not exist.
    pub fn delete_node(&self, id: &str) -> Result<bool, GraphError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        if tx.execute("DELETE FROM graph_nodes WHERE id = ?1", [id])? == 0 {
            return Ok(false);
        }
        let causal: usize = tx.query_row(
            "SELECT COUNT(*) FROM graph_edges
             WHERE (source = ?1 OR target = ?1) AND edge_type = ?2",
            params![id, CAUSES],
            |r| r.get(0),
        )?;
        let edges = tx.execute(
            "DELETE FROM graph_edges WHERE source = ?1 OR target = ?1",
            [id],
        )?;
        tx.execute("DELETE FROM hyperedge_members WHERE node_id = ?1", [id])?;
        let orphaned = tx.execute(
            "DELETE FROM hyperedges WHERE id IN (
                 SELECT h.id FROM hyperedges h
                 LEFT JOIN hyperedge_members m ON m.hyperedge_id = h.id
                 GROUP BY h.id HAVING COUNT(m.node_id) < 2
             )",
            [],
        )?;
        tx.execute(
            "DELETE FROM hyperedge_members
             WHERE hyperedge_id NOT IN (SELECT id FROM hyperedges)",
            [],
        )?;
        tx.commit()?;
        if causal > 0 {
            self.detector.lock().invalidate();
        }
        debug!(node_id = %id, edges, orphaned_hyperedges = orphaned, "graph node deleted");
        Ok(true)
    }

    /// Nodes matching `filter`, in insertion order.
    pub fn query_nodes(&self, filter: &NodeFilter) -> Result<Vec<GraphNode>, GraphError> {
        let pattern = filter.key_pattern.as_deref().map(Pattern::new).transpose()?;
        let conn = self.conn.lock();
        let nodes: Vec<GraphNode> = match &filter.node_type {
            Some(t) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {NODE_COLUMNS} FROM graph_nodes WHERE node_type = ?1 ORDER BY rowid"
                ))?;
                stmt.query_map([t], node_from_row)?
                    .collect::<rusqlite::Result<_>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {NODE_COLUMNS} FROM graph_nodes ORDER BY rowid"
                ))?;
                stmt.query_map([], node_from_row)?
                    .collect::<rusqlite::Result<_>>()?
            }
        };
        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(nodes
            .into_iter()
            .filter(|n| match &filter.namespace {
                Some(ns) => n.properties.get("namespace").and_then(Value::as_str) == Some(ns.as_str()),
                None => true,
            })
            .filter(|n| match &pattern {
                Some(p) => {
                    p.matches(&n.id)
                        || n.properties
                            .get("key")
                            .and_then(Value::as_str)
                            .is_some_and(|k| p.matches(k))
                }
                None => true,
            })
            .take(limit)
            .collect())
    }

    /// Breadth-first walk over edges in either direction, up to `depth` hops.
    pub fn traverse_hops(&self, start: &str, depth: usize) -> Result<Traversal, GraphError> {
        let started = Instant::now();
        let conn = self.conn.lock();
        if !node_exists(&conn, start)? {
            return Err(GraphError::NotFound {
                kind: "node",
                id: start.to_string(),
            });
        }
        let mut stmt = conn.prepare(
            "SELECT target FROM graph_edges WHERE source = ?1
             UNION
             SELECT source FROM graph_edges WHERE target = ?1",
        )?;
        let mut seen: HashSet<String> = HashSet::from([start.to_string()]);
        let mut frontier = vec![start.to_string()];
        let mut reached = Vec::new();
        for _ in 0..depth {
            let mut next = Vec::new();
            for node in &frontier {
                for neighbour in stmt.query_map([node], |r| r.get::<_, String>(0))? {
                    let neighbour = neighbour?;
                    if seen.insert(neighbour.clone()) {
                        reached.push(neighbour.clone());
                        next.push(neighbour);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        Ok(Traversal {
            count: reached.len(),
            node_ids: reached,
            execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    // ── edges ────────────────────────────────────────────────────────────────

    /// Create a directed edge between two existing nodes.
    ///
    /// # Errors
    ///
    /// [`GraphError::Cycle`] when the edge is typed `causes` and would close
    /// a loop among existing `causes` edges.
    pub fn create_edge(&self, edge: NewEdge) -> Result<String, GraphError> {
        if edge.edge_type.trim().is_empty() {
            return Err(GraphError::Validation("edge type must not be empty".into()));
        }
        let id = edge.id.unwrap_or_else(new_id);
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for endpoint in [&edge.source, &edge.target] {
            if !node_exists(&tx, endpoint)? {
                return Err(GraphError::NotFound {
                    kind: "node",
                    id: endpoint.clone(),
                });
            }
        }
        if edge_exists(&tx, &id)? {
            return Err(GraphError::Duplicate { kind: "edge", id });
        }

        let is_causal = edge.edge_type == CAUSES;
        if is_causal {
            let links = causal_links_in(&tx)?;
            let candidate = CausalLink {
                id: id.clone(),
                causes: vec![edge.source.clone()],
                effects: vec![edge.target.clone()],
            };
            if let Some(path) = self.detector.lock().find_cycle(&links, &candidate) {
                warn!(source = %edge.source, target = %edge.target, "rejected causal edge closing a loop");
                return Err(GraphError::Cycle { path });
            }
        }

        insert_edge(
            &tx,
            &id,
            &edge.source,
            &edge.target,
            &edge.edge_type,
            &object_or_empty(edge.metadata),
            Utc::now(),
        )?;
        tx.commit()?;
        if is_causal {
            self.detector.lock().invalidate();
        }
        debug!(edge_id = %id, source = %edge.source, target = %edge.target, edge_type = %edge.edge_type, "graph edge created");
        Ok(id)
    }

    pub fn get_edge(&self, id: &str) -> Result<Option<GraphEdge>, GraphError> {
        let conn = self.conn.lock();
        let edge = conn
            .query_row(
                &format!("SELECT {EDGE_COLUMNS} FROM graph_edges WHERE id = ?1"),
                [id],
                edge_from_row,
            )
            .optional()?;
        Ok(edge)
    }

    /// First edge `source → target` of `edge_type`, if any.
    pub fn find_edge(
        &self,
        source: &str,
        target: &str,
        edge_type: &str,
    ) -> Result<Option<GraphEdge>, GraphError> {
        let conn = self.conn.lock();
        let edge = conn
            .query_row(
                &format!(
                    "SELECT {EDGE_COLUMNS} FROM graph_edges
                     WHERE source = ?1 AND target = ?2 AND edge_type = ?3
                     ORDER BY rowid LIMIT 1"
                ),
                params![source, target, edge_type],
                edge_from_row,
            )
            .optional()?;
        Ok(edge)
    }

    /// Outgoing edges of `source`, in insertion order.
    pub fn edges_from(&self, source: &str) -> Result<Vec<GraphEdge>, GraphError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EDGE_COLUMNS} FROM graph_edges WHERE source = ?1 ORDER BY rowid"
        ))?;
        let edges = stmt
            .query_map([source], edge_from_row)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(edges)
    }

    /// Returns `false` when the edge did not exist.
    pub fn delete_edge(&self, id: &str) -> Result<bool, GraphError> {
        let conn = self.conn.lock();
        let edge_type: Option<String> = conn
            .query_row("SELECT edge_type FROM graph_edges WHERE id = ?1", [id], |r| r.get(0))
            .optional()?;
        let Some(edge_type) = edge_type else {
            return Ok(false);
        };
        conn.execute("DELETE FROM graph_edges WHERE id = ?1", [id])?;
        drop(conn);
        if edge_type == CAUSES {
            self.detector.lock().invalidate();
        }
        Ok(true)
    }

    // ── causal view ──────────────────────────────────────────────────────────

    /// Every `causes` edge as a [`CausalLink`].
    pub fn causal_links(&self) -> Result<Vec<CausalLink>, GraphError> {
        Ok(causal_links_in(&self.conn.lock())?)
    }

    /// `causes` edges grouped by cause, in first-seen order.
    pub fn causal_nodes(&self) -> Result<Vec<CausalNode>, GraphError> {
        let mut order: Vec<CausalNode> = Vec::new();
        let mut slot: HashMap<String, usize> = HashMap::new();
        for link in self.causal_links()? {
            for cause in &link.causes {
                let i = *slot.entry(cause.clone()).or_insert_with(|| {
                    order.push(CausalNode {
                        id: cause.clone(),
                        effects: Vec::new(),
                    });
                    order.len() - 1
                });
                order[i].effects.extend(link.effects.iter().cloned());
            }
        }
        Ok(order)
    }

    /// The loop that a new `cause → effect` edge would close, if any.
    pub fn would_create_cycle(&self, cause: &str, effect: &str) -> Result<Option<Vec<String>>, GraphError> {
        let links = self.causal_links()?;
        let candidate = CausalLink {
            id: String::new(),
            causes: vec![cause.to_string()],
            effects: vec![effect.to_string()],
        };
        Ok(self.detector.lock().find_cycle(&links, &candidate))
    }

    /// Run whole-chain loop detection over every `causes` edge.
    pub fn validate_causal_chain(&self, chain_id: &str) -> Result<Vec<CausalLoop>, GraphError> {
        let loops = causal::detect_loops(&self.causal_nodes()?, chain_id);
        if !loops.is_empty() {
            warn!(chain_id, loops = loops.len(), "causal chain contains loops");
        }
        Ok(loops)
    }

    // ── hyperedges ───────────────────────────────────────────────────────────

    pub fn create_hyperedge(&self, hyperedge: NewHyperedge) -> Result<String, GraphError> {
        self.insert_hyperedge(hyperedge, None, None)
    }

    /// Create a hyperedge that reports itself expired after `expires_at`.
    /// Expiry is evaluated at read time; nothing is deleted.
    pub fn create_temporal_hyperedge(
        &self,
        hyperedge: NewHyperedge,
        expires_at: DateTime<Utc>,
        granularity: TemporalGranularity,
    ) -> Result<String, GraphError> {
        self.insert_hyperedge(hyperedge, Some(expires_at), Some(granularity))
    }

    fn insert_hyperedge(
        &self,
        hyperedge: NewHyperedge,
        expires_at: Option<DateTime<Utc>>,
        granularity: Option<TemporalGranularity>,
    ) -> Result<String, GraphError> {
        if hyperedge.nodes.len() < 2 {
            return Err(GraphError::Validation(format!(
                "hyperedge requires at least 2 nodes, got {}",
                hyperedge.nodes.len()
            )));
        }
        if hyperedge.nodes.iter().any(|n| n.is_empty()) {
            return Err(GraphError::Validation("hyperedge node ids must not be empty".into()));
        }
        let unique: HashSet<&str> = hyperedge.nodes.iter().map(String::as_str).collect();
        if unique.len() != hyperedge.nodes.len() {
            return Err(GraphError::Validation("hyperedge nodes must be unique".into()));
        }
        if hyperedge.edge_type.trim().is_empty() {
            return Err(GraphError::Validation("hyperedge type must not be empty".into()));
        }

        let id = hyperedge.id.unwrap_or_else(new_id);
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let exists = tx
            .query_row("SELECT 1 FROM hyperedges WHERE id = ?1", [&id], |_| Ok(()))
            .optional()?
            .is_some();
        if exists {
            return Err(GraphError::Duplicate { kind: "hyperedge", id });
        }
        tx.execute(
            "INSERT INTO hyperedges (id, edge_type, metadata, created_at, expires_at, granularity)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                hyperedge.edge_type,
                serde_json::to_string(&object_or_empty(hyperedge.metadata))?,
                Utc::now().to_rfc3339(),
                expires_at.map(|t| t.to_rfc3339()),
                granularity.map(|g| g.as_str()),
            ],
        )?;
        {
            let mut member = tx.prepare(
                "INSERT INTO hyperedge_members (hyperedge_id, node_id, position) VALUES (?1, ?2, ?3)",
            )?;
            for (pos, node) in hyperedge.nodes.iter().enumerate() {
                member.execute(params![id, node, pos as i64])?;
            }
        }
        tx.commit()?;
        debug!(hyperedge_id = %id, members = hyperedge.nodes.len(), temporal = expires_at.is_some(), "hyperedge created");
        Ok(id)
    }

    pub fn get_hyperedge(&self, id: &str) -> Result<Option<Hyperedge>, GraphError> {
        let conn = self.conn.lock();
        let head = conn
            .query_row(
                &format!("SELECT {HYPEREDGE_COLUMNS} FROM hyperedges WHERE id = ?1"),
                [id],
                hyperedge_from_row,
            )
            .optional()?;
        let Some(head) = head else {
            return Ok(None);
        };
        let mut one = [head];
        load_members(&conn, &mut one)?;
        let [h] = one;
        Ok(Some(h))
    }

    /// Hyperedges containing `node_id`, expired ones included.
    pub fn get_hyperedges_by_node(&self, node_id: &str) -> Result<Vec<Hyperedge>, GraphError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {HYPEREDGE_COLUMNS} FROM hyperedges
             WHERE id IN (SELECT hyperedge_id FROM hyperedge_members WHERE node_id = ?1)
             ORDER BY rowid"
        ))?;
        let mut out: Vec<Hyperedge> = stmt
            .query_map([node_id], hyperedge_from_row)?
            .collect::<rusqlite::Result<_>>()?;
        load_members(&conn, &mut out)?;
        Ok(out)
    }

    /// Every hyperedge, expired ones included.
    pub fn get_all_hyperedges(&self) -> Result<Vec<Hyperedge>, GraphError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {HYPEREDGE_COLUMNS} FROM hyperedges ORDER BY rowid"
        ))?;
        let mut out: Vec<Hyperedge> = stmt
            .query_map([], hyperedge_from_row)?
            .collect::<rusqlite::Result<_>>()?;
        load_members(&conn, &mut out)?;
        Ok(out)
    }

    /// Resolve a hyperedge's members to nodes.  `None` for an unknown ID.
    pub fn expand_hyperedge(&self, id: &str) -> Result<Option<HyperedgeExpansion>, GraphError> {
        let Some(hyperedge) = self.get_hyperedge(id)? else {
            return Ok(None);
        };
        let mut nodes = Vec::new();
        let mut missing = Vec::new();
        for member in &hyperedge.nodes {
            match self.get_node(member)? {
                Some(n) => nodes.push(n),
                None => missing.push(member.clone()),
            }
        }
        Ok(Some(HyperedgeExpansion {
            hyperedge,
            nodes,
            missing,
        }))
    }

    /// Returns `false` when the hyperedge did not exist.
    pub fn delete_hyperedge(&self, id: &str) -> Result<bool, GraphError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM hyperedges WHERE id = ?1", [id])?;
        tx.execute("DELETE FROM hyperedge_members WHERE hyperedge_id = ?1", [id])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    // ── housekeeping ─────────────────────────────────────────────────────────

    pub fn stats(&self) -> Result<GraphStats, GraphError> {
        let conn = self.conn.lock();
        let count = |sql: &str| -> rusqlite::Result<usize> { conn.query_row(sql, [], |r| r.get(0)) };
        let node_count = count("SELECT COUNT(*) FROM graph_nodes")?;
        let edge_count = count("SELECT COUNT(*) FROM graph_edges")?;
        let hyperedge_count = count("SELECT COUNT(*) FROM hyperedges")?;
        let total_node_references = count("SELECT COUNT(*) FROM hyperedge_members")?;

        let now = Utc::now();
        let mut stmt = conn.prepare("SELECT expires_at FROM hyperedges WHERE expires_at IS NOT NULL")?;
        let mut temporal_count = 0;
        let mut expired_count = 0;
        for expires in stmt.query_map([], |r| r.get::<_, String>(0))? {
            let expires = parse_ts(0, &expires?)?;
            temporal_count += 1;
            if now > expires {
                expired_count += 1;
            }
        }
        Ok(GraphStats {
            node_count,
            edge_count,
            hyperedge_count,
            temporal_count,
            expired_count,
            total_node_references,
        })
    }

    /// Remove every node, edge and hyperedge.
    pub fn clear(&self) -> Result<(), GraphError> {
        self.conn.lock().execute_batch(
            "BEGIN;
             DELETE FROM hyperedge_members;
             DELETE FROM hyperedges;
             DELETE FROM graph_edges;
             DELETE FROM graph_nodes;
             COMMIT;",
        )?;
        self.detector.lock().invalidate();
        info!("graph store cleared");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn store() -> GraphStore {
        GraphStore::open_in_memory().unwrap()
    }

    fn node(g: &GraphStore, id: &str) -> String {
        g.create_node(NewNode::new("concept").with_id(id)).unwrap()
    }

    // ── nodes & edges ────────────────────────────────────────────────────────

    #[test]
    fn node_round_trip_with_embedding() {
        let g = store();
        let id = g
            .create_node(
                NewNode::new("episode")
                    .with_properties(json!({"namespace": "ops"}))
                    .with_embedding(vec![0.5, -1.25]),
            )
            .unwrap();
        let n = g.get_node(&id).unwrap().unwrap();
        assert_eq!(n.node_type, "episode");
        assert_eq!(n.properties["namespace"], "ops");
        assert_eq!(n.embedding, Some(vec![0.5, -1.25]));
        assert!(g.get_node("missing").unwrap().is_none());
    }

    #[test]
    fn duplicate_node_id_is_rejected() {
        let g = store();
        node(&g, "a");
        let err = g.create_node(NewNode::new("concept").with_id("a")).unwrap_err();
        assert!(matches!(err, GraphError::Duplicate { kind: "node", .. }));
    }

    #[test]
    fn link_to_creates_edges_atomically() {
        let g = store();
        node(&g, "a");
        let b = g.create_node(NewNode::new("concept").with_id("b").linked_to("a")).unwrap();
        let out = g.edges_from(&b).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].target, "a");
        assert_eq!(out[0].edge_type, LINKED_TO);

        let err = g
            .create_node(NewNode::new("concept").with_id("c").linked_to("ghost"))
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!g.has_node("c").unwrap());
    }

    #[test]
    fn edge_requires_existing_endpoints_and_type() {
        let g = store();
        node(&g, "a");
        assert!(g.create_edge(NewEdge::new("a", "zz", "rel")).unwrap_err().is_not_found());
        assert!(matches!(
            g.create_edge(NewEdge::new("a", "a", " ")),
            Err(GraphError::Validation(_))
        ));
    }

    #[test]
    fn causal_cycle_is_rejected_and_not_written() {
        let g = store();
        for id in ["a", "b", "c"] {
            node(&g, id);
        }
        g.create_edge(NewEdge::new("a", "b", CAUSES)).unwrap();
        g.create_edge(NewEdge::new("b", "c", CAUSES)).unwrap();
        let err = g.create_edge(NewEdge::new("c", "a", CAUSES)).unwrap_err();
        let GraphError::Cycle { path } = err else {
            panic!("expected cycle, got {err:?}");
        };
        for id in ["a", "b", "c"] {
            assert!(path.contains(&id.to_string()));
        }
        assert_eq!(g.stats().unwrap().edge_count, 2);

        // Non-causal edges may close loops freely.
        g.create_edge(NewEdge::new("c", "a", "related")).unwrap();
        // A forward causal shortcut is fine.
        g.create_edge(NewEdge::new("a", "c", CAUSES)).unwrap();
        assert!(g.validate_causal_chain("chain").unwrap().is_empty());
    }

    #[test]
    fn deleting_causal_edge_reopens_the_path() {
        let g = store();
        for id in ["a", "b"] {
            node(&g, id);
        }
        let ab = g.create_edge(NewEdge::new("a", "b", CAUSES)).unwrap();
        assert!(g.would_create_cycle("b", "a").unwrap().is_some());
        assert!(g.delete_edge(&ab).unwrap());
        assert!(g.would_create_cycle("b", "a").unwrap().is_none());
        g.create_edge(NewEdge::new("b", "a", CAUSES)).unwrap();
        assert!(!g.delete_edge(&ab).unwrap());
    }

    #[test]
    fn causal_nodes_group_effects_by_cause() {
        let g = store();
        for id in ["a", "b", "c"] {
            node(&g, id);
        }
        g.create_edge(NewEdge::new("a", "b", CAUSES)).unwrap();
        g.create_edge(NewEdge::new("a", "c", CAUSES)).unwrap();
        g.create_edge(NewEdge::new("b", "c", "related")).unwrap();
        let nodes = g.causal_nodes().unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id, "a");
        assert_eq!(nodes[0].effects, vec!["b", "c"]);
        assert_eq!(g.causal_links().unwrap().len(), 2);
    }

    #[test]
    fn query_nodes_filters() {
        let g = store();
        g.create_node(
            NewNode::new("memory")
                .with_id("task-1")
                .with_properties(json!({"namespace": "ops", "key": "alpha"})),
        )
        .unwrap();
        g.create_node(
            NewNode::new("memory")
                .with_id("task-2")
                .with_properties(json!({"namespace": "dev", "key": "beta"})),
        )
        .unwrap();
        g.create_node(NewNode::new("agent").with_id("worker")).unwrap();

        let by_ns = g
            .query_nodes(&NodeFilter {
                namespace: Some("ops".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_ns.len(), 1);
        assert_eq!(by_ns[0].id, "task-1");

        let by_key = g
            .query_nodes(&NodeFilter {
                key_pattern: Some("be*".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_key[0].id, "task-2");

        let by_id = g
            .query_nodes(&NodeFilter {
                key_pattern: Some("task-*".into()),
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_id.len(), 1);
        assert_eq!(by_id[0].id, "task-1");

        let by_class = g
            .query_nodes(&NodeFilter {
                key_pattern: Some("[ab]l*".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_class.len(), 1);
        assert_eq!(by_class[0].id, "task-1");

        let single = g
            .query_nodes(&NodeFilter {
                key_pattern: Some("task-?".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(single.len(), 2);

        let by_type = g
            .query_nodes(&NodeFilter {
                node_type: Some("agent".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_type.len(), 1);
    }

    #[test]
    fn key_pattern_escapes_and_rejects_malformed_globs() {
        let g = store();
        g.create_node(NewNode::new("memory").with_id("rate*limit")).unwrap();
        g.create_node(NewNode::new("memory").with_id("rate-limit")).unwrap();

        let literal = g
            .query_nodes(&NodeFilter {
                key_pattern: Some("rate[*]limit".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(literal.len(), 1);
        assert_eq!(literal[0].id, "rate*limit");

        let err = g
            .query_nodes(&NodeFilter {
                key_pattern: Some("rate[".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidPattern(_)));
        assert!(matches!(MnemosError::from(err), MnemosError::Validation(_)));
    }

    #[test]
    fn traverse_respects_depth_and_direction() {
        let g = store();
        for id in ["a", "b", "c", "d", "e"] {
            node(&g, id);
        }
        g.create_edge(NewEdge::new("a", "b", "rel")).unwrap();
        g.create_edge(NewEdge::new("b", "c", "rel")).unwrap();
        g.create_edge(NewEdge::new("d", "a", "rel")).unwrap();

        let one = g.traverse_hops("a", 1).unwrap();
        assert_eq!(one.node_ids, vec!["b", "d"]);
        assert_eq!(one.count, 2);

        let two = g.traverse_hops("a", 2).unwrap();
        assert_eq!(two.node_ids, vec!["b", "d", "c"]);

        assert!(g.traverse_hops("a", 0).unwrap().node_ids.is_empty());
        assert!(g.traverse_hops("e", 3).unwrap().node_ids.is_empty());
        assert!(g.traverse_hops("zz", 1).unwrap_err().is_not_found());
    }

    // ── hyperedges ───────────────────────────────────────────────────────────

    #[test]
    fn hyperedge_validation() {
        let g = store();
        assert!(matches!(
            g.create_hyperedge(NewHyperedge::new(["a"], "team")),
            Err(GraphError::Validation(_))
        ));
        assert!(matches!(
            g.create_hyperedge(NewHyperedge::new(["a", "a"], "team")),
            Err(GraphError::Validation(_))
        ));
        assert!(matches!(
            g.create_hyperedge(NewHyperedge::new(["a", "b"], "")),
            Err(GraphError::Validation(_))
        ));
        assert_eq!(g.stats().unwrap().hyperedge_count, 0);
    }

    #[test]
    fn hyperedge_lookup_and_expand() {
        let g = store();
        node(&g, "a");
        node(&g, "b");
        let h = g
            .create_hyperedge(NewHyperedge::new(["b", "a", "x"], "team").with_metadata(json!({"w": 1})))
            .unwrap();
        let got = g.get_hyperedge(&h).unwrap().unwrap();
        assert_eq!(got.nodes, vec!["b", "a", "x"]);
        assert_eq!(got.metadata["w"], 1);
        assert!(!got.is_temporal());

        assert_eq!(g.get_hyperedges_by_node("a").unwrap().len(), 1);
        assert!(g.get_hyperedges_by_node("q").unwrap().is_empty());

        let exp = g.expand_hyperedge(&h).unwrap().unwrap();
        assert_eq!(exp.nodes.len(), 2);
        assert_eq!(exp.missing, vec!["x"]);
        assert!(g.expand_hyperedge("nope").unwrap().is_none());
    }

    #[test]
    fn temporal_hyperedge_expiry_is_derived() {
        let g = store();
        let past = g
            .create_temporal_hyperedge(
                NewHyperedge::new(["a", "b"], "shift"),
                Utc::now() - Duration::hours(1),
                TemporalGranularity::Hour,
            )
            .unwrap();
        let future = g
            .create_temporal_hyperedge(
                NewHyperedge::new(["a", "c"], "shift"),
                Utc::now() + Duration::days(1),
                TemporalGranularity::Day,
            )
            .unwrap();
        let p = g.get_hyperedge(&past).unwrap().unwrap();
        assert!(p.is_expired());
        assert_eq!(p.granularity, Some(TemporalGranularity::Hour));
        assert!(!g.get_hyperedge(&future).unwrap().unwrap().is_expired());

        // Raw listings keep expired entries.
        assert_eq!(g.get_all_hyperedges().unwrap().len(), 2);
        let stats = g.stats().unwrap();
        assert_eq!(stats.temporal_count, 2);
        assert_eq!(stats.expired_count, 1);
        assert_eq!(stats.total_node_references, 4);
    }

    #[test]
    fn delete_node_cascades() {
        let g = store();
        for id in ["a", "b", "c"] {
            node(&g, id);
        }
        g.create_edge(NewEdge::new("a", "b", CAUSES)).unwrap();
        g.create_edge(NewEdge::new("c", "a", "rel")).unwrap();
        let pair = g.create_hyperedge(NewHyperedge::new(["a", "b"], "pair")).unwrap();
        let trio = g.create_hyperedge(NewHyperedge::new(["a", "b", "c"], "trio")).unwrap();

        assert!(g.delete_node("a").unwrap());
        assert!(!g.delete_node("a").unwrap());
        let stats = g.stats().unwrap();
        assert_eq!(stats.node_count, 2);
        assert_eq!(stats.edge_count, 0);
        assert!(g.get_hyperedge(&pair).unwrap().is_none());
        assert_eq!(g.get_hyperedge(&trio).unwrap().unwrap().nodes, vec!["b", "c"]);
        assert!(g.would_create_cycle("b", "a").unwrap().is_none());
    }

    #[test]
    fn delete_hyperedge_and_clear() {
        let g = store();
        node(&g, "a");
        let h = g.create_hyperedge(NewHyperedge::new(["a", "b"], "pair")).unwrap();
        assert!(g.delete_hyperedge(&h).unwrap());
        assert!(!g.delete_hyperedge(&h).unwrap());
        assert_eq!(g.stats().unwrap().total_node_references, 0);

        g.create_hyperedge(NewHyperedge::new(["a", "b"], "pair")).unwrap();
        g.clear().unwrap();
        assert_eq!(g.stats().unwrap(), GraphStats::default());
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.db");
        {
            let g = GraphStore::open(&path).unwrap();
            node(&g, "a");
            node(&g, "b");
            g.create_edge(NewEdge::new("a", "b", CAUSES)).unwrap();
        }
        let g = GraphStore::open(&path).unwrap();
        assert_eq!(g.stats().unwrap().edge_count, 1);
        assert!(g.create_edge(NewEdge::new("b", "a", CAUSES)).is_err());
    }
}
