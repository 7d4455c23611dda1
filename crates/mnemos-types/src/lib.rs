//! `mnemos-types` – the shared data model of the Mnemos knowledge substrate.
//!
//! Every crate in the workspace speaks in these types: episodes recorded by
//! agents, the property-graph entities they are mirrored into, hyperedges
//! grouping several nodes, and the causal views used by loop detection.
//! [`MnemosError`] is the error taxonomy surfaced at the service boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Milliseconds since the Unix epoch. Episode time ranges use this unit.
pub type Timestamp = i64;

/// Edge / hyperedge type reserved for causal relationships. The graph must
/// never contain a cycle among edges of this type.
pub const CAUSES: &str = "causes";

/// Node type used when an episode is mirrored into the graph.
pub const EPISODE_NODE_TYPE: &str = "episode";

/// Generate a fresh random identifier.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Episode
// ─────────────────────────────────────────────────────────────────────────────

/// A recorded unit of agent task execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub id: String,
    /// Task this episode belongs to.
    pub task_id: String,
    pub start_time: Timestamp,
    /// `None` while the task is still running.
    pub end_time: Option<Timestamp>,
    /// Fixed-dimension, L2-normalised embedding.
    pub embedding: Vec<f32>,
    /// Opaque caller metadata.
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub linked_episodes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Episode {
    /// True while the episode has no recorded end time.
    pub fn is_ongoing(&self) -> bool {
        self.end_time.is_none()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Graph entities
// ─────────────────────────────────────────────────────────────────────────────

/// A typed node of the property graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub properties: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

/// A typed, directed edge between two graph nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub edge_type: String,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// Resolution at which a temporal hyperedge is meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemporalGranularity {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl TemporalGranularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemporalGranularity::Second => "second",
            TemporalGranularity::Minute => "minute",
            TemporalGranularity::Hour => "hour",
            TemporalGranularity::Day => "day",
            TemporalGranularity::Week => "week",
            TemporalGranularity::Month => "month",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "second" => Some(TemporalGranularity::Second),
            "minute" => Some(TemporalGranularity::Minute),
            "hour" => Some(TemporalGranularity::Hour),
            "day" => Some(TemporalGranularity::Day),
            "week" => Some(TemporalGranularity::Week),
            "month" => Some(TemporalGranularity::Month),
            _ => None,
        }
    }
}

/// An n-ary relationship between two or more distinct graph nodes.
///
/// When `expires_at` is set the hyperedge is *temporal*. Expiry is derived at
/// read time through [`Hyperedge::is_expired`]; expired entries are never
/// removed by expiry alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hyperedge {
    pub id: String,
    pub nodes: Vec<String>,
    #[serde(rename = "type")]
    pub edge_type: String,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granularity: Option<TemporalGranularity>,
}

impl Hyperedge {
    /// True when this hyperedge carries an expiry.
    pub fn is_temporal(&self) -> bool {
        self.expires_at.is_some()
    }

    /// True when `now` is past the expiry.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(exp) if now > exp)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Causal views
// ─────────────────────────────────────────────────────────────────────────────

/// A causal relationship with one or more causes and one or more effects.
///
/// Adding the link asserts `cause → effect` for every pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CausalLink {
    pub id: String,
    pub causes: Vec<String>,
    pub effects: Vec<String>,
}

/// A node in a causal chain together with the nodes it directly causes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CausalNode {
    pub id: String,
    pub effects: Vec<String>,
}

/// A loop found while validating a causal chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CausalLoop {
    pub id: String,
    /// The cycle, starting at the node the back-edge points to.
    pub nodes: Vec<String>,
    pub chain_id: String,
    pub timestamp: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Error taxonomy
// ─────────────────────────────────────────────────────────────────────────────

/// Errors surfaced to the service boundary.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MnemosError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Causal cycle rejected: {}", .path.join(" -> "))]
    CycleViolation { path: Vec<String> },

    #[error("Transaction failed: {0}")]
    Transaction(String),

    #[error("Vector backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl MnemosError {
    pub fn not_found(kind: &str, id: &str) -> Self {
        MnemosError::NotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }

    /// True for the recoverable "missing entity" case that services turn
    /// into `found: false`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, MnemosError::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn hyperedge(expires_at: Option<DateTime<Utc>>) -> Hyperedge {
        Hyperedge {
            id: new_id(),
            nodes: vec!["a".into(), "b".into()],
            edge_type: "collaboration".into(),
            metadata: Value::Null,
            created_at: Utc::now(),
            expires_at,
            granularity: expires_at.map(|_| TemporalGranularity::Hour),
        }
    }

    #[test]
    fn hyperedge_without_expiry_never_expires() {
        let h = hyperedge(None);
        assert!(!h.is_temporal());
        assert!(!h.is_expired());
    }

    #[test]
    fn hyperedge_past_expiry_is_expired() {
        let h = hyperedge(Some(Utc::now() - Duration::seconds(5)));
        assert!(h.is_temporal());
        assert!(h.is_expired());
    }

    #[test]
    fn hyperedge_future_expiry_is_live() {
        let h = hyperedge(Some(Utc::now() + Duration::hours(1)));
        assert!(!h.is_expired());
    }

    #[test]
    fn episode_serializes_with_camel_case_fields() {
        let ep = Episode {
            id: "e1".into(),
            task_id: "t1".into(),
            start_time: 1000,
            end_time: None,
            embedding: vec![1.0, 0.0],
            metadata: serde_json::json!({"agent": "coder"}),
            linked_episodes: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_value(&ep).unwrap();
        assert_eq!(json["taskId"], "t1");
        assert_eq!(json["startTime"], 1000);
        assert!(json["endTime"].is_null());
        assert!(ep.is_ongoing());
    }

    #[test]
    fn graph_node_type_field_is_renamed() {
        let node = GraphNode {
            id: "n1".into(),
            node_type: "agent".into(),
            properties: Value::Null,
            embedding: None,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "agent");
        assert!(json.get("embedding").is_none());
    }

    #[test]
    fn granularity_parse_matches_as_str() {
        for g in [
            TemporalGranularity::Second,
            TemporalGranularity::Minute,
            TemporalGranularity::Hour,
            TemporalGranularity::Day,
            TemporalGranularity::Week,
            TemporalGranularity::Month,
        ] {
            assert_eq!(TemporalGranularity::parse(g.as_str()), Some(g));
        }
        assert_eq!(TemporalGranularity::parse("fortnight"), None);
    }

    #[test]
    fn mnemos_error_display() {
        let err = MnemosError::not_found("episode", "abc");
        assert!(err.is_not_found());
        assert!(err.to_string().contains("abc"));

        let cyc = MnemosError::CycleViolation {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(cyc.to_string(), "Causal cycle rejected: a -> b -> a");
    }
}
