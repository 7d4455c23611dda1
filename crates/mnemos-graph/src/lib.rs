//! `mnemos-graph` – the relationship layer.
//!
//! # Modules
//!
//! - [`store`] – [`GraphStore`][store::GraphStore]: typed nodes, directed
//!   edges and n-ary (optionally time-bounded) hyperedges persisted to
//!   SQLite.
//! - [`cycle`] – [`ReachabilityDetector`][cycle::ReachabilityDetector]:
//!   memoised BFS that guards every new `causes` link against closing a loop.
//! - [`causal`] – white/gray/black DFS over a batch of
//!   [`CausalNode`][mnemos_types::CausalNode]s, reporting every loop found.

pub mod causal;
pub mod cycle;
pub mod store;

pub use cycle::ReachabilityDetector;
pub use store::{
    GraphError, GraphStats, GraphStore, HyperedgeExpansion, LINKED_TO, NewEdge, NewHyperedge,
    NewNode, NodeFilter, Traversal,
};
