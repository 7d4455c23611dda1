//! Temporal B+ Tree.
//!
//! [`TimeIndex`] maps millisecond timestamps to ordered lists of episode IDs
//! (duplicates allowed).  It answers point lookups and inclusive ascending
//! range scans, and persists as a single JSON document.
//!
//! # Layout
//!
//! Nodes live in an arena (`Vec<Node>`) and refer to each other by index.
//! Every node keeps its `keys` sorted ascending.  Leaves carry a parallel
//! `values` list and `prev`/`next` sibling links, so a range scan descends
//! once and then walks the leaf chain.  Internal nodes carry
//! `keys.len() + 1` children; child `i + 1` holds keys `>= keys[i]`.
//!
//! Removal is lazy: an emptied key is dropped from its leaf but nodes are
//! never merged, which keeps every ordering invariant intact.
//!
//! # Persistence
//!
//! The persisted unit is `{order, height, size, root}` where `root` is the
//! recursive `{isLeaf, keys, values?, children?}` structure.  Sibling links
//! are not stored; [`TimeIndex::from_document`] rebuilds them by threading
//! the leaves in the order a left-to-right walk meets them.
//!
//! # Example
//!
//! ```rust
//! use mnemos_index::time_index::TimeIndex;
//!
//! let mut idx = TimeIndex::new(4);
//! idx.insert(2000, "e2");
//! idx.insert(1000, "e1");
//! idx.insert(3000, "e3");
//!
//! let hits: Vec<_> = idx.range(1500, 3000).into_iter().map(|(_, id)| id).collect();
//! assert_eq!(hits, vec!["e2", "e3"]);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::persist::{self, PersistError, RetryPolicy};

/// Default maximum fan-out of an internal node.
pub const DEFAULT_ORDER: usize = 32;

/// Smallest order that still allows a split to leave both halves non-empty.
pub const MIN_ORDER: usize = 3;

/// Restored trees deeper than this are rejected outright.
const MAX_RESTORE_DEPTH: usize = 64;

type NodeId = usize;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised while persisting or restoring a [`TimeIndex`].
#[derive(Error, Debug)]
pub enum TimeIndexError {
    #[error("time index I/O: {0}")]
    Persist(#[from] PersistError),
    #[error("time index encoding: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("corrupt time index document: {0}")]
    Corrupt(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Persisted document
// ─────────────────────────────────────────────────────────────────────────────

/// One node of the persisted tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedNode {
    pub is_leaf: bool,
    pub keys: Vec<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<PersistedNode>>,
}

/// The whole-tree persistence unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeIndexDocument {
    pub order: usize,
    pub height: usize,
    pub size: usize,
    pub root: PersistedNode,
}

// ─────────────────────────────────────────────────────────────────────────────
// Stats
// ─────────────────────────────────────────────────────────────────────────────

/// Shape summary used for health monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeStats {
    pub order: usize,
    pub height: usize,
    pub size: usize,
    pub leaf_count: usize,
    pub internal_count: usize,
    pub total_keys: usize,
    pub total_nodes: usize,
    pub avg_keys_per_node: f64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Node
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Node {
    is_leaf: bool,
    keys: Vec<i64>,
    values: Vec<Vec<String>>,
    children: Vec<NodeId>,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

impl Node {
    fn leaf() -> Self {
        Self {
            is_leaf: true,
            keys: Vec::new(),
            values: Vec::new(),
            children: Vec::new(),
            prev: None,
            next: None,
        }
    }

    fn internal(keys: Vec<i64>, children: Vec<NodeId>) -> Self {
        Self {
            is_leaf: false,
            keys,
            values: Vec::new(),
            children,
            prev: None,
            next: None,
        }
    }
}

/// Binary lower-bound: index of the first key `>= key`.
fn find_key_index(keys: &[i64], key: i64) -> usize {
    keys.partition_point(|k| *k < key)
}

// ─────────────────────────────────────────────────────────────────────────────
// TimeIndex
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered index from timestamp to episode-ID lists.
#[derive(Debug, Clone)]
pub struct TimeIndex {
    order: usize,
    nodes: Vec<Node>,
    root: NodeId,
    height: usize,
    size: usize,
}

impl Default for TimeIndex {
    fn default() -> Self {
        Self::new(DEFAULT_ORDER)
    }
}

impl TimeIndex {
    /// Create an empty tree.  `order` is the maximum number of children of
    /// an internal node and is raised to [`MIN_ORDER`] if smaller.
    pub fn new(order: usize) -> Self {
        Self {
            order: order.max(MIN_ORDER),
            nodes: vec![Node::leaf()],
            root: 0,
            height: 1,
            size: 0,
        }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of `(timestamp, id)` entries.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Add `id` under `timestamp`.  Existing IDs at the same timestamp are
    /// kept; the new one is appended.
    pub fn insert(&mut self, timestamp: i64, id: impl Into<String>) {
        let id = id.into();
        if let Some((separator, right)) = self.insert_into(self.root, timestamp, id) {
            let new_root = self.alloc(Node::internal(vec![separator], vec![self.root, right]));
            self.root = new_root;
            self.height += 1;
        }
        self.size += 1;
    }

    /// Remove one occurrence of `id` under `timestamp`.  Returns `false`
    /// when it was not present.
    pub fn remove(&mut self, timestamp: i64, id: &str) -> bool {
        let leaf = self.find_leaf_node(timestamp);
        let node = &mut self.nodes[leaf];
        let Ok(i) = node.keys.binary_search(&timestamp) else {
            return false;
        };
        let Some(pos) = node.values[i].iter().position(|v| v == id) else {
            return false;
        };
        node.values[i].remove(pos);
        if node.values[i].is_empty() {
            node.keys.remove(i);
            node.values.remove(i);
        }
        self.size -= 1;
        true
    }

    /// IDs stored under exactly `timestamp`, in insertion order.
    pub fn get(&self, timestamp: i64) -> &[String] {
        let node = &self.nodes[self.find_leaf_node(timestamp)];
        match node.keys.binary_search(&timestamp) {
            Ok(i) => &node.values[i],
            Err(_) => &[],
        }
    }

    /// All entries with `start <= timestamp <= end`, ascending by timestamp.
    pub fn range(&self, start: i64, end: i64) -> Vec<(i64, String)> {
        let mut out = Vec::new();
        if start > end {
            return out;
        }
        let mut cursor = Some(self.find_leaf_node(start));
        let mut first = true;
        while let Some(leaf) = cursor {
            let node = &self.nodes[leaf];
            let from = if first { find_key_index(&node.keys, start) } else { 0 };
            first = false;
            for i in from..node.keys.len() {
                if node.keys[i] > end {
                    return out;
                }
                out.extend(node.values[i].iter().map(|id| (node.keys[i], id.clone())));
            }
            cursor = node.next;
        }
        out
    }

    /// Every entry in key order, walking the leaf chain.
    pub fn iter(&self) -> impl Iterator<Item = (i64, &str)> + '_ {
        let mut leaves = Vec::new();
        let mut cursor = Some(self.leftmost_leaf());
        while let Some(leaf) = cursor {
            leaves.push(leaf);
            cursor = self.nodes[leaf].next;
        }
        leaves.into_iter().flat_map(move |leaf| {
            let node = &self.nodes[leaf];
            node.keys
                .iter()
                .zip(&node.values)
                .flat_map(|(k, ids)| ids.iter().map(move |id| (*k, id.as_str())))
        })
    }

    /// Drop every entry, keeping the configured order.
    pub fn clear(&mut self) {
        *self = Self::new(self.order);
    }

    /// Compute shape statistics with a recursive visitor.
    pub fn stats(&self) -> TreeStats {
        #[derive(Default)]
        struct Acc {
            leaf_count: usize,
            internal_count: usize,
            total_keys: usize,
            total_nodes: usize,
        }

        fn visit(tree: &TimeIndex, id: NodeId, acc: &mut Acc) {
            let node = &tree.nodes[id];
            acc.total_nodes += 1;
            acc.total_keys += node.keys.len();
            if node.is_leaf {
                acc.leaf_count += 1;
            } else {
                acc.internal_count += 1;
                for &child in &node.children {
                    visit(tree, child, acc);
                }
            }
        }

        let mut acc = Acc::default();
        visit(self, self.root, &mut acc);
        TreeStats {
            order: self.order,
            height: self.height,
            size: self.size,
            leaf_count: acc.leaf_count,
            internal_count: acc.internal_count,
            total_keys: acc.total_keys,
            total_nodes: acc.total_nodes,
            avg_keys_per_node: if acc.total_nodes == 0 {
                0.0
            } else {
                acc.total_keys as f64 / acc.total_nodes as f64
            },
        }
    }

    // ── persistence ──────────────────────────────────────────────────────────

    /// Snapshot the tree as a plain nested document.
    pub fn to_document(&self) -> TimeIndexDocument {
        TimeIndexDocument {
            order: self.order,
            height: self.height,
            size: self.size,
            root: self.serialize_node(self.root),
        }
    }

    /// Rebuild a tree from a document, validating its shape.
    pub fn from_document(doc: &TimeIndexDocument) -> Result<Self, TimeIndexError> {
        if doc.order < MIN_ORDER {
            return Err(TimeIndexError::Corrupt(format!("order {} below minimum", doc.order)));
        }
        if doc.height == 0 || doc.height > MAX_RESTORE_DEPTH {
            return Err(TimeIndexError::Corrupt(format!("implausible height {}", doc.height)));
        }
        let mut tree = Self {
            order: doc.order,
            nodes: Vec::new(),
            root: 0,
            height: doc.height,
            size: 0,
        };
        let mut last_leaf = None;
        let mut last_key = None;
        let mut size = 0;
        tree.root = tree.deserialize_node(
            &doc.root,
            1,
            &mut last_leaf,
            &mut last_key,
            &mut size,
        )?;
        if size != doc.size {
            return Err(TimeIndexError::Corrupt(format!(
                "declared size {} but leaves hold {}",
                doc.size, size
            )));
        }
        tree.size = size;
        Ok(tree)
    }

    /// Write the tree to `path` as JSON.
    pub fn persist_index(&self, path: &Path, policy: &RetryPolicy) -> Result<(), TimeIndexError> {
        let bytes = serde_json::to_vec(&self.to_document())?;
        persist::write_atomic(path, &bytes, policy)?;
        debug!(path = %path.display(), entries = self.size, "time index persisted");
        Ok(())
    }

    /// Load a tree previously written by [`persist_index`][Self::persist_index].
    pub fn restore_index(path: &Path, policy: &RetryPolicy) -> Result<Self, TimeIndexError> {
        let bytes = persist::read_with_retry(path, policy)?;
        let doc: TimeIndexDocument = serde_json::from_slice(&bytes)?;
        let tree = Self::from_document(&doc)?;
        debug!(path = %path.display(), entries = tree.size, "time index restored");
        Ok(tree)
    }

    // ── internals ────────────────────────────────────────────────────────────

    fn alloc(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Child to descend into for `key`: lower bound, moved one right when the
    /// key equals a separator, clamped to the last child.
    fn child_index(node: &Node, key: i64) -> usize {
        let mut i = find_key_index(&node.keys, key);
        if i < node.keys.len() && node.keys[i] == key {
            i += 1;
        }
        i.min(node.children.len().saturating_sub(1))
    }

    fn find_leaf_node(&self, key: i64) -> NodeId {
        let mut id = self.root;
        while !self.nodes[id].is_leaf {
            let node = &self.nodes[id];
            id = node.children[Self::child_index(node, key)];
        }
        id
    }

    fn leftmost_leaf(&self) -> NodeId {
        let mut id = self.root;
        while !self.nodes[id].is_leaf {
            id = self.nodes[id].children[0];
        }
        id
    }

    /// Insert below `id`; returns the separator and new right sibling when
    /// `id` split.
    fn insert_into(&mut self, id: NodeId, key: i64, value: String) -> Option<(i64, NodeId)> {
        if self.nodes[id].is_leaf {
            let node = &mut self.nodes[id];
            match node.keys.binary_search(&key) {
                Ok(i) => node.values[i].push(value),
                Err(i) => {
                    node.keys.insert(i, key);
                    node.values.insert(i, vec![value]);
                }
            }
            if node.keys.len() >= self.order {
                return Some(self.split_leaf(id));
            }
            return None;
        }

        let ci = Self::child_index(&self.nodes[id], key);
        let child = self.nodes[id].children[ci];
        let (separator, right) = self.insert_into(child, key, value)?;
        let node = &mut self.nodes[id];
        node.keys.insert(ci, separator);
        node.children.insert(ci + 1, right);
        if node.keys.len() >= self.order {
            return Some(self.split_internal(id));
        }
        None
    }

    fn split_leaf(&mut self, id: NodeId) -> (i64, NodeId) {
        let mid = self.nodes[id].keys.len() / 2;
        let old_next = self.nodes[id].next;
        let mut right = Node::leaf();
        right.keys = self.nodes[id].keys.split_off(mid);
        right.values = self.nodes[id].values.split_off(mid);
        right.prev = Some(id);
        right.next = old_next;
        let separator = right.keys[0];
        let right_id = self.alloc(right);
        if let Some(n) = old_next {
            self.nodes[n].prev = Some(right_id);
        }
        self.nodes[id].next = Some(right_id);
        (separator, right_id)
    }

    fn split_internal(&mut self, id: NodeId) -> (i64, NodeId) {
        let mid = self.nodes[id].keys.len() / 2;
        let node = &mut self.nodes[id];
        let right_keys = node.keys.split_off(mid + 1);
        let separator = node.keys.pop().unwrap_or_default();
        let right_children = node.children.split_off(mid + 1);
        let right_id = self.alloc(Node::internal(right_keys, right_children));
        (separator, right_id)
    }

    fn serialize_node(&self, id: NodeId) -> PersistedNode {
        let node = &self.nodes[id];
        if node.is_leaf {
            PersistedNode {
                is_leaf: true,
                keys: node.keys.clone(),
                values: Some(node.values.clone()),
                children: None,
            }
        } else {
            PersistedNode {
                is_leaf: false,
                keys: node.keys.clone(),
                values: None,
                children: Some(node.children.iter().map(|&c| self.serialize_node(c)).collect()),
            }
        }
    }

    fn deserialize_node(
        &mut self,
        src: &PersistedNode,
        depth: usize,
        last_leaf: &mut Option<NodeId>,
        last_key: &mut Option<i64>,
        size: &mut usize,
    ) -> Result<NodeId, TimeIndexError> {
        if depth > self.height {
            return Err(TimeIndexError::Corrupt(format!(
                "node at depth {depth} exceeds declared height {}",
                self.height
            )));
        }
        if src.keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err(TimeIndexError::Corrupt("keys not strictly ascending".into()));
        }
        if src.keys.len() >= self.order {
            return Err(TimeIndexError::Corrupt(format!(
                "node holds {} keys with order {}",
                src.keys.len(),
                self.order
            )));
        }

        if src.is_leaf {
            if depth != self.height {
                return Err(TimeIndexError::Corrupt(format!(
                    "leaf at depth {depth}, expected {}",
                    self.height
                )));
            }
            let values = src.values.clone().unwrap_or_default();
            if values.len() != src.keys.len() {
                return Err(TimeIndexError::Corrupt("leaf values/keys length mismatch".into()));
            }
            if let (Some(prev), Some(first)) = (*last_key, src.keys.first())
                && prev >= *first
            {
                return Err(TimeIndexError::Corrupt("leaf chain out of order".into()));
            }
            let mut node = Node::leaf();
            node.keys = src.keys.clone();
            node.values = values;
            node.prev = *last_leaf;
            *size += node.values.iter().map(Vec::len).sum::<usize>();
            let id = self.alloc(node);
            if let Some(prev) = *last_leaf {
                self.nodes[prev].next = Some(id);
            }
            *last_leaf = Some(id);
            if let Some(k) = src.keys.last() {
                *last_key = Some(*k);
            }
            return Ok(id);
        }

        let children = src.children.as_deref().unwrap_or_default();
        if children.len() != src.keys.len() + 1 {
            return Err(TimeIndexError::Corrupt(format!(
                "internal node has {} keys but {} children",
                src.keys.len(),
                children.len()
            )));
        }
        let mut child_ids = Vec::with_capacity(children.len());
        for child in children {
            child_ids.push(self.deserialize_node(child, depth + 1, last_leaf, last_key, size)?);
        }
        Ok(self.alloc(Node::internal(src.keys.clone(), child_ids)))
    }
}
