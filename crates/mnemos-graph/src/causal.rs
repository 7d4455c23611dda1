//! Whole-chain causal loop detection.
//!
//! Classic three-colour depth-first search over a batch of
//! [`CausalNode`]s.  Every back edge closes a loop, which is reported as the
//! slice of the current DFS path from the revisited node to the tip.  The
//! walk is iterative, so chain length is bounded by memory rather than by
//! the thread stack.
//!
//! Effects that name a node absent from the batch are treated as leaves.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Utc;
use mnemos_types::{CausalLoop, CausalNode, new_id};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Colour {
    Gray,
    Black,
}

/// Report every loop reachable in `nodes`, tagged with `chain_id`.
pub fn detect_loops(nodes: &[CausalNode], chain_id: &str) -> Vec<CausalLoop> {
    let adjacency: HashMap<&str, &[String]> = nodes
        .iter()
        .map(|n| (n.id.as_str(), n.effects.as_slice()))
        .collect();
    let mut colour: HashMap<&str, Colour> = HashMap::new();
    let mut loops = Vec::new();

    for root in nodes {
        if colour.contains_key(root.id.as_str()) {
            continue;
        }
        colour.insert(root.id.as_str(), Colour::Gray);
        let mut path: Vec<&str> = vec![root.id.as_str()];
        let mut cursor: Vec<usize> = vec![0];

        while let Some(&node) = path.last() {
            let Some(next_effect) = cursor.last_mut() else {
                break;
            };
            let effects = adjacency.get(node).copied().unwrap_or(&[]);
            if *next_effect >= effects.len() {
                colour.insert(node, Colour::Black);
                path.pop();
                cursor.pop();
                continue;
            }
            let next = effects[*next_effect].as_str();
            *next_effect += 1;
            match colour.get(next) {
                None => {
                    colour.insert(next, Colour::Gray);
                    path.push(next);
                    cursor.push(0);
                }
                Some(Colour::Gray) => {
                    let start = path.iter().position(|n| *n == next).unwrap_or(0);
                    loops.push(CausalLoop {
                        id: new_id(),
                        nodes: path[start..].iter().map(|n| n.to_string()).collect(),
                        chain_id: chain_id.to_string(),
                        timestamp: Utc::now(),
                    });
                }
                Some(Colour::Black) => {}
            }
        }
    }
    loops
}

/// True when adding `from → to` would close a loop, i.e. `from` is already
/// reachable from `to`.
pub fn would_create_cycle(from: &str, to: &str, nodes: &[CausalNode]) -> bool {
    if from == to {
        return true;
    }
    let adjacency: HashMap<&str, &[String]> = nodes
        .iter()
        .map(|n| (n.id.as_str(), n.effects.as_slice()))
        .collect();
    let mut seen: HashSet<&str> = HashSet::from([to]);
    let mut queue: VecDeque<&str> = VecDeque::from([to]);
    while let Some(node) = queue.pop_front() {
        for effect in adjacency.get(node).copied().unwrap_or(&[]) {
            if effect == from {
                return true;
            }
            if seen.insert(effect.as_str()) {
                queue.push_back(effect.as_str());
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, effects: &[&str]) -> CausalNode {
        CausalNode {
            id: id.to_string(),
            effects: effects.iter().map(|e| e.to_string()).collect(),
        }
    }

    #[test]
    fn dag_has_no_loops() {
        let chain = vec![node("a", &["b", "c"]), node("b", &["c"]), node("c", &[])];
        assert!(detect_loops(&chain, "chain-1").is_empty());
    }

    #[test]
    fn three_cycle_is_reported_once() {
        let chain = vec![node("a", &["b"]), node("b", &["c"]), node("c", &["a"])];
        let loops = detect_loops(&chain, "chain-1");
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].nodes, vec!["a", "b", "c"]);
        assert_eq!(loops[0].chain_id, "chain-1");
    }

    #[test]
    fn self_loop_is_a_loop() {
        let loops = detect_loops(&[node("a", &["a"])], "c");
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].nodes, vec!["a"]);
    }

    #[test]
    fn loop_slice_excludes_entry_prefix() {
        let chain = vec![node("x", &["a"]), node("a", &["b"]), node("b", &["a"])];
        let loops = detect_loops(&chain, "c");
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].nodes, vec!["a", "b"]);
    }

    #[test]
    fn dangling_effects_are_leaves() {
        let chain = vec![node("a", &["ghost"])];
        assert!(detect_loops(&chain, "c").is_empty());
    }

    #[test]
    fn incremental_check_on_dag() {
        let chain = vec![node("a", &["b"]), node("b", &["c"]), node("c", &[])];
        assert!(would_create_cycle("c", "a", &chain));
        assert!(!would_create_cycle("a", "c", &chain));
        assert!(would_create_cycle("a", "a", &chain));
    }

    #[test]
    fn long_chain_does_not_overflow() {
        let n = 50_000;
        let mut chain: Vec<CausalNode> = (0..n)
            .map(|i| node(&format!("n{i}"), &[format!("n{}", i + 1).as_str()]))
            .collect();
        chain.push(node(&format!("n{n}"), &["n0"]));
        let loops = detect_loops(&chain, "long");
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].nodes.len(), n + 1);
    }
}
