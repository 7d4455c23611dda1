//! Reachability guard for new causal links.
//!
//! Adding a link with causes `C` and effects `E` closes a loop iff some
//! effect `e ∈ E` already reaches some cause `c ∈ C`.  Each `e → c` question
//! is answered by BFS over a forward index (`node → link → effects`) that is
//! rebuilt per call from the links passed in.  Answers are memoised in an
//! LRU keyed `"source->target"`; the memo outlives the call, so the owner
//! must call [`ReachabilityDetector::invalidate`] whenever the link set
//! changes.

use std::collections::{HashMap, HashSet, VecDeque};

use mnemos_index::LruCache;
use mnemos_types::CausalLink;
use tracing::debug;

/// Default number of memoised path answers.
pub const DEFAULT_PATH_CACHE: usize = 4096;

/// Forward index over a link set.
struct ForwardIndex<'a> {
    links: &'a [CausalLink],
    outgoing: HashMap<&'a str, Vec<usize>>,
}

impl<'a> ForwardIndex<'a> {
    fn build(links: &'a [CausalLink]) -> Self {
        let mut outgoing: HashMap<&'a str, Vec<usize>> = HashMap::new();
        for (i, link) in links.iter().enumerate() {
            for cause in &link.causes {
                outgoing.entry(cause.as_str()).or_default().push(i);
            }
        }
        Self { links, outgoing }
    }

    fn successors(&self, node: &str) -> impl Iterator<Item = &'a str> + '_ {
        let links = self.links;
        self.outgoing
            .get(node)
            .into_iter()
            .flatten()
            .flat_map(move |&i| links[i].effects.iter().map(String::as_str))
    }

    /// Shortest path `source → … → target`, if any.
    fn path(&self, source: &str, target: &str) -> Option<Vec<String>> {
        if source == target {
            return Some(vec![source.to_string()]);
        }
        let mut parent: HashMap<&str, &str> = HashMap::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        seen.insert(source);
        queue.push_back(source);
        while let Some(node) = queue.pop_front() {
            for next in self.successors(node) {
                if !seen.insert(next) {
                    continue;
                }
                parent.insert(next, node);
                if next == target {
                    let mut path = vec![next.to_string()];
                    let mut cur = next;
                    while let Some(&p) = parent.get(cur) {
                        path.push(p.to_string());
                        cur = p;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }
        None
    }
}

/// Memoised BFS cycle guard.
pub struct ReachabilityDetector {
    memo: LruCache<String, bool>,
}

impl Default for ReachabilityDetector {
    fn default() -> Self {
        Self::new(DEFAULT_PATH_CACHE)
    }
}

impl ReachabilityDetector {
    pub fn new(cache_capacity: usize) -> Self {
        Self {
            memo: LruCache::new(cache_capacity),
        }
    }

    /// Whether `target` is reachable from `source` through `links`.
    pub fn has_path(&mut self, links: &[CausalLink], source: &str, target: &str) -> bool {
        let key = format!("{source}->{target}");
        if let Some(&hit) = self.memo.get(&key) {
            return hit;
        }
        let reachable = ForwardIndex::build(links).path(source, target).is_some();
        self.memo.set(key, reachable);
        reachable
    }

    /// Whether adding `new_link` to `links` would close a loop.
    pub fn would_create_cycle(&mut self, links: &[CausalLink], new_link: &CausalLink) -> bool {
        for effect in &new_link.effects {
            for cause in &new_link.causes {
                if self.has_path(links, effect, cause) {
                    return true;
                }
            }
        }
        false
    }

    /// The loop `cause → effect → … → cause` that `new_link` would close,
    /// or `None` when the link is safe.
    pub fn find_cycle(&mut self, links: &[CausalLink], new_link: &CausalLink) -> Option<Vec<String>> {
        if !self.would_create_cycle(links, new_link) {
            return None;
        }
        let index = ForwardIndex::build(links);
        for effect in &new_link.effects {
            for cause in &new_link.causes {
                if let Some(tail) = index.path(effect, cause) {
                    let mut path = vec![cause.clone()];
                    path.extend(tail);
                    debug!(link = %new_link.id, path = ?path, "causal link would close a loop");
                    return Some(path);
                }
            }
        }
        None
    }

    /// Drop every memoised answer.
    pub fn invalidate(&mut self) {
        self.memo.clear();
    }

    pub fn cached_paths(&self) -> usize {
        self.memo.len()
    }
}
