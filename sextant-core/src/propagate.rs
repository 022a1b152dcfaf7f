//! Eliminated transitive closure.
//!
//! Starting from a seed set, follow a one-hop relation breadth first and keep
//! only the nodes where propagation stops. Intermediate nodes are dropped from
//! the result: once a value has moved one hop further it is the later node that
//! matters.
//!
//! The relation is supplied as a batched query over the whole frontier, so a
//! storage-backed caller issues one query per hop instead of one per node.
//!
//! ```
//! use sextant_core::propagate::Propagation;
//!
//! // a -> b -> c
//! let edges = [("a", "b"), ("b", "c")];
//! let leaves = Propagation::new(["a"])
//!     .run(|frontier: &[&str]| {
//!         Ok::<_, ()>(
//!             frontier
//!                 .iter()
//!                 .map(|k| (*k, edges.iter().find(|(f, _)| f == k).map(|(_, t)| *t)))
//!                 .collect(),
//!         )
//!     })
//!     .unwrap();
//! assert_eq!(leaves, vec!["c"]);
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::hash::Hash;

/// Admission predicate accepting every successor.
pub fn admit_all<K>(_from: &K, _to: &K) -> bool {
    true
}

/// Breadth-first leaf propagation over a batched one-hop relation.
#[derive(Debug, Clone)]
pub struct Propagation<K> {
    frontier: BTreeSet<K>,
    visited: Option<HashSet<K>>,
}

impl<K> Propagation<K>
where
    K: Ord + Hash + Clone,
{
    /// Start from the given seed keys.
    pub fn new(seeds: impl IntoIterator<Item = K>) -> Self {
        Self {
            frontier: seeds.into_iter().collect(),
            visited: None,
        }
    }

    /// Reject successors already reached in an earlier hop of this run.
    ///
    /// This makes cyclic relations terminate. Successors shared by several
    /// nodes of the same frontier are still admitted for each of them.
    pub fn reject_revisits(mut self) -> Self {
        self.visited = Some(self.frontier.iter().cloned().collect());
        self
    }

    /// Run with every successor admitted.
    pub fn run<E, Q>(self, expand: Q) -> Result<Vec<K>, E>
    where
        Q: FnMut(&[K]) -> Result<Vec<(K, Option<K>)>, E>,
    {
        self.run_with(expand, admit_all)
    }

    /// Run, admitting a successor `to` of `from` only if `admit(from, to)`.
    ///
    /// `expand` receives the current frontier and returns `(key, successor)`
    /// rows; a `None` successor or an absent key both mean "no successor".
    /// The result is sorted and free of duplicates.
    pub fn run_with<E, Q, A>(mut self, mut expand: Q, mut admit: A) -> Result<Vec<K>, E>
    where
        Q: FnMut(&[K]) -> Result<Vec<(K, Option<K>)>, E>,
        A: FnMut(&K, &K) -> bool,
    {
        let mut leaves: BTreeSet<K> = BTreeSet::new();

        while !self.frontier.is_empty() {
            let keys: Vec<K> = self.frontier.iter().cloned().collect();

            let mut successors: BTreeMap<K, Vec<K>> = BTreeMap::new();
            for (key, next) in expand(&keys)? {
                let entry = successors.entry(key).or_default();
                if let Some(next) = next {
                    entry.push(next);
                }
            }

            let mut next_frontier: BTreeSet<K> = BTreeSet::new();
            for key in keys {
                let mut advanced = false;
                if let Some(nexts) = successors.get(&key) {
                    for next in nexts {
                        let seen = self
                            .visited
                            .as_ref()
                            .is_some_and(|visited| visited.contains(next));
                        if !seen && admit(&key, next) {
                            next_frontier.insert(next.clone());
                            advanced = true;
                        }
                    }
                }
                if !advanced {
                    leaves.insert(key);
                }
            }

            if let Some(visited) = self.visited.as_mut() {
                visited.extend(next_frontier.iter().cloned());
            }
            self.frontier = next_frontier;
        }

        Ok(leaves.into_iter().collect())
    }
}
