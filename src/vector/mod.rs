//! HNSW approximate-nearest-neighbor index
//!
//! A hierarchical navigable small world graph over fixed-dimension vectors.
//! Nodes live in an id-keyed arena; adjacency is a list of ids per level, so
//! the inherently cyclic graph carries no owned references and deletion is a
//! plain unlink. Every search and insertion descends from the entry point.

pub mod distance;

use parking_lot::RwLock;
use rand::Rng;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};
use tracing::debug;

use crate::error::{FacetError, Result};
use distance::cosine_distance;

/// Hard cap on sampled levels
const MAX_LEVEL: usize = 15;

/// A node in the HNSW graph
#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub vector: Vec<f32>,
    pub level: usize,
    /// `neighbors[l]` holds the ids connected at level `l`; length is
    /// `level + 1`.
    pub neighbors: Vec<Vec<String>>,
}

/// Search candidate ordered by distance to the query
#[derive(Debug, Clone, PartialEq)]
struct Candidate {
    distance: f32,
    id: String,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct Graph {
    nodes: HashMap<String, Node>,
    entry_point: Option<String>,
    max_level: usize,
    level_count: [usize; MAX_LEVEL + 1],
}

/// HNSW index statistics
#[derive(Debug, Clone)]
pub struct HnswStats {
    pub node_count: usize,
    pub max_level: usize,
    pub dimension: usize,
    pub m: usize,
    pub ef: usize,
    pub total_connections: usize,
    pub avg_connections: f64,
}

pub struct HnswIndex {
    dim: usize,
    m: usize,
    ef: usize,
    graph: RwLock<Graph>,
}

impl HnswIndex {
    pub fn new(dim: usize, m: usize, ef: usize) -> Self {
        Self {
            dim,
            m,
            ef,
            graph: RwLock::new(Graph::default()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    /// Insert a vector under a new id
    pub fn insert(&self, id: &str, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dim {
            return Err(FacetError::InvalidVector {
                expected: self.dim,
                actual: vector.len(),
            });
        }

        let mut graph = self.graph.write();
        if graph.nodes.contains_key(id) {
            return Err(FacetError::InvalidQuery(format!(
                "vector id already exists: {}",
                id
            )));
        }

        let level = self.random_level();
        let mut node = Node {
            id: id.to_string(),
            vector,
            level,
            neighbors: vec![Vec::new(); level + 1],
        };

        // First node becomes the sole entry point.
        let Some(entry) = graph.entry_point.clone() else {
            graph.max_level = level;
            graph.entry_point = Some(node.id.clone());
            for l in 0..=level {
                graph.level_count[l] += 1;
            }
            graph.nodes.insert(node.id.clone(), node);
            return Ok(());
        };

        // Greedy descent from the top of the graph down to level + 1.
        let mut curr = entry;
        for l in ((level + 1)..=graph.max_level).rev() {
            curr = greedy_step(&graph, &node.vector, curr, l);
        }

        // Select neighbors per level from ef-bounded layer searches.
        let mut selected: Vec<(usize, Vec<String>)> = Vec::new();
        for l in (0..=level.min(graph.max_level)).rev() {
            let candidates = search_layer(&graph, &node.vector, &curr, self.ef, l);
            let cap = self.level_cap(l);
            let friends: Vec<String> = candidates
                .iter()
                .take(cap)
                .map(|c| c.id.clone())
                .collect();
            node.neighbors[l] = friends.clone();
            if let Some(closest) = candidates.first() {
                curr = closest.id.clone();
            }
            selected.push((l, friends));
        }

        let node_id = node.id.clone();
        if level > graph.max_level {
            graph.max_level = level;
            graph.entry_point = Some(node_id.clone());
        }
        for l in 0..=level {
            graph.level_count[l] += 1;
        }
        graph.nodes.insert(node_id.clone(), node);

        // Reciprocal edges, pruning any neighbor that overflows its cap.
        for (l, friends) in selected {
            for friend_id in friends {
                let overflow = {
                    let Some(friend) = graph.nodes.get_mut(&friend_id) else {
                        continue;
                    };
                    if l >= friend.neighbors.len() {
                        continue;
                    }
                    friend.neighbors[l].push(node_id.clone());
                    let cap = self.level_cap(l);
                    if friend.neighbors[l].len() > cap {
                        Some((friend.vector.clone(), friend.neighbors[l].clone(), cap))
                    } else {
                        None
                    }
                };

                if let Some((friend_vector, adjacency, cap)) = overflow {
                    let pruned = nearest_subset(&graph, &friend_vector, &adjacency, cap);
                    let dropped: Vec<String> = adjacency
                        .iter()
                        .filter(|id| !pruned.contains(*id))
                        .cloned()
                        .collect();
                    if let Some(friend) = graph.nodes.get_mut(&friend_id) {
                        friend.neighbors[l] = pruned;
                    }
                    // Edges stay symmetric: a pruned edge is unlinked on
                    // both sides.
                    for dropped_id in dropped {
                        if let Some(node) = graph.nodes.get_mut(&dropped_id) {
                            if l < node.neighbors.len() {
                                node.neighbors[l].retain(|x| x != &friend_id);
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Find the k approximate nearest neighbors of the query. Returns
    /// `(id, similarity)` pairs with similarity `1 - distance`, best first.
    /// An empty graph or a dimension mismatch yields an empty result.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(String, f32)> {
        let graph = self.graph.read();

        let Some(entry) = graph.entry_point.clone() else {
            return Vec::new();
        };
        if query.len() != self.dim || k == 0 {
            return Vec::new();
        }

        let mut curr = entry;
        for l in (1..=graph.max_level).rev() {
            curr = greedy_step(&graph, query, curr, l);
        }

        let ef = self.ef.max(k);
        let candidates = search_layer(&graph, query, &curr, ef, 0);

        candidates
            .into_iter()
            .take(k)
            .map(|c| (c.id, 1.0 - c.distance))
            .collect()
    }

    /// Remove a node, unlinking it from every neighbor on every level. If it
    /// was the entry point, any surviving node is elected in its place.
    pub fn delete(&self, id: &str) -> Result<()> {
        let mut graph = self.graph.write();

        let node = graph
            .nodes
            .remove(id)
            .ok_or_else(|| FacetError::KeyNotFound(id.to_string()))?;

        for (l, friends) in node.neighbors.iter().enumerate() {
            for friend_id in friends {
                if let Some(friend) = graph.nodes.get_mut(friend_id) {
                    if l < friend.neighbors.len() {
                        friend.neighbors[l].retain(|f| f != id);
                    }
                }
            }
        }
        for l in 0..=node.level {
            graph.level_count[l] = graph.level_count[l].saturating_sub(1);
        }

        if graph.entry_point.as_deref() == Some(id) {
            graph.entry_point = graph.nodes.keys().next().cloned();
            if graph.entry_point.is_none() {
                graph.max_level = 0;
            }
        }

        debug!(id, remaining = graph.nodes.len(), "removed vector");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Node> {
        self.graph.read().nodes.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.graph.read().nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.graph.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> HnswStats {
        let graph = self.graph.read();

        let total_connections: usize = graph
            .nodes
            .values()
            .map(|n| n.neighbors.iter().map(|f| f.len()).sum::<usize>())
            .sum();

        HnswStats {
            node_count: graph.nodes.len(),
            max_level: graph.max_level,
            dimension: self.dim,
            m: self.m,
            ef: self.ef,
            total_connections,
            avg_connections: total_connections as f64 / (graph.nodes.len() + 1) as f64,
        }
    }

    fn level_cap(&self, level: usize) -> usize {
        if level == 0 {
            self.m * 2
        } else {
            self.m
        }
    }

    /// Sample a level from a geometric distribution with mL = 1/ln(M)
    fn random_level(&self) -> usize {
        let m_l = 1.0 / (self.m as f64).ln();
        let mut rng = rand::thread_rng();
        let mut level = 0;
        while rng.gen::<f64>() < m_l && level < MAX_LEVEL {
            level += 1;
        }
        level
    }
}

/// Greedy move at one level: follow the neighbor closest to the query until
/// no neighbor improves on the current node.
fn greedy_step(graph: &Graph, query: &[f32], start: String, level: usize) -> String {
    let mut curr = start;
    let mut curr_dist = match graph.nodes.get(&curr) {
        Some(node) => cosine_distance(query, &node.vector),
        None => return curr,
    };

    let mut changed = true;
    while changed {
        changed = false;
        let friends = graph
            .nodes
            .get(&curr)
            .and_then(|n| n.neighbors.get(level))
            .cloned()
            .unwrap_or_default();

        for friend_id in friends {
            if let Some(friend) = graph.nodes.get(&friend_id) {
                let dist = cosine_distance(query, &friend.vector);
                if dist < curr_dist {
                    curr = friend_id;
                    curr_dist = dist;
                    changed = true;
                }
            }
        }
    }

    curr
}

/// Best-first search of one layer with an ef-bounded result set. Returns
/// candidates sorted ascending by distance.
fn search_layer(
    graph: &Graph,
    query: &[f32],
    entry_id: &str,
    ef: usize,
    level: usize,
) -> Vec<Candidate> {
    let Some(entry) = graph.nodes.get(entry_id) else {
        return Vec::new();
    };

    let mut visited: HashSet<String> = HashSet::new();
    let mut candidates: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
    let mut results: BinaryHeap<Candidate> = BinaryHeap::new();

    let entry_dist = cosine_distance(query, &entry.vector);
    let seed = Candidate {
        distance: entry_dist,
        id: entry_id.to_string(),
    };
    candidates.push(Reverse(seed.clone()));
    results.push(seed);
    visited.insert(entry_id.to_string());

    while let Some(Reverse(curr)) = candidates.pop() {
        if let Some(worst) = results.peek() {
            if curr.distance > worst.distance {
                break;
            }
        }

        let friends = match graph.nodes.get(&curr.id).and_then(|n| n.neighbors.get(level)) {
            Some(friends) => friends.clone(),
            None => continue,
        };

        for friend_id in friends {
            if !visited.insert(friend_id.clone()) {
                continue;
            }
            let Some(friend) = graph.nodes.get(&friend_id) else {
                continue;
            };

            let dist = cosine_distance(query, &friend.vector);
            let admit = match results.peek() {
                Some(worst) => results.len() < ef || dist < worst.distance,
                None => true,
            };
            if admit {
                let candidate = Candidate {
                    distance: dist,
                    id: friend_id,
                };
                candidates.push(Reverse(candidate.clone()));
                results.push(candidate);
                if results.len() > ef {
                    results.pop();
                }
            }
        }
    }

    results.into_sorted_vec()
}

/// Re-select the nearest `cap` ids from an overflowing adjacency list
fn nearest_subset(graph: &Graph, from: &[f32], ids: &[String], cap: usize) -> Vec<String> {
    let mut scored: Vec<Candidate> = ids
        .iter()
        .filter_map(|id| {
            graph.nodes.get(id).map(|node| Candidate {
                distance: cosine_distance(from, &node.vector),
                id: id.clone(),
            })
        })
        .collect();
    scored.sort();
    scored.into_iter().take(cap).map(|c| c.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index3() -> HnswIndex {
        HnswIndex::new(3, 16, 200)
    }

    #[test]
    fn test_insert_and_search() {
        let index = index3();
        index.insert("vec1", vec![1.0, 0.0, 0.0]).unwrap();
        index.insert("vec2", vec![0.9, 0.1, 0.0]).unwrap();
        index.insert("vec3", vec![0.0, 1.0, 0.0]).unwrap();
        index.insert("vec4", vec![0.0, 0.0, 1.0]).unwrap();

        let results = index.search(&[0.95, 0.05, 0.0], 2);
        assert_eq!(results.len(), 2);
        assert!(results[0].0 == "vec1" || results[0].0 == "vec2");
        assert!(results[0].1 >= 0.9);
        // Results come back best-first.
        assert!(results[0].1 >= results[1].1);
    }

    #[test]
    fn test_rejects_duplicates_and_bad_dimensions() {
        let index = index3();
        index.insert("a", vec![1.0, 0.0, 0.0]).unwrap();

        assert!(index.insert("a", vec![0.0, 1.0, 0.0]).is_err());
        assert!(matches!(
            index.insert("b", vec![1.0, 0.0]),
            Err(FacetError::InvalidVector {
                expected: 3,
                actual: 2
            })
        ));

        // A mismatched query degrades to an empty result instead of erroring.
        assert!(index.search(&[1.0, 0.0], 1).is_empty());
        assert!(index3().search(&[1.0, 0.0, 0.0], 1).is_empty());
    }

    #[test]
    fn test_self_recall() {
        let index = HnswIndex::new(8, 16, 200);
        let mut rng = rand::thread_rng();

        let mut vectors = Vec::new();
        for i in 0..30 {
            let v: Vec<f32> = (0..8).map(|_| rng.gen::<f32>()).collect();
            index.insert(&format!("n{}", i), v.clone()).unwrap();
            vectors.push(v);
        }

        for (i, v) in vectors.iter().enumerate() {
            let results = index.search(v, 1);
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].0, format!("n{}", i));
            assert!(results[0].1 >= 0.999);
        }
    }

    #[test]
    fn test_bidirectional_edges() {
        let index = HnswIndex::new(4, 4, 50);
        let mut rng = rand::thread_rng();

        for i in 0..40 {
            let v: Vec<f32> = (0..4).map(|_| rng.gen::<f32>()).collect();
            index.insert(&format!("n{}", i), v).unwrap();
        }
        for i in (0..40).step_by(3) {
            index.delete(&format!("n{}", i)).unwrap();
        }

        let graph = index.graph.read();
        for node in graph.nodes.values() {
            for (level, friends) in node.neighbors.iter().enumerate() {
                for friend_id in friends {
                    let friend = graph
                        .nodes
                        .get(friend_id)
                        .unwrap_or_else(|| panic!("dangling edge to {}", friend_id));
                    assert!(
                        friend.neighbors[level].contains(&node.id),
                        "edge {} -> {} at level {} is not reciprocal",
                        node.id,
                        friend_id,
                        level
                    );
                }
            }
        }
    }

    #[test]
    fn test_delete_reelects_entry_point() {
        let index = index3();
        index.insert("a", vec![1.0, 0.0, 0.0]).unwrap();
        index.insert("b", vec![0.0, 1.0, 0.0]).unwrap();

        let entry = index.graph.read().entry_point.clone().unwrap();
        index.delete(&entry).unwrap();

        let new_entry = index.graph.read().entry_point.clone();
        assert!(new_entry.is_some());
        assert_ne!(new_entry.as_deref(), Some(entry.as_str()));

        // Searching still works through the surviving node.
        assert_eq!(index.search(&[0.5, 0.5, 0.0], 1).len(), 1);

        index.delete(new_entry.as_deref().unwrap()).unwrap();
        assert!(index.graph.read().entry_point.is_none());
        assert!(index.is_empty());

        assert!(index.delete("ghost").is_err());
    }

    #[test]
    fn test_stats() {
        let index = index3();
        index.insert("a", vec![1.0, 0.0, 0.0]).unwrap();
        index.insert("b", vec![0.0, 1.0, 0.0]).unwrap();

        let stats = index.stats();
        assert_eq!(stats.node_count, 2);
        assert_eq!(stats.dimension, 3);
        assert!(stats.total_connections >= 2);
    }
}
