//! Weighted Louvain community detection
//!
//! Phase 1 moves single nodes to the neighbouring community with the best
//! modularity gain until nothing moves. Phase 2 collapses each community into
//! one node (internal weight becomes a self-loop) and the two phases repeat
//! until a level produces no merge.

use rustc_hash::FxHashMap;

/// Undirected weighted graph in adjacency-list form.
#[derive(Debug, Clone, Default)]
pub struct WeightedGraph {
    /// Neighbours per node, each undirected edge listed from both ends
    neighbors: Vec<Vec<(usize, f64)>>,
    self_loops: Vec<f64>,
}

impl WeightedGraph {
    pub fn with_nodes(n: usize) -> Self {
        Self {
            neighbors: vec![Vec::new(); n],
            self_loops: vec![0.0; n],
        }
    }

    pub fn node_count(&self) -> usize {
        self.neighbors.len()
    }

    /// Add an undirected edge. Non-positive weights are ignored.
    pub fn add_edge(&mut self, a: usize, b: usize, weight: f64) {
        if weight <= 0.0 {
            return;
        }
        if a == b {
            self.self_loops[a] += weight;
        } else {
            self.neighbors[a].push((b, weight));
            self.neighbors[b].push((a, weight));
        }
    }

    fn degree(&self, node: usize) -> f64 {
        self.neighbors[node].iter().map(|(_, w)| w).sum::<f64>() + 2.0 * self.self_loops[node]
    }

    fn total_weight(&self) -> f64 {
        (0..self.node_count()).map(|n| self.degree(n)).sum::<f64>() / 2.0
    }

    /// Collapse communities into single nodes.
    fn aggregate(&self, communities: &[usize], count: usize) -> WeightedGraph {
        let mut next = WeightedGraph::with_nodes(count);
        let mut between: FxHashMap<(usize, usize), f64> = FxHashMap::default();

        for node in 0..self.node_count() {
            let c = communities[node];
            next.self_loops[c] += self.self_loops[node];
            for &(other, weight) in &self.neighbors[node] {
                let d = communities[other];
                if c == d {
                    // seen from both endpoints
                    next.self_loops[c] += weight / 2.0;
                } else if c < d {
                    *between.entry((c, d)).or_insert(0.0) += weight;
                }
            }
        }

        let mut edges: Vec<((usize, usize), f64)> = between.into_iter().collect();
        edges.sort_by(|a, b| a.0.cmp(&b.0));
        for ((c, d), weight) in edges {
            next.neighbors[c].push((d, weight));
            next.neighbors[d].push((c, weight));
        }
        next
    }
}

/// Community id per node, numbered contiguously from 0 in order of first
/// appearance. Isolated nodes end up in their own community.
pub fn louvain(graph: &WeightedGraph, resolution: f64) -> Vec<usize> {
    let n = graph.node_count();
    let mut membership: Vec<usize> = (0..n).collect();
    if n == 0 || graph.total_weight() <= 0.0 {
        return membership;
    }

    let mut level = graph.clone();
    let mut max_levels = 32;
    while max_levels > 0 {
        max_levels -= 1;
        let (communities, count) = local_moving(&level, resolution);
        if count == level.node_count() {
            break;
        }
        for c in &mut membership {
            *c = communities[*c];
        }
        level = level.aggregate(&communities, count);
    }

    renumber(&mut membership);
    membership
}

/// One round of node moves. Returns contiguous community ids and their count.
fn local_moving(graph: &WeightedGraph, resolution: f64) -> (Vec<usize>, usize) {
    let n = graph.node_count();
    let m = graph.total_weight();
    let degrees: Vec<f64> = (0..n).map(|i| graph.degree(i)).collect();

    let mut communities: Vec<usize> = (0..n).collect();
    let mut community_weights: Vec<f64> = degrees.clone();

    let mut improved = true;
    let mut max_iterations = 100;

    while improved && max_iterations > 0 {
        improved = false;
        max_iterations -= 1;

        for node in 0..n {
            let current = communities[node];
            let k_i = degrees[node];

            let mut links: FxHashMap<usize, f64> = FxHashMap::default();
            for &(neighbor, weight) in &graph.neighbors[node] {
                *links.entry(communities[neighbor]).or_insert(0.0) += weight;
            }

            community_weights[current] -= k_i;

            let gain = |community: usize, k_i_in: f64| {
                k_i_in / m - resolution * community_weights[community] * k_i / (2.0 * m * m)
            };

            let mut best = current;
            let mut best_gain = gain(current, links.get(&current).copied().unwrap_or(0.0));

            let mut candidates: Vec<(usize, f64)> = links.into_iter().collect();
            candidates.sort_by_key(|(c, _)| *c);
            for (community, k_i_in) in candidates {
                let g = gain(community, k_i_in);
                if g > best_gain + f64::EPSILON {
                    best_gain = g;
                    best = community;
                }
            }

            community_weights[best] += k_i;
            if best != current {
                communities[node] = best;
                improved = true;
            }
        }
    }

    let count = renumber(&mut communities);
    (communities, count)
}

/// Renumber ids to 0..k in order of first appearance; returns k.
fn renumber(ids: &mut [usize]) -> usize {
    let mut map: FxHashMap<usize, usize> = FxHashMap::default();
    for id in ids.iter_mut() {
        let next = map.len();
        *id = *map.entry(*id).or_insert(next);
    }
    map.len()
}

/// Newman modularity of a partition.
#[cfg(test)]
fn modularity(graph: &WeightedGraph, communities: &[usize]) -> f64 {
    let m = graph.total_weight();
    if m <= 0.0 {
        return 0.0;
    }
    let m2 = 2.0 * m;
    let degrees: Vec<f64> = (0..graph.node_count()).map(|i| graph.degree(i)).collect();

    let mut internal = 0.0;
    for node in 0..graph.node_count() {
        internal += 2.0 * graph.self_loops[node];
        for &(other, weight) in &graph.neighbors[node] {
            if communities[other] == communities[node] {
                internal += weight;
            }
        }
    }

    let mut totals: FxHashMap<usize, f64> = FxHashMap::default();
    for (node, &c) in communities.iter().enumerate() {
        *totals.entry(c).or_insert(0.0) += degrees[node];
    }
    let expected: f64 = totals.values().map(|t| t * t).sum::<f64>() / m2;

    (internal - expected) / m2
}
