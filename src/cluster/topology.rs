// Topology - Declared peer edges between cluster nodes
// Principle: Edges are undirected; declared and established are tracked separately

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeSet;

/// Undirected edge, stored as (low, high)
pub type Edge = (usize, usize);

fn edge(a: usize, b: usize) -> Edge {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Ordered edge list plus the subset currently established
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterTopology {
    edges: Vec<Edge>,
    established: BTreeSet<Edge>,
}

impl ClusterTopology {
    pub fn empty() -> Self {
        Self::default()
    }

    /// `i <-> i+1` for every consecutive pair
    pub fn chain(n: usize) -> Self {
        Self::from_edges((1..n).map(|i| (i - 1, i)))
    }

    /// A chain for connectivity plus random extra links until every node has
    /// `degree` peers (where enough nodes exist)
    pub fn random<R: Rng>(n: usize, degree: usize, rng: &mut R) -> Self {
        let mut topology = Self::chain(n);
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(rng);

        for &a in &order {
            let mut candidates: Vec<usize> = (0..n).filter(|&b| b != a && !topology.is_declared(a, b)).collect();
            candidates.shuffle(rng);
            for b in candidates {
                if topology.degree(a) >= degree {
                    break;
                }
                if topology.degree(b) < degree {
                    topology.add_edge(a, b);
                }
            }
        }
        topology
    }

    /// Build from pairs; self-loops and duplicates are skipped
    pub fn from_edges<I: IntoIterator<Item = (usize, usize)>>(pairs: I) -> Self {
        let mut topology = Self::default();
        for (a, b) in pairs {
            topology.add_edge(a, b);
        }
        topology
    }

    /// Declare an edge; returns false for self-loops and duplicates
    pub fn add_edge(&mut self, a: usize, b: usize) -> bool {
        if a == b || self.is_declared(a, b) {
            return false;
        }
        self.edges.push(edge(a, b));
        true
    }

    pub fn remove_edge(&mut self, a: usize, b: usize) {
        let e = edge(a, b);
        self.edges.retain(|x| *x != e);
        self.established.remove(&e);
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Declared edges touching `node`
    pub fn edges_of(&self, node: usize) -> Vec<Edge> {
        self.edges
            .iter()
            .copied()
            .filter(|&(a, b)| a == node || b == node)
            .collect()
    }

    pub fn degree(&self, node: usize) -> usize {
        self.edges.iter().filter(|&&(a, b)| a == node || b == node).count()
    }

    pub fn is_declared(&self, a: usize, b: usize) -> bool {
        self.edges.contains(&edge(a, b))
    }

    pub fn mark_established(&mut self, a: usize, b: usize) {
        self.established.insert(edge(a, b));
    }

    /// Forget every established link touching `node`
    pub fn mark_node_down(&mut self, node: usize) {
        self.established.retain(|&(a, b)| a != node && b != node);
    }

    pub fn is_linked(&self, a: usize, b: usize) -> bool {
        self.established.contains(&edge(a, b))
    }

    /// Established links, ordered
    pub fn links(&self) -> Vec<Edge> {
        self.established.iter().copied().collect()
    }
}
