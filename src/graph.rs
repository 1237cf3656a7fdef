//! Undirected social graph with per-node ring identifiers
//!
//! Nodes are addressed by a dense [`NodeId`] assigned in first-appearance
//! order; the external integer label from the edge list is kept alongside.
//! Neighbor lists are kept sorted so that common-neighbor counts are a
//! linear merge and enumeration order is ascending node id.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;
use thiserror::Error;

/// Dense index of a social node inside a [`SocialGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A member of the social graph.
#[derive(Debug, Clone)]
pub struct SocialNode {
    /// Label from the input data
    pub label: u64,
    /// Ring position in `[0, 1)`
    pub identifier: f64,
    /// Sorted, deduplicated neighbor ids
    neighbors: Vec<NodeId>,
}

impl SocialNode {
    fn new(label: u64) -> Self {
        Self {
            label,
            identifier: 0.0,
            neighbors: Vec::new(),
        }
    }

    pub fn neighbors(&self) -> &[NodeId] {
        &self.neighbors
    }

    pub fn degree(&self) -> usize {
        self.neighbors.len()
    }
}

/// Graph loading errors
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed edge on line {line}: {content:?}")]
    MalformedEdge { line: usize, content: String },
}

/// Undirected simple graph.
#[derive(Debug, Clone, Default)]
pub struct SocialGraph {
    nodes: Vec<SocialNode>,
    by_label: HashMap<u64, NodeId>,
    edge_count: usize,
}

impl SocialGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the node for `label`, creating it if needed.
    pub fn add_node(&mut self, label: u64) -> NodeId {
        if let Some(&id) = self.by_label.get(&label) {
            return id;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(SocialNode::new(label));
        self.by_label.insert(label, id);
        id
    }

    /// Add an undirected edge between two labels. Self-loops and repeated
    /// edges are ignored. Returns true if a new edge was inserted.
    pub fn add_edge(&mut self, u: u64, v: u64) -> bool {
        let a = self.add_node(u);
        let b = self.add_node(v);
        if a == b {
            return false;
        }
        let inserted = insert_sorted(&mut self.nodes[a.0].neighbors, b);
        if inserted {
            insert_sorted(&mut self.nodes[b.0].neighbors, a);
            self.edge_count += 1;
        }
        inserted
    }

    /// Build a graph from `(u, v)` label pairs.
    pub fn from_edges(edges: impl IntoIterator<Item = (u64, u64)>) -> Self {
        let mut graph = Self::new();
        for (u, v) in edges {
            graph.add_edge(u, v);
        }
        graph
    }

    /// Parse a whitespace-separated edge list.
    ///
    /// Blank lines and lines starting with `#` or `%` are skipped. Columns
    /// past the second (weights, timestamps) are ignored.
    pub fn from_edge_list<R: BufRead>(reader: R) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('%') {
                continue;
            }
            let mut fields = trimmed.split_whitespace();
            let parsed = match (fields.next(), fields.next()) {
                (Some(u), Some(v)) => u.parse::<u64>().ok().zip(v.parse::<u64>().ok()),
                _ => None,
            };
            match parsed {
                Some((u, v)) => {
                    graph.add_edge(u, v);
                }
                None => {
                    return Err(GraphError::MalformedEdge {
                        line: idx + 1,
                        content: line.clone(),
                    })
                }
            }
        }
        Ok(graph)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All node ids in enumeration order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn node(&self, id: NodeId) -> Option<&SocialNode> {
        self.nodes.get(id.0)
    }

    pub fn id_of(&self, label: u64) -> Option<NodeId> {
        self.by_label.get(&label).copied()
    }

    pub fn label(&self, id: NodeId) -> u64 {
        self.nodes[id.0].label
    }

    pub fn neighbors(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].neighbors
    }

    pub fn degree(&self, id: NodeId) -> usize {
        self.nodes[id.0].neighbors.len()
    }

    pub fn contains_edge(&self, a: NodeId, b: NodeId) -> bool {
        self.nodes[a.0].neighbors.binary_search(&b).is_ok()
    }

    pub fn identifier(&self, id: NodeId) -> f64 {
        self.nodes[id.0].identifier
    }

    /// Overwrite a node's identifier without touching any overlay state.
    ///
    /// Only [`crate::placement`] calls this, either before linking or
    /// together with the matching residency move.
    pub(crate) fn set_identifier(&mut self, id: NodeId, identifier: f64) {
        self.nodes[id.0].identifier = crate::normalize_identifier(identifier);
    }

    /// Number of neighbors shared by `a` and `b`.
    pub fn common_neighbor_count(&self, a: NodeId, b: NodeId) -> usize {
        let (x, y) = (&self.nodes[a.0].neighbors, &self.nodes[b.0].neighbors);
        let (mut i, mut j, mut count) = (0, 0, 0);
        while i < x.len() && j < y.len() {
            match x[i].cmp(&y[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    count += 1;
                    i += 1;
                    j += 1;
                }
            }
        }
        count
    }

    /// Fraction of `a`'s neighbors that are also neighbors of `b`.
    ///
    /// Asymmetric: normalized by `a`'s degree. Zero when `a` is isolated.
    pub fn strength(&self, a: NodeId, b: NodeId) -> f64 {
        let degree = self.degree(a);
        if degree == 0 {
            return 0.0;
        }
        self.common_neighbor_count(a, b) as f64 / degree as f64
    }
}

/// Load an edge-list file from disk.
pub fn load_edge_list(path: impl AsRef<Path>) -> Result<SocialGraph, GraphError> {
    let file = std::fs::File::open(path)?;
    SocialGraph::from_edge_list(std::io::BufReader::new(file))
}

fn insert_sorted(list: &mut Vec<NodeId>, id: NodeId) -> bool {
    match list.binary_search(&id) {
        Ok(_) => false,
        Err(pos) => {
            list.insert(pos, id);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle_with_tail() -> SocialGraph {
        //   10 - 20
        //    \  /
        //     30 - 40
        SocialGraph::from_edges([(10, 20), (20, 30), (30, 10), (30, 40)])
    }

    #[test]
    fn test_dense_ids_in_first_appearance_order() {
        let g = triangle_with_tail();
        assert_eq!(g.node_count(), 4);
        assert_eq!(g.edge_count(), 4);
        assert_eq!(g.id_of(10), Some(NodeId(0)));
        assert_eq!(g.id_of(20), Some(NodeId(1)));
        assert_eq!(g.id_of(30), Some(NodeId(2)));
        assert_eq!(g.id_of(40), Some(NodeId(3)));
        assert_eq!(g.label(NodeId(3)), 40);
    }

    #[test]
    fn test_self_loops_and_duplicates_ignored() {
        let mut g = SocialGraph::new();
        assert!(g.add_edge(1, 2));
        assert!(!g.add_edge(2, 1));
        assert!(!g.add_edge(3, 3));
        assert_eq!(g.edge_count(), 1);
        // the self-loop still registers the node
        assert_eq!(g.node_count(), 3);
        assert_eq!(g.degree(g.id_of(3).unwrap()), 0);
    }

    #[test]
    fn test_neighbors_sorted() {
        let g = SocialGraph::from_edges([(5, 9), (5, 1), (5, 7)]);
        let hub = g.id_of(5).unwrap();
        let ids = g.neighbors(hub);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_common_neighbors_and_strength() {
        let g = triangle_with_tail();
        let (a, b, c, d) = (NodeId(0), NodeId(1), NodeId(2), NodeId(3));

        assert_eq!(g.common_neighbor_count(a, b), 1); // c
        assert_eq!(g.common_neighbor_count(c, d), 0);

        // a has neighbors {b, c}; shares c with b
        assert!((g.strength(a, b) - 0.5).abs() < 1e-12);
        // c has neighbors {a, b, d}; shares b with a
        assert!((g.strength(c, a) - 1.0 / 3.0).abs() < 1e-12);
        // strength is direction-dependent
        assert!((g.strength(a, c) - 0.5).abs() < 1e-12);
        assert_eq!(g.strength(d, c), 0.0);
    }

    #[test]
    fn test_strength_of_isolated_node_is_zero() {
        let mut g = SocialGraph::new();
        let lonely = g.add_node(7);
        let other = g.add_node(8);
        assert_eq!(g.strength(lonely, other), 0.0);
    }

    #[test]
    fn test_parse_edge_list() {
        let input = "# comment\n% konect header\n\n1 2\n2\t3 0.5\n3 1\n";
        let g = SocialGraph::from_edge_list(input.as_bytes()).unwrap();
        assert_eq!(g.node_count(), 3);
        assert_eq!(g.edge_count(), 3);
    }

    #[test]
    fn test_parse_edge_list_rejects_garbage() {
        let input = "1 2\nfoo bar\n";
        match SocialGraph::from_edge_list(input.as_bytes()) {
            Err(GraphError::MalformedEdge { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected malformed edge, got {:?}", other.map(|g| g.node_count())),
        }
    }

    #[test]
    fn test_set_identifier_wraps() {
        let mut g = triangle_with_tail();
        g.set_identifier(NodeId(0), 1.25);
        assert!((g.identifier(NodeId(0)) - 0.25).abs() < 1e-12);
    }
}
