//! Swap-candidate selection schemes
//!
//! Every scheme first picks an anchor node `m` related to the source node,
//! then resolves the peer hosting `m`, hops once to a random entry of that
//! peer's routing table (successor or long link) and returns a random
//! resident there. The schemes differ only in how `m` is picked.

use crate::graph::{NodeId, SocialGraph};
use crate::overlay::Overlay;
use crate::Redraw;
use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::trace;

/// Default bound on redraws per selection.
pub const DEFAULT_MAX_ATTEMPTS: usize = 1000;

/// Candidate selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum SelectionScheme {
    /// Uniform random graph neighbor
    #[default]
    Direct,
    /// Strongest graph neighbor
    Greedy,
    /// Uniform pick from the precomputed strongest-friends list
    Smart,
    /// Uniform random graph node
    Random,
}

impl SelectionScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionScheme::Direct => "direct",
            SelectionScheme::Greedy => "greedy",
            SelectionScheme::Smart => "smart",
            SelectionScheme::Random => "random",
        }
    }

    /// Whether the scheme reads a [`FriendIndex`].
    pub fn needs_friend_index(&self) -> bool {
        matches!(self, SelectionScheme::Smart)
    }
}

impl fmt::Display for SelectionScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectionScheme {
    type Err = crate::config::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(SelectionScheme::Direct),
            "greedy" => Ok(SelectionScheme::Greedy),
            "smart" => Ok(SelectionScheme::Smart),
            "random" => Ok(SelectionScheme::Random),
            _ => Err(crate::config::ConfigError::UnknownScheme(s.to_string())),
        }
    }
}

impl TryFrom<String> for SelectionScheme {
    type Error = crate::config::ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Selection errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("Selection exhausted for node {node} after {attempts} attempts")]
    SelectionExhausted { node: NodeId, attempts: usize },

    #[error("Scheme {0} requires a friend index")]
    MissingFriendIndex(SelectionScheme),

    #[error("Node {0} is not in the graph")]
    UnknownNode(NodeId),
}

/// Top-K strongest friends per node, strongest first.
#[derive(Debug, Clone, Default)]
pub struct FriendIndex {
    friends: Vec<Vec<NodeId>>,
}

impl FriendIndex {
    /// Rank every node's neighbors by strength and keep the first `k`.
    /// Ties keep ascending node id order.
    pub fn build(graph: &SocialGraph, k: usize) -> Self {
        let friends = (0..graph.node_count())
            .into_par_iter()
            .map(|idx| {
                let node = NodeId(idx);
                let mut ranked: Vec<(NodeId, f64)> = graph
                    .neighbors(node)
                    .iter()
                    .map(|&n| (n, graph.strength(node, n)))
                    .collect();
                ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
                ranked.into_iter().take(k).map(|(n, _)| n).collect()
            })
            .collect();
        Self { friends }
    }

    /// Use an externally computed friend table, indexed by node id.
    pub fn from_lists(friends: Vec<Vec<NodeId>>) -> Self {
        Self { friends }
    }

    pub fn friends(&self, node: NodeId) -> &[NodeId] {
        self.friends.get(node.0).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.friends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.friends.is_empty()
    }
}

/// A proposed swap partner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub node: NodeId,
    /// Draws spent, including the successful one
    pub draws: usize,
}

/// The neighbor of `node` with the highest strength; the first one in
/// enumeration order wins ties.
pub fn strongest_neighbor(graph: &SocialGraph, node: NodeId) -> Option<NodeId> {
    let mut best: Option<(NodeId, f64)> = None;
    for &n in graph.neighbors(node) {
        let s = graph.strength(node, n);
        match best {
            Some((_, best_strength)) if s <= best_strength => {}
            _ => best = Some((n, s)),
        }
    }
    best.map(|(n, _)| n)
}

/// Propose a swap partner for `node`.
///
/// Draws that land on an empty peer or on `node` itself are repeated, up to
/// `max_attempts` times. A node whose anchor pool is empty fails at once.
pub fn select_candidate<R: Rng + ?Sized>(
    graph: &SocialGraph,
    overlay: &Overlay,
    friends: Option<&FriendIndex>,
    node: NodeId,
    scheme: SelectionScheme,
    rng: &mut R,
    max_attempts: usize,
) -> Result<Candidate, SelectionError> {
    if node.0 >= graph.node_count() {
        return Err(SelectionError::UnknownNode(node));
    }
    let exhausted = |attempts| SelectionError::SelectionExhausted { node, attempts };

    let pool: &[NodeId] = match scheme {
        SelectionScheme::Direct => graph.neighbors(node),
        SelectionScheme::Smart => friends
            .ok_or(SelectionError::MissingFriendIndex(scheme))?
            .friends(node),
        SelectionScheme::Greedy | SelectionScheme::Random => &[],
    };
    let greedy_anchor = match scheme {
        SelectionScheme::Greedy => strongest_neighbor(graph, node),
        _ => None,
    };
    let pool_is_empty = match scheme {
        SelectionScheme::Direct | SelectionScheme::Smart => pool.is_empty(),
        SelectionScheme::Greedy => greedy_anchor.is_none(),
        SelectionScheme::Random => graph.node_count() < 2,
    };
    if pool_is_empty {
        return Err(exhausted(0));
    }

    for attempt in 1..=max_attempts {
        let anchor = match scheme {
            SelectionScheme::Direct | SelectionScheme::Smart => match pool.choose(rng) {
                Some(&m) => m,
                None => return Err(exhausted(attempt)),
            },
            SelectionScheme::Greedy => match greedy_anchor {
                Some(m) => m,
                None => return Err(exhausted(attempt)),
            },
            SelectionScheme::Random => {
                let m = NodeId(rng.gen_range(0..graph.node_count()));
                if m == node {
                    trace!(node = %node, attempt, reason = %Redraw::SelfReference, "candidate redraw");
                    continue;
                }
                m
            }
        };

        let host = overlay.peer(overlay.slot_of(graph.identifier(anchor)));
        let pick = rng.gen_range(0..=host.out_degree());
        let target = if pick == 0 {
            host.successor()
        } else {
            host.out_links()[pick - 1]
        };

        let Some(&candidate) = overlay.residents(target).choose(rng) else {
            trace!(node = %node, attempt, slot = target, reason = %Redraw::EmptyCandidateBucket, "candidate redraw");
            continue;
        };
        if candidate == node {
            trace!(node = %node, attempt, reason = %Redraw::SelfReference, "candidate redraw");
            continue;
        }
        return Ok(Candidate {
            node: candidate,
            draws: attempt,
        });
    }
    Err(exhausted(max_attempts))
}
