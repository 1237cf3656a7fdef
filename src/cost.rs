//! Placement cost and swap evaluation
//!
//! The cost of probing node `p` at the position of node `x` is
//!
//! ```text
//! cost(x, p) = Σ_{n ∈ N(p)} strength(p, n) · distance(x, n)
//! ```
//!
//! A swap of `i` and `j` is accepted when placing each at the other's
//! position does not increase the summed cost.

use crate::graph::{NodeId, SocialGraph};
use crate::overlay::Overlay;
use crate::placement::exchange;
use crate::routing::hop_count;
use crate::{clockwise_identifier_distance, normalize_identifier};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Distance used by the cost function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", try_from = "String")]
pub enum Metric {
    /// Clockwise identifier distance `(id(n) - id(x)) mod 1`
    #[default]
    Euclidean,
    /// Greedy hop count between the hosting peers
    Hop,
    /// Symmetric `|id(n) - id(x)|`, no wrap
    Absolute,
    /// `id(n) - id(x)` going forward, `1 + |id(n) - id(x)|` when wrapping
    WrapPenalized,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Euclidean => "euclidean",
            Metric::Hop => "hop",
            Metric::Absolute => "absolute",
            Metric::WrapPenalized => "wrap-penalized",
        }
    }

    /// Distance between two identifiers; overlay lookups only for `Hop`.
    pub fn distance(&self, overlay: &Overlay, from: f64, to: f64) -> f64 {
        match self {
            Metric::Euclidean => clockwise_identifier_distance(from, to),
            Metric::Hop => hop_count(overlay, overlay.slot_of(from), overlay.slot_of(to)) as f64,
            Metric::Absolute => (normalize_identifier(to) - normalize_identifier(from)).abs(),
            Metric::WrapPenalized => {
                let (from, to) = (normalize_identifier(from), normalize_identifier(to));
                if from <= to {
                    to - from
                } else {
                    1.0 + (to - from).abs()
                }
            }
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = crate::config::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "euclidean" => Ok(Metric::Euclidean),
            "hop" | "hops" => Ok(Metric::Hop),
            "absolute" => Ok(Metric::Absolute),
            "wrap-penalized" | "wrap_penalized" => Ok(Metric::WrapPenalized),
            _ => Err(crate::config::ConfigError::UnknownMetric(s.to_string())),
        }
    }
}

impl TryFrom<String> for Metric {
    type Error = crate::config::ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Cost of putting `probe` at the current position of `place`.
pub fn cost(
    graph: &SocialGraph,
    overlay: &Overlay,
    place: NodeId,
    probe: NodeId,
    metric: Metric,
) -> f64 {
    cost_at(graph, overlay, graph.identifier(place), probe, metric)
}

/// Cost of putting `probe` at an arbitrary identifier.
pub fn cost_at(
    graph: &SocialGraph,
    overlay: &Overlay,
    position: f64,
    probe: NodeId,
    metric: Metric,
) -> f64 {
    graph
        .neighbors(probe)
        .iter()
        .map(|&n| {
            let strength = graph.strength(probe, n);
            if strength == 0.0 {
                return 0.0;
            }
            strength * metric.distance(overlay, position, graph.identifier(n))
        })
        .sum()
}

/// Costs before and after a hypothetical swap
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwapCost {
    /// `cost(i, i) + cost(j, j)`
    pub old: f64,
    /// `cost(j, i) + cost(i, j)`: each node at the other's position
    pub new: f64,
}

impl SwapCost {
    /// Ties favor swapping.
    pub fn accepts(&self) -> bool {
        self.new <= self.old
    }
}

/// Compute the swap costs without mutating anything.
pub fn swap_cost(
    graph: &SocialGraph,
    overlay: &Overlay,
    i: NodeId,
    j: NodeId,
    metric: Metric,
) -> SwapCost {
    SwapCost {
        old: cost(graph, overlay, i, i, metric) + cost(graph, overlay, j, j, metric),
        new: cost(graph, overlay, j, i, metric) + cost(graph, overlay, i, j, metric),
    }
}

/// Swap `i` and `j` if doing so does not raise the cost. Returns whether a
/// swap happened. A node is never swapped with itself.
pub fn evaluate_swap(
    graph: &mut SocialGraph,
    overlay: &mut Overlay,
    i: NodeId,
    j: NodeId,
    metric: Metric,
) -> bool {
    if i == j {
        return false;
    }
    let costs = swap_cost(graph, overlay, i, j, metric);
    if !costs.accepts() {
        return false;
    }
    if !exchange(graph, overlay, i, j) {
        return false;
    }
    debug!(
        i = %i,
        j = %j,
        old = costs.old,
        new = costs.new,
        %metric,
        "identifiers swapped"
    );
    true
}

/// Sum of `cost(v, v)` over every node.
///
/// Per-node costs are computed in parallel and added in node order, so the
/// result is bit-identical across runs and thread counts.
pub fn total_cost(graph: &SocialGraph, overlay: &Overlay, metric: Metric) -> f64 {
    let costs: Vec<f64> = (0..graph.node_count())
        .into_par_iter()
        .map(|idx| {
            let v = NodeId(idx);
            cost(graph, overlay, v, v, metric)
        })
        .collect();
    costs.iter().sum()
}
