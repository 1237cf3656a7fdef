//! Greedy clockwise finger routing
//!
//! Each peer forwards a lookup to whichever entry of its routing table
//! (successor plus long links) is clockwise-closest to the destination slot,
//! using only its own links. The successor always makes progress, so a
//! lookup finishes in at most N-1 hops.

use crate::graph::SocialGraph;
use crate::overlay::Overlay;
use crate::{clockwise_slot_distance, Slot};
use rand::Rng;
use rayon::prelude::*;

/// Which kind of link a hop used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Ring link to the successor
    Successor,
    /// Sampled long link
    LongLink,
}

/// Result of a routing decision at one peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    /// Forward the lookup to `next_hop`
    Forward { next_hop: Slot, via: LinkKind },
    /// The current peer is the destination
    Delivered,
}

/// Pick the next hop from `current` toward `destination`.
pub fn next_hop(overlay: &Overlay, current: Slot, destination: Slot) -> RoutingDecision {
    if current == destination {
        return RoutingDecision::Delivered;
    }
    let n = overlay.len();
    let peer = overlay.peer(current);

    let mut best = current;
    let mut best_distance = clockwise_slot_distance(current, destination, n);
    let mut via = LinkKind::Successor;

    for (idx, candidate) in peer.forwarding_candidates().enumerate() {
        let distance = clockwise_slot_distance(candidate, destination, n);
        if distance < best_distance {
            best = candidate;
            best_distance = distance;
            via = if idx == 0 {
                LinkKind::Successor
            } else {
                LinkKind::LongLink
            };
        }
    }

    RoutingDecision::Forward {
        next_hop: best,
        via,
    }
}

/// Full trace of one lookup
#[derive(Debug, Clone)]
pub struct LookupResult {
    pub hops: usize,
    pub successor_hops: usize,
    pub long_link_hops: usize,
    /// Visited slots, source first and destination last
    pub path: Vec<Slot>,
}

/// Route a lookup and record its path.
pub fn route(overlay: &Overlay, source: Slot, destination: Slot) -> LookupResult {
    let mut result = LookupResult {
        hops: 0,
        successor_hops: 0,
        long_link_hops: 0,
        path: vec![source],
    };
    let mut current = source;

    while let RoutingDecision::Forward { next_hop, via } = next_hop(overlay, current, destination) {
        result.hops += 1;
        match via {
            LinkKind::Successor => result.successor_hops += 1,
            LinkKind::LongLink => result.long_link_hops += 1,
        }
        result.path.push(next_hop);
        current = next_hop;
    }
    result
}

/// Number of greedy hops from `start` to `end`; 0 when they coincide.
pub fn hop_count(overlay: &Overlay, start: Slot, end: Slot) -> usize {
    let mut current = start;
    let mut hops = 0;
    while let RoutingDecision::Forward { next_hop, .. } = next_hop(overlay, current, end) {
        current = next_hop;
        hops += 1;
    }
    hops
}

/// Hop count between the peers responsible for two identifiers.
pub fn hop_count_between(overlay: &Overlay, from: f64, to: f64) -> usize {
    hop_count(overlay, overlay.slot_of(from), overlay.slot_of(to))
}

/// Mean hop count over every directed social edge `(u, v)`, routing from
/// `u`'s peer to `v`'s peer. Zero for a graph without edges.
pub fn mean_lookup_hops(graph: &SocialGraph, overlay: &Overlay) -> f64 {
    let (total, lookups) = (0..graph.node_count())
        .into_par_iter()
        .map(|idx| {
            let u = crate::graph::NodeId(idx);
            let from = overlay.slot_of(graph.identifier(u));
            let hops: usize = graph
                .neighbors(u)
                .iter()
                .map(|&v| hop_count(overlay, from, overlay.slot_of(graph.identifier(v))))
                .sum();
            (hops, graph.degree(u))
        })
        .reduce(|| (0, 0), |a, b| (a.0 + b.0, a.1 + b.1));

    if lookups == 0 {
        0.0
    } else {
        total as f64 / lookups as f64
    }
}

/// Mean hop count over `samples` uniformly random slot pairs.
pub fn sample_mean_hops<R: Rng + ?Sized>(overlay: &Overlay, samples: usize, rng: &mut R) -> f64 {
    if samples == 0 {
        return 0.0;
    }
    let n = overlay.len();
    let pairs: Vec<(Slot, Slot)> = (0..samples)
        .map(|_| (rng.gen_range(0..n), rng.gen_range(0..n)))
        .collect();
    let total: usize = pairs
        .par_iter()
        .map(|&(a, b)| hop_count(overlay, a, b))
        .sum();
    total as f64 / samples as f64
}
