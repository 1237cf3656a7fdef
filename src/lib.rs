//! Social-aware identifier refinement on a Symphony ring overlay
//!
//! Core library for building a Symphony-style DHT ring, routing lookups over
//! it, and locally swapping social-graph identifiers so that friends land on
//! nearby peers.

pub mod config;
pub mod cost;
pub mod graph;
pub mod overlay;
pub mod placement;
pub mod refinement;
pub mod routing;
pub mod selection;
pub mod telemetry;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a peer slot on the ring, in `[0, N)`.
pub type Slot = usize;

/// Map a continuous identifier to its peer slot: `ceil(identifier * N) mod N`.
///
/// Identifiers outside `[0, 1)` are wrapped onto the unit circle first.
pub fn ring_slot(identifier: f64, peers: usize) -> Slot {
    debug_assert!(peers > 0);
    let id = normalize_identifier(identifier);
    ((id * peers as f64).ceil() as usize) % peers
}

/// Clockwise slot distance from `from` to `to`: `(to - from) mod N`.
pub fn clockwise_slot_distance(from: Slot, to: Slot, peers: usize) -> usize {
    (to + peers - from % peers) % peers
}

/// Clockwise distance on the unit circle: `(to - from) mod 1`.
pub fn clockwise_identifier_distance(from: f64, to: f64) -> f64 {
    normalize_identifier(to - from)
}

/// Wrap a value onto `[0, 1)`.
pub fn normalize_identifier(value: f64) -> f64 {
    let wrapped = value.rem_euclid(1.0);
    // rem_euclid can round up to exactly 1.0 for tiny negative inputs
    if wrapped >= 1.0 {
        0.0
    } else {
        wrapped
    }
}

/// Reasons a random draw is thrown away and sampled again.
///
/// None of these surface as errors; they are logged at `trace` level and
/// counted by the loops that hit them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Redraw {
    /// The resolved peer hosts no social node.
    EmptyCandidateBucket,
    /// The draw picked the source node or peer itself.
    SelfReference,
    /// The link target already holds `k` in-links.
    SaturatedLinkTarget,
    /// The source peer already links to the target.
    DuplicateLink,
    /// The candidate was already swapped this round.
    AlreadySwapped,
}

impl fmt::Display for Redraw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Redraw::EmptyCandidateBucket => write!(f, "EMPTY_CANDIDATE_BUCKET"),
            Redraw::SelfReference => write!(f, "SELF_REFERENCE"),
            Redraw::SaturatedLinkTarget => write!(f, "SATURATED_LINK_TARGET"),
            Redraw::DuplicateLink => write!(f, "DUPLICATE_LINK"),
            Redraw::AlreadySwapped => write!(f, "ALREADY_SWAPPED"),
        }
    }
}
