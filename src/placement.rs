//! Identifier assignment and residency
//!
//! Every mutation of a node's identifier after linking goes through
//! [`exchange`], which moves the overlay residency in the same step.

use crate::graph::{NodeId, SocialGraph};
use crate::overlay::Overlay;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use tracing::{debug, warn};

/// How initial identifiers are chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Placement {
    /// Uniform random in `[0, 1)`
    #[default]
    Random,
    /// SHA-256 of the node label, consistent-hashing style
    Hashed,
}

impl FromStr for Placement {
    type Err = crate::config::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(Placement::Random),
            "hashed" | "hash" => Ok(Placement::Hashed),
            _ => Err(crate::config::ConfigError::UnknownPlacement(s.to_string())),
        }
    }
}

impl TryFrom<String> for Placement {
    type Error = crate::config::ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Give every node a fresh uniform identifier.
pub fn assign_random_identifiers<R: Rng + ?Sized>(graph: &mut SocialGraph, rng: &mut R) {
    let ids: Vec<NodeId> = graph.node_ids().collect();
    for id in ids {
        graph.set_identifier(id, rng.gen::<f64>());
    }
}

/// Derive every identifier from a hash of the node label.
pub fn assign_hashed_identifiers(graph: &mut SocialGraph) {
    let ids: Vec<NodeId> = graph.node_ids().collect();
    for id in ids {
        let identifier = hashed_identifier(graph.label(id));
        graph.set_identifier(id, identifier);
    }
}

/// Assign identifiers with the given strategy.
pub fn assign_identifiers<R: Rng + ?Sized>(
    graph: &mut SocialGraph,
    placement: Placement,
    rng: &mut R,
) {
    match placement {
        Placement::Random => assign_random_identifiers(graph, rng),
        Placement::Hashed => assign_hashed_identifiers(graph),
    }
}

/// Map a label into `[0, 1)` using the top 53 bits of its SHA-256 digest.
pub fn hashed_identifier(label: u64) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(label.to_be_bytes());
    let hash = hasher.finalize();

    let hash_value = u64::from_be_bytes([
        hash[0], hash[1], hash[2], hash[3], hash[4], hash[5], hash[6], hash[7],
    ]);
    (hash_value >> 11) as f64 / (1u64 << 53) as f64
}

/// Place every graph node on the peer responsible for its identifier.
///
/// Existing residency is cleared first, so relinking is idempotent.
pub fn link_overlay(graph: &SocialGraph, overlay: &mut Overlay) {
    overlay.clear_residents();
    for id in graph.node_ids() {
        overlay.place(id, graph.identifier(id));
    }
    debug!(
        nodes = graph.node_count(),
        occupied = overlay.peers().iter().filter(|p| !p.residents().is_empty()).count(),
        "social graph linked to overlay"
    );
}

/// Swap the identifiers of `i` and `j` and move both residencies.
///
/// After the call `i` lives on the peer that hosted `j` and vice versa.
/// Calling it twice restores the original state. Returns false and changes
/// nothing when `i == j` or when either node is not resident on the peer its
/// identifier maps to.
pub fn exchange(graph: &mut SocialGraph, overlay: &mut Overlay, i: NodeId, j: NodeId) -> bool {
    if i == j {
        return false;
    }
    let id_i = graph.identifier(i);
    let id_j = graph.identifier(j);
    let slot_i = overlay.slot_of(id_i);
    let slot_j = overlay.slot_of(id_j);

    if !overlay.residents(slot_i).contains(&i) || !overlay.residents(slot_j).contains(&j) {
        warn!(i = %i, j = %j, slot_i, slot_j, "exchange refused: residency out of step");
        return false;
    }

    if slot_i != slot_j {
        let moved = overlay.move_resident(i, slot_i, slot_j)
            && overlay.move_resident(j, slot_j, slot_i);
        debug_assert!(moved, "residency checked before the move");
    }
    graph.set_identifier(i, id_j);
    graph.set_identifier(j, id_i);
    true
}
