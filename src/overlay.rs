//! Symphony ring overlay
//!
//! N peers on a ring, each with its successor/predecessor short links and
//! exactly `k` long links whose clockwise length follows the harmonic
//! distribution `p(d) ∝ 1/d`. Peers are addressed by slot index and links
//! are stored as slot lists, so the structure holds no references.
//!
//! Reference: Manku, Bawa, Raghavan, "Symphony: Distributed Hashing in a
//! Small World" (2003)

use crate::graph::NodeId;
use crate::{ring_slot, Redraw, Slot};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, trace};

/// Default number of harmonic samples per long link before falling back to
/// a deterministic scan.
pub const DEFAULT_MAX_LINK_DRAWS: usize = 4096;

/// Overlay construction and validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OverlayError {
    #[error("Invalid overlay parameters: {peers} peers with {links} links each (need peers >= 2, 1 <= links < peers)")]
    InvalidParameters { peers: usize, links: usize },

    #[error("Link {from} -> {to} rejected: {reason}")]
    InvalidLink { from: Slot, to: Slot, reason: Redraw },

    #[error("Peer {peer} has {actual} long links, expected {expected}")]
    WrongOutDegree {
        peer: Slot,
        actual: usize,
        expected: usize,
    },

    #[error("Construction exhausted at peer {peer} with {out_degree} links after {draws} draws")]
    ConstructionExhausted {
        peer: Slot,
        out_degree: usize,
        draws: usize,
    },

    #[error("Overlay invariant violated: {0}")]
    InvariantViolated(String),
}

/// A ring slot.
#[derive(Debug, Clone)]
pub struct Peer {
    slot: Slot,
    predecessor: Slot,
    successor: Slot,
    out_links: Vec<Slot>,
    in_links: Vec<Slot>,
    residents: Vec<NodeId>,
}

impl Peer {
    fn new(slot: Slot, peers: usize, capacity: usize) -> Self {
        Self {
            slot,
            predecessor: (slot + peers - 1) % peers,
            successor: (slot + 1) % peers,
            out_links: Vec::with_capacity(capacity),
            in_links: Vec::with_capacity(capacity),
            residents: Vec::new(),
        }
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }

    pub fn predecessor(&self) -> Slot {
        self.predecessor
    }

    pub fn successor(&self) -> Slot {
        self.successor
    }

    pub fn out_links(&self) -> &[Slot] {
        &self.out_links
    }

    pub fn in_links(&self) -> &[Slot] {
        &self.in_links
    }

    pub fn out_degree(&self) -> usize {
        self.out_links.len()
    }

    pub fn in_degree(&self) -> usize {
        self.in_links.len()
    }

    /// Social nodes whose identifier currently maps to this slot.
    pub fn residents(&self) -> &[NodeId] {
        &self.residents
    }

    /// Successor followed by the long links; the routing table.
    pub fn forwarding_candidates(&self) -> impl Iterator<Item = Slot> + '_ {
        std::iter::once(self.successor).chain(self.out_links.iter().copied())
    }
}

/// Counters gathered while sampling long links.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildStats {
    pub draws: usize,
    pub redraws: HashMap<Redraw, usize>,
    /// Links placed by the clockwise scan after the sampling budget ran out
    pub scan_fallbacks: usize,
    /// Links placed by rewiring an existing link
    pub rewires: usize,
}

/// The Symphony ring.
#[derive(Debug, Clone)]
pub struct Overlay {
    peers: Vec<Peer>,
    links_per_peer: usize,
    stats: BuildStats,
}

impl Overlay {
    /// Build an overlay of `peers` slots with `links` long links each.
    pub fn build<R: Rng + ?Sized>(
        peers: usize,
        links: usize,
        rng: &mut R,
    ) -> Result<Self, OverlayError> {
        Self::build_with_budget(peers, links, DEFAULT_MAX_LINK_DRAWS, rng)
    }

    /// Build with an explicit per-link sampling budget.
    pub fn build_with_budget<R: Rng + ?Sized>(
        peers: usize,
        links: usize,
        max_draws: usize,
        rng: &mut R,
    ) -> Result<Self, OverlayError> {
        let mut overlay = Self::ring(peers, links)?;

        for i in 0..peers {
            while overlay.peers[i].out_degree() < links {
                if overlay.sample_link(i, max_draws, rng) {
                    continue;
                }
                if overlay.attach_first_eligible(i) {
                    overlay.stats.scan_fallbacks += 1;
                    continue;
                }
                if overlay.rewire_for(i) {
                    overlay.stats.rewires += 1;
                    continue;
                }
                return Err(OverlayError::ConstructionExhausted {
                    peer: i,
                    out_degree: overlay.peers[i].out_degree(),
                    draws: overlay.stats.draws,
                });
            }
        }

        info!(
            peers,
            links,
            draws = overlay.stats.draws,
            scan_fallbacks = overlay.stats.scan_fallbacks,
            rewires = overlay.stats.rewires,
            "Symphony overlay built"
        );
        Ok(overlay)
    }

    /// Build from an explicit long-link table, one list per slot.
    ///
    /// Every list must have the same length `k`, and the table must respect
    /// the same rules as sampled construction.
    pub fn from_long_links(links: Vec<Vec<Slot>>) -> Result<Self, OverlayError> {
        let peers = links.len();
        let k = links.first().map(Vec::len).unwrap_or(0);
        let mut overlay = Self::ring(peers, k)?;

        for (from, targets) in links.into_iter().enumerate() {
            if targets.len() != k {
                return Err(OverlayError::WrongOutDegree {
                    peer: from,
                    actual: targets.len(),
                    expected: k,
                });
            }
            for to in targets {
                if to >= peers {
                    return Err(OverlayError::InvariantViolated(format!(
                        "link target {} outside ring of {}",
                        to, peers
                    )));
                }
                overlay
                    .try_attach(from, to)
                    .map_err(|reason| OverlayError::InvalidLink { from, to, reason })?;
            }
        }
        Ok(overlay)
    }

    /// Ring of short links with no long links yet.
    fn ring(peers: usize, links: usize) -> Result<Self, OverlayError> {
        if peers < 2 || links == 0 || links >= peers {
            return Err(OverlayError::InvalidParameters { peers, links });
        }
        Ok(Self {
            peers: (0..peers).map(|slot| Peer::new(slot, peers, links)).collect(),
            links_per_peer: links,
            stats: BuildStats::default(),
        })
    }

    /// Draw up to `max_draws` harmonic samples for one link of peer `from`.
    fn sample_link<R: Rng + ?Sized>(&mut self, from: Slot, max_draws: usize, rng: &mut R) -> bool {
        let n = self.peers.len();
        for _ in 0..max_draws {
            self.stats.draws += 1;
            let target = (from + sample_link_distance(n, rng)) % n;
            match self.try_attach(from, target) {
                Ok(()) => return true,
                Err(reason) => {
                    trace!(from, to = target, %reason, "long link redraw");
                    *self.stats.redraws.entry(reason).or_insert(0) += 1;
                }
            }
        }
        false
    }

    fn try_attach(&mut self, from: Slot, to: Slot) -> Result<(), Redraw> {
        if from == to {
            return Err(Redraw::SelfReference);
        }
        if self.peers[to].in_degree() >= self.links_per_peer {
            return Err(Redraw::SaturatedLinkTarget);
        }
        if self.peers[from].out_links.contains(&to) {
            return Err(Redraw::DuplicateLink);
        }
        self.peers[from].out_links.push(to);
        self.peers[to].in_links.push(from);
        Ok(())
    }

    /// Attach `from` to the first eligible peer clockwise.
    fn attach_first_eligible(&mut self, from: Slot) -> bool {
        let n = self.peers.len();
        (1..n).any(|d| self.try_attach(from, (from + d) % n).is_ok())
    }

    /// Free up a target for `i` when every unsaturated peer is `i` itself or
    /// already linked by `i`: move some link `a -> b` onto an unsaturated
    /// `u`, then link `i -> b`. In-degree of `b` is unchanged and `u` stays
    /// within capacity.
    fn rewire_for(&mut self, i: Slot) -> bool {
        let k = self.links_per_peer;
        let unsaturated: Vec<Slot> = (0..self.peers.len())
            .filter(|&p| self.peers[p].in_degree() < k)
            .collect();

        for &u in &unsaturated {
            for a in 0..self.peers.len() {
                if a == i || a == u || self.peers[a].out_links.contains(&u) {
                    continue;
                }
                let position = self.peers[a].out_links.iter().position(|&b| {
                    b != i && !self.peers[i].out_links.contains(&b)
                });
                if let Some(idx) = position {
                    let b = self.peers[a].out_links[idx];
                    self.peers[a].out_links[idx] = u;
                    if let Some(pos) = self.peers[b].in_links.iter().position(|&s| s == a) {
                        self.peers[b].in_links.swap_remove(pos);
                    }
                    self.peers[u].in_links.push(a);
                    self.peers[i].out_links.push(b);
                    self.peers[b].in_links.push(i);
                    debug!(peer = i, rewired_from = a, old = b, new = u, "long link rewired");
                    return true;
                }
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Long links per peer (`k`).
    pub fn links_per_peer(&self) -> usize {
        self.links_per_peer
    }

    pub fn peer(&self, slot: Slot) -> &Peer {
        &self.peers[slot]
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn build_stats(&self) -> &BuildStats {
        &self.stats
    }

    /// Slot responsible for `identifier`.
    pub fn slot_of(&self, identifier: f64) -> Slot {
        ring_slot(identifier, self.peers.len())
    }

    pub fn residents(&self, slot: Slot) -> &[NodeId] {
        &self.peers[slot].residents
    }

    /// Total number of resident entries across all peers.
    pub fn resident_count(&self) -> usize {
        self.peers.iter().map(|p| p.residents.len()).sum()
    }

    /// Record `node` as resident of the slot for `identifier`.
    pub fn place(&mut self, node: NodeId, identifier: f64) -> Slot {
        let slot = self.slot_of(identifier);
        let residents = &mut self.peers[slot].residents;
        if !residents.contains(&node) {
            residents.push(node);
        }
        slot
    }

    /// Drop every residency, keeping links.
    pub fn clear_residents(&mut self) {
        for peer in &mut self.peers {
            peer.residents.clear();
        }
    }

    /// Move `node` from `from` to `to`. Returns false if it was not resident
    /// at `from`.
    pub(crate) fn move_resident(&mut self, node: NodeId, from: Slot, to: Slot) -> bool {
        let residents = &mut self.peers[from].residents;
        let Some(pos) = residents.iter().position(|&r| r == node) else {
            return false;
        };
        residents.remove(pos);
        let target = &mut self.peers[to].residents;
        if !target.contains(&node) {
            target.push(node);
        }
        true
    }

    /// Check ring and link invariants.
    pub fn validate(&self) -> Result<(), OverlayError> {
        let n = self.peers.len();
        let k = self.links_per_peer;

        for peer in &self.peers {
            if self.peers[peer.successor].predecessor != peer.slot {
                return Err(OverlayError::InvariantViolated(format!(
                    "successor of {} does not point back",
                    peer.slot
                )));
            }
            if peer.out_degree() != k {
                return Err(OverlayError::WrongOutDegree {
                    peer: peer.slot,
                    actual: peer.out_degree(),
                    expected: k,
                });
            }
            if peer.in_degree() > k {
                return Err(OverlayError::InvariantViolated(format!(
                    "peer {} has in-degree {} > {}",
                    peer.slot,
                    peer.in_degree(),
                    k
                )));
            }
            for (idx, &to) in peer.out_links.iter().enumerate() {
                if to == peer.slot || peer.out_links[..idx].contains(&to) {
                    return Err(OverlayError::InvariantViolated(format!(
                        "peer {} has a self or duplicate link to {}",
                        peer.slot, to
                    )));
                }
                if !self.peers[to].in_links.contains(&peer.slot) {
                    return Err(OverlayError::InvariantViolated(format!(
                        "link {} -> {} missing its back-pointer",
                        peer.slot, to
                    )));
                }
            }
        }

        let mut seen = vec![false; n];
        let mut current = 0;
        for _ in 0..n {
            if seen[current] {
                return Err(OverlayError::InvariantViolated(format!(
                    "successor chain revisits {}",
                    current
                )));
            }
            seen[current] = true;
            current = self.peers[current].successor;
        }
        if current != 0 {
            return Err(OverlayError::InvariantViolated(
                "successor chain does not close".to_string(),
            ));
        }
        Ok(())
    }
}

/// Harmonic link length `ceil(N * exp(ln(N) * (U - 1)))`, in `[1, N]`.
pub fn sample_link_distance<R: Rng + ?Sized>(peers: usize, rng: &mut R) -> usize {
    let n = peers as f64;
    let u: f64 = rng.gen();
    let d = (n * (n.ln() * (u - 1.0)).exp()).ceil() as usize;
    d.clamp(1, peers)
}
