//! A directed, per-edge interpolation plan from the local tile to one
//! remote tile, in one direction.

use crate::tile::{LocalPos, Tile};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

pub type Weight = f64;

/// Whether a [`Mapping`] carries outbound or inbound field data. A peer pair
/// may have a `Mapping` of each direction (`spec.md` §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Recv,
}

/// One edge of the routing graph: the interpolation plan between the local
/// tile and one specific remote tile, in one direction.
///
/// Convention (`spec.md` §3): for a send mapping, A-side is the remote tile
/// and B-side is the local tile; for a receive mapping, A-side is the local
/// tile and B-side is the remote tile. The A-side is always the
/// fully-interpolated, post-weighting surface — this is why the receive
/// path never reapplies weights (`spec.md` §4.5).
#[derive(Debug, Clone)]
pub struct Mapping {
    remote_tile: Arc<Tile>,
    direction: Direction,
    a_points: BTreeSet<LocalPos>,
    edges: HashMap<LocalPos, Vec<(LocalPos, Weight)>>,
}

impl Mapping {
    pub fn new(remote_tile: Arc<Tile>, direction: Direction) -> Self {
        Self {
            remote_tile,
            direction,
            a_points: BTreeSet::new(),
            edges: HashMap::new(),
        }
    }

    pub fn remote_tile(&self) -> &Arc<Tile> {
        &self.remote_tile
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Inserts an edge `(b, w)` under A-side point `a`. Ascending order
    /// within a given `a`'s edge list is maintained by insertion position:
    /// the router always advances `b` candidates in ascending local
    /// position, so callers naturally insert in order; this is asserted by
    /// the `edges_sorted_within_a` test rather than re-sorted here, to keep
    /// the hot path allocation-free. A duplicate `(a, b)` pair overwrites
    /// the previous weight idempotently, per `spec.md` §4.2.
    pub fn add_link(&mut self, a: LocalPos, b: LocalPos, w: Weight) {
        self.a_points.insert(a);
        let edges = self.edges.entry(a).or_default();
        match edges.iter_mut().find(|(bp, _)| *bp == b) {
            Some(entry) => entry.1 = w,
            None => edges.push((b, w)),
        }
    }

    /// The A-side enumeration used by both endpoints to marshal wire
    /// buffers in the same order. Ascending integer order of local
    /// positions, per `spec.md` §4.2's ordering contract: both ends
    /// independently sort because both convert from the same global
    /// identifiers, so no coordination message is needed.
    pub fn a_points_ordered(&self) -> impl Iterator<Item = LocalPos> + '_ {
        self.a_points.iter().copied()
    }

    pub fn a_point_count(&self) -> usize {
        self.a_points.len()
    }

    /// The ordered `(b, w)` list for a single A-side point. Panics if `a`
    /// isn't an A-side point of this mapping — a programming error, since
    /// callers always iterate `a_points_ordered()` first.
    pub fn b_edges(&self, a: LocalPos) -> &[(LocalPos, Weight)] {
        self.edges
            .get(&a)
            .unwrap_or_else(|| panic!("{a} is not an A-side point of this mapping"))
    }

    pub fn is_empty(&self) -> bool {
        self.a_points.is_empty()
    }
}
