//! Sibling ordering engine.
//!
//! # Responsibility
//! - Assign dense 1-based positions to a sibling list in its current order.
//! - Provide deterministic sorting for lists read back from the store.
//!
//! # Invariants
//! - After `reindex`, positions are exactly `1..=len` in slice order.
//! - No validation of duplicate ids; callers pass each sibling once.

use crate::model::ids::NodeId;
use crate::model::tree::{Bloc, Document, Section};

/// Node that carries a sibling position.
pub trait Positioned {
    fn node_id(&self) -> NodeId;
    fn position(&self) -> i64;
    fn set_position(&mut self, position: i64);
}

impl Positioned for Document {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn position(&self) -> i64 {
        self.position
    }

    fn set_position(&mut self, position: i64) {
        self.position = position;
    }
}

impl Positioned for Section {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn position(&self) -> i64 {
        self.position
    }

    fn set_position(&mut self, position: i64) {
        self.position = position;
    }
}

impl Positioned for Bloc {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn position(&self) -> i64 {
        self.position
    }

    fn set_position(&mut self, position: i64) {
        self.position = position;
    }
}

/// Sets every node's position to its 1-based index in the slice.
pub fn reindex<T: Positioned>(nodes: &mut [T]) {
    for (index, node) in nodes.iter_mut().enumerate() {
        node.set_position(index as i64 + 1);
    }
}

/// Returns `(id, position)` pairs in slice order, as sent to bulk upserts.
pub fn position_pairs<T: Positioned>(nodes: &[T]) -> Vec<(NodeId, i64)> {
    nodes
        .iter()
        .map(|node| (node.node_id(), node.position()))
        .collect()
}

/// Sorts by `position ASC, id ASC`.
pub fn sort_by_position<T: Positioned>(nodes: &mut [T]) {
    nodes.sort_by(|left, right| {
        left.position()
            .cmp(&right.position())
            .then_with(|| left.node_id().cmp(&right.node_id()))
    });
}

/// Whether positions are exactly `1..=len` in slice order.
pub fn is_dense<T: Positioned>(nodes: &[T]) -> bool {
    nodes
        .iter()
        .enumerate()
        .all(|(index, node)| node.position() == index as i64 + 1)
}

/// Clamps an optional insert index to `0..=len`, defaulting to the end.
pub fn insert_index(requested: Option<usize>, len: usize) -> usize {
    requested.map_or(len, |index| index.min(len))
}
