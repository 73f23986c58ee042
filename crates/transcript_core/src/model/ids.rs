//! Node identity and identifier generation.

use uuid::Uuid;

/// Stable identifier of a Document, Section, Bloc, or Annotation.
pub type NodeId = Uuid;

/// Identifier of the owning record (acte) a tree belongs to.
pub type ActeId = Uuid;

/// Source of fresh node identifiers.
///
/// Implementations must never return the same id twice.
pub trait IdGenerator {
    fn next_id(&self) -> NodeId;
}

/// Default generator backed by random v4 UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> NodeId {
        Uuid::new_v4()
    }
}
