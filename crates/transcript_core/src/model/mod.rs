//! Transcription tree domain model.
//!
//! # Responsibility
//! - Define the Document → Section → Bloc tree held in memory for one acte.
//! - Define the completion status shared by all three levels.
//!
//! # Invariants
//! - Every node is identified by a stable `NodeId` that is never reused.
//! - Sibling `position` values are dense `1..=N` after every mutation.
//! - Parent pointers match the container that holds the node.

pub mod ids;
pub mod status;
pub mod tree;
