//! Remote store contracts and persistence implementations.
//!
//! # Responsibility
//! - Define the primitive row operations the synchronization layer relies on.
//! - Isolate SQL details from tree mutation and session orchestration.
//!
//! # Invariants
//! - Writes are single-row (insert/update/delete) or one bulk position upsert.
//! - Read paths reject invalid persisted data instead of masking it.

pub mod transcription_repo;
