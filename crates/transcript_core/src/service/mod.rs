//! Transcription use-case services.
//!
//! # Responsibility
//! - Rebuild trees from the store (`loader`).
//! - Orchestrate optimistic mutation, persistence, rollup, and reconciliation
//!   for one open acte (`session`).

pub mod loader;
pub mod session;
