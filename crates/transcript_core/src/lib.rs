//! Core of the transcription editor for civil-status and notarial actes.
//! This crate owns the Document → Section → Bloc tree invariants: dense
//! sibling ordering, status rollup, and store synchronization.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod mutation;
pub mod ordering;
pub mod repo;
pub mod rollup;
pub mod service;

pub use config::{ConfigError, CoreConfig, ReconcilePolicy};
pub use logging::{
    default_log_level, init_logging, init_logging_from_config, logging_status, ActiveLogging,
    LoggingError,
};
pub use model::ids::{ActeId, IdGenerator, NodeId, UuidGenerator};
pub use model::status::Status;
pub use model::tree::{
    Annotation, Bloc, BlocKind, Document, LevelSummary, NodeLevel, Section, StatusSummary,
    TranscriptionTree,
};
pub use mutation::{MutationError, MutationPlan, RollupTarget};
pub use repo::transcription_repo::{
    BlocRow, DocumentRow, NodeRow, RemoteWrite, SectionRow, SqliteTranscriptionStore,
    StoreError, StoreResult, TranscriptionStore,
};
pub use service::loader::load_tree;
pub use service::session::{
    Operation, SessionError, SessionResult, SyncOutcome, TranscriptionSession, TreeEvent,
    TreeListener,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
