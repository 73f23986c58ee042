//! Editing session for one acte: optimistic mutation, persistence, rollup,
//! and reconciliation.
//!
//! # Responsibility
//! - Expose the mutation API over the in-memory tree of the open acte.
//! - Mirror every mutation to the store after it is visible locally.
//! - Replace the local tree with the store's tree when a write fails.
//!
//! # Invariants
//! - Single writer: every mutator takes `&mut self`.
//! - Listeners see `Optimistic` before any store write is issued.
//! - Store write failures never surface as errors; they end in
//!   `SyncOutcome::Reconciled`.
//! - Status rollup runs only after the mutation's writes succeeded.
//! - Trees read from the store are re-indexed to dense positions before use.

use crate::config::ReconcilePolicy;
use crate::model::ids::{ActeId, IdGenerator, NodeId, UuidGenerator};
use crate::model::status::Status;
use crate::model::tree::{BlocKind, NodeLevel, TranscriptionTree};
use crate::mutation::{self, MutationError, MutationResult, RollupTarget};
use crate::repo::transcription_repo::{NodeRow, RemoteWrite, StoreError, TranscriptionStore};
use crate::rollup::{rollup_document, rollup_section, StatusChange};
use crate::service::loader::load_tree;
use log::{debug, error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;

/// Session mutation kinds, used in events and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    AddDocument,
    AddSection,
    AddBloc,
    DeleteDocument,
    DeleteSection,
    DeleteBloc,
    DuplicateDocument,
    DuplicateSection,
    DuplicateBloc,
    MoveBloc,
    ReorderDocuments,
    ReorderSections,
    ReorderBlocs,
    RenameDocument,
    RenameSection,
    UpdateBlocContent,
    UpdateBlocKind,
    SetDocumentStatus,
    SetSectionStatus,
    SetBlocStatus,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AddDocument => "add_document",
            Self::AddSection => "add_section",
            Self::AddBloc => "add_bloc",
            Self::DeleteDocument => "delete_document",
            Self::DeleteSection => "delete_section",
            Self::DeleteBloc => "delete_bloc",
            Self::DuplicateDocument => "duplicate_document",
            Self::DuplicateSection => "duplicate_section",
            Self::DuplicateBloc => "duplicate_bloc",
            Self::MoveBloc => "move_bloc",
            Self::ReorderDocuments => "reorder_documents",
            Self::ReorderSections => "reorder_sections",
            Self::ReorderBlocs => "reorder_blocs",
            Self::RenameDocument => "rename_document",
            Self::RenameSection => "rename_section",
            Self::UpdateBlocContent => "update_bloc_content",
            Self::UpdateBlocKind => "update_bloc_kind",
            Self::SetDocumentStatus => "set_document_status",
            Self::SetSectionStatus => "set_section_status",
            Self::SetBlocStatus => "set_bloc_status",
        }
    }

    /// Whether the operation changes tree shape or sibling order.
    pub fn is_structural(self) -> bool {
        matches!(
            self,
            Self::AddDocument
                | Self::AddSection
                | Self::AddBloc
                | Self::DeleteDocument
                | Self::DeleteSection
                | Self::DeleteBloc
                | Self::DuplicateDocument
                | Self::DuplicateSection
                | Self::DuplicateBloc
                | Self::MoveBloc
                | Self::ReorderDocuments
                | Self::ReorderSections
                | Self::ReorderBlocs
        )
    }
}

/// Tree change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeEvent {
    /// Tree replaced by an explicit load or reload.
    Loaded,
    /// Local mutation applied; store writes not yet issued.
    Optimistic(Operation),
    /// Store writes and rollup for the operation succeeded.
    Persisted(Operation),
    /// Tree replaced by the store's tree after the operation.
    Reconciled(Operation),
}

/// Observer of tree changes, e.g. an editor view.
pub trait TreeListener {
    fn on_tree_event(&self, event: TreeEvent, tree: &TranscriptionTree);
}

/// Final state of one mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Store accepted every write. `created` is the new subtree root, if any.
    Persisted { created: Option<NodeId> },
    /// A write failed and the tree now mirrors the store.
    Reconciled,
}

impl SyncOutcome {
    pub fn created(self) -> Option<NodeId> {
        match self {
            Self::Persisted { created } => created,
            Self::Reconciled => None,
        }
    }

    pub fn is_reconciled(self) -> bool {
        matches!(self, Self::Reconciled)
    }
}

/// Errors surfaced to session callers.
#[derive(Debug)]
pub enum SessionError {
    /// No acte is open.
    NoTreeLoaded,
    /// Target node missing or invalid reorder; the tree is unchanged.
    Mutation(MutationError),
    /// Loading the tree from the store failed.
    Load(StoreError),
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoTreeLoaded => write!(f, "no transcription tree is loaded"),
            Self::Mutation(err) => write!(f, "{err}"),
            Self::Load(err) => write!(f, "failed to load transcription tree: {err}"),
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::NoTreeLoaded => None,
            Self::Mutation(err) => Some(err),
            Self::Load(err) => Some(err),
        }
    }
}

impl From<MutationError> for SessionError {
    fn from(value: MutationError) -> Self {
        Self::Mutation(value)
    }
}

pub type SessionResult = Result<SyncOutcome, SessionError>;

/// Editing session bound to one store.
pub struct TranscriptionSession<S: TranscriptionStore> {
    store: S,
    ids: Box<dyn IdGenerator>,
    policy: ReconcilePolicy,
    acte_id: Option<ActeId>,
    tree: Option<TranscriptionTree>,
    focused_bloc: Option<NodeId>,
    listeners: Vec<Arc<dyn TreeListener>>,
}

impl<S: TranscriptionStore> TranscriptionSession<S> {
    /// Creates a session with random ids and `OnFailure` reconciliation.
    pub fn new(store: S) -> Self {
        Self {
            store,
            ids: Box::new(UuidGenerator),
            policy: ReconcilePolicy::default(),
            acte_id: None,
            tree: None,
            focused_bloc: None,
            listeners: Vec::new(),
        }
    }

    pub fn with_id_generator(mut self, ids: Box<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_policy(mut self, policy: ReconcilePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> ReconcilePolicy {
        self.policy
    }

    /// Open acte, kept even when the last reconciliation read failed.
    pub fn acte_id(&self) -> Option<ActeId> {
        self.acte_id
    }

    /// Current tree, including optimistic changes not yet persisted.
    pub fn tree(&self) -> Option<&TranscriptionTree> {
        self.tree.as_ref()
    }

    pub fn focused_bloc(&self) -> Option<NodeId> {
        self.focused_bloc
    }

    /// Moves focus to a Bloc of the open tree, or clears it with `None`.
    pub fn focus_bloc(&mut self, bloc_id: Option<NodeId>) -> Result<(), SessionError> {
        let tree = self.tree.as_ref().ok_or(SessionError::NoTreeLoaded)?;
        if let Some(id) = bloc_id {
            if tree.bloc(id).is_none() {
                return Err(MutationError::NodeNotFound {
                    level: NodeLevel::Bloc,
                    id,
                }
                .into());
            }
        }
        self.focused_bloc = bloc_id;
        Ok(())
    }

    pub fn subscribe(&mut self, listener: Arc<dyn TreeListener>) {
        self.listeners.push(listener);
    }

    /// Opens `acte_id`, replacing any tree held so far.
    pub fn load(&mut self, acte_id: ActeId) -> Result<(), SessionError> {
        self.acte_id = Some(acte_id);
        self.focused_bloc = None;
        self.tree = None;
        let mut tree = load_tree(&self.store, acte_id).map_err(SessionError::Load)?;
        self.repair_positions(&mut tree);
        self.tree = Some(tree);
        self.notify(TreeEvent::Loaded);
        Ok(())
    }

    /// Re-reads the open acte from the store.
    pub fn reload(&mut self) -> Result<(), SessionError> {
        let acte_id = self.acte_id.ok_or(SessionError::NoTreeLoaded)?;
        let focused = self.focused_bloc;
        self.load(acte_id)?;
        self.focused_bloc = focused;
        self.refresh_focus();
        Ok(())
    }

    pub fn add_document(&mut self, title: &str, index: Option<usize>) -> SessionResult {
        self.run(Operation::AddDocument, |tree, ids| {
            Ok(mutation::add_document(tree, ids, title, index))
        })
    }

    pub fn add_section(
        &mut self,
        document_id: NodeId,
        title: &str,
        index: Option<usize>,
        with_initial_bloc: bool,
    ) -> SessionResult {
        self.run(Operation::AddSection, |tree, ids| {
            mutation::add_section(tree, ids, document_id, title, index, with_initial_bloc)
        })
    }

    /// Adds a Bloc and focuses it once persisted.
    pub fn add_bloc(
        &mut self,
        section_id: NodeId,
        kind: BlocKind,
        content: &str,
        index: Option<usize>,
    ) -> SessionResult {
        let outcome = self.run(Operation::AddBloc, |tree, ids| {
            mutation::add_bloc(tree, ids, section_id, kind, content, index)
        })?;
        if let Some(created) = outcome.created() {
            if self.tree.as_ref().is_some_and(|tree| tree.bloc(created).is_some()) {
                self.focused_bloc = Some(created);
            }
        }
        Ok(outcome)
    }

    pub fn delete_document(&mut self, document_id: NodeId) -> SessionResult {
        self.run(Operation::DeleteDocument, |tree, _| {
            mutation::delete_document(tree, document_id)
        })
    }

    pub fn delete_section(&mut self, section_id: NodeId) -> SessionResult {
        self.run(Operation::DeleteSection, |tree, _| {
            mutation::delete_section(tree, section_id)
        })
    }

    pub fn delete_bloc(&mut self, bloc_id: NodeId) -> SessionResult {
        self.run(Operation::DeleteBloc, |tree, _| {
            mutation::delete_bloc(tree, bloc_id)
        })
    }

    pub fn duplicate_document(&mut self, document_id: NodeId) -> SessionResult {
        self.run(Operation::DuplicateDocument, |tree, ids| {
            mutation::duplicate_document(tree, ids, document_id)
        })
    }

    pub fn duplicate_section(&mut self, section_id: NodeId) -> SessionResult {
        self.run(Operation::DuplicateSection, |tree, ids| {
            mutation::duplicate_section(tree, ids, section_id)
        })
    }

    pub fn duplicate_bloc(&mut self, bloc_id: NodeId) -> SessionResult {
        self.run(Operation::DuplicateBloc, |tree, ids| {
            mutation::duplicate_bloc(tree, ids, bloc_id)
        })
    }

    /// Moves a Bloc into `target_section_id` at `index` (default: end).
    pub fn move_bloc(
        &mut self,
        bloc_id: NodeId,
        target_section_id: NodeId,
        index: Option<usize>,
    ) -> SessionResult {
        self.run(Operation::MoveBloc, |tree, _| {
            mutation::move_bloc(tree, bloc_id, target_section_id, index)
        })
    }

    pub fn reorder_documents(&mut self, order: &[NodeId]) -> SessionResult {
        self.run(Operation::ReorderDocuments, |tree, _| {
            mutation::reorder_documents(tree, order)
        })
    }

    pub fn reorder_sections(&mut self, document_id: NodeId, order: &[NodeId]) -> SessionResult {
        self.run(Operation::ReorderSections, |tree, _| {
            mutation::reorder_sections(tree, document_id, order)
        })
    }

    pub fn reorder_blocs(&mut self, section_id: NodeId, order: &[NodeId]) -> SessionResult {
        self.run(Operation::ReorderBlocs, |tree, _| {
            mutation::reorder_blocs(tree, section_id, order)
        })
    }

    pub fn rename_document(&mut self, document_id: NodeId, title: &str) -> SessionResult {
        self.run(Operation::RenameDocument, |tree, _| {
            mutation::rename_document(tree, document_id, title)
        })
    }

    pub fn rename_section(&mut self, section_id: NodeId, title: &str) -> SessionResult {
        self.run(Operation::RenameSection, |tree, _| {
            mutation::rename_section(tree, section_id, title)
        })
    }

    pub fn update_bloc_content(&mut self, bloc_id: NodeId, content: &str) -> SessionResult {
        self.run(Operation::UpdateBlocContent, |tree, _| {
            mutation::update_bloc_content(tree, bloc_id, content)
        })
    }

    pub fn update_bloc_kind(&mut self, bloc_id: NodeId, kind: BlocKind) -> SessionResult {
        self.run(Operation::UpdateBlocKind, |tree, _| {
            mutation::update_bloc_kind(tree, bloc_id, kind)
        })
    }

    /// Explicit status change, e.g. a reviewer marking a Document done.
    pub fn set_document_status(&mut self, document_id: NodeId, status: Status) -> SessionResult {
        self.run(Operation::SetDocumentStatus, |tree, _| {
            mutation::set_document_status(tree, document_id, status)
        })
    }

    pub fn set_section_status(&mut self, section_id: NodeId, status: Status) -> SessionResult {
        self.run(Operation::SetSectionStatus, |tree, _| {
            mutation::set_section_status(tree, section_id, status)
        })
    }

    pub fn set_bloc_status(&mut self, bloc_id: NodeId, status: Status) -> SessionResult {
        self.run(Operation::SetBlocStatus, |tree, _| {
            mutation::set_bloc_status(tree, bloc_id, status)
        })
    }

    fn run<F>(&mut self, op: Operation, mutate: F) -> SessionResult
    where
        F: FnOnce(&mut TranscriptionTree, &dyn IdGenerator) -> MutationResult,
    {
        let started_at = Instant::now();
        let tree = self.tree.as_mut().ok_or(SessionError::NoTreeLoaded)?;
        let acte_id = tree.acte_id;
        let plan = mutate(tree, self.ids.as_ref()).map_err(|err| {
            error!(
                "event=tree_mutation module=session status=rejected op={} acte_id={acte_id} error={err}",
                op.as_str()
            );
            SessionError::Mutation(err)
        })?;
        self.refresh_focus();
        self.notify(TreeEvent::Optimistic(op));

        if let Err(err) = self.persist(op, &plan.writes) {
            return self.reconcile(op, &err);
        }

        let rollup_writes = self.roll_up(&plan.rollup);
        if let Err(err) = self.persist(op, &rollup_writes) {
            return self.reconcile(op, &err);
        }

        info!(
            "event=tree_mutation module=session status=ok op={} acte_id={acte_id} writes={} rollup_writes={} duration_ms={}",
            op.as_str(),
            plan.writes.len(),
            rollup_writes.len(),
            started_at.elapsed().as_millis()
        );

        if self.policy == ReconcilePolicy::Always && op.is_structural() {
            self.refetch(op)?;
        } else {
            self.notify(TreeEvent::Persisted(op));
        }
        Ok(SyncOutcome::Persisted {
            created: plan.created,
        })
    }

    fn persist(&self, op: Operation, writes: &[RemoteWrite]) -> Result<(), StoreError> {
        for write in writes {
            if let Err(err) = self.store.apply(write) {
                warn!(
                    "event=remote_write module=session status=error op={} write={} level={} error={err}",
                    op.as_str(),
                    write.kind(),
                    write.level().as_str()
                );
                return Err(err);
            }
            debug!(
                "event=remote_write module=session status=ok op={} write={} level={}",
                op.as_str(),
                write.kind(),
                write.level().as_str()
            );
        }
        Ok(())
    }

    /// Applies rollup locally and returns the status writes it produced.
    fn roll_up(&mut self, targets: &[RollupTarget]) -> Vec<RemoteWrite> {
        let Some(tree) = self.tree.as_mut() else {
            return Vec::new();
        };

        let mut writes = Vec::new();
        for target in targets {
            let changes = match *target {
                RollupTarget::Section(id) => rollup_section(tree, id),
                RollupTarget::Document(id) => rollup_document(tree, id),
            };
            for change in changes {
                if let Some(row) = status_row(tree, change) {
                    writes.push(RemoteWrite::Update(row));
                }
            }
        }
        writes
    }

    /// Discards the optimistic tree and rebuilds it from the store.
    fn reconcile(&mut self, op: Operation, cause: &StoreError) -> SessionResult {
        warn!(
            "event=reconcile module=session status=start op={} acte_id={} reason={cause}",
            op.as_str(),
            self.acte_id.map(|id| id.to_string()).unwrap_or_default()
        );
        self.refetch(op)?;
        Ok(SyncOutcome::Reconciled)
    }

    fn refetch(&mut self, op: Operation) -> Result<(), SessionError> {
        let acte_id = self.acte_id.ok_or(SessionError::NoTreeLoaded)?;
        self.tree = None;
        match load_tree(&self.store, acte_id) {
            Ok(mut tree) => {
                self.repair_positions(&mut tree);
                self.tree = Some(tree);
                self.refresh_focus();
                self.notify(TreeEvent::Reconciled(op));
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=reconcile module=session status=error op={} acte_id={acte_id} error={err}",
                    op.as_str()
                );
                self.focused_bloc = None;
                Err(SessionError::Load(err))
            }
        }
    }

    /// Re-densifies sibling positions read from the store and writes the fix.
    ///
    /// Best effort: on failure the local tree stays dense and the next
    /// structural change at that level rewrites the whole list.
    fn repair_positions(&self, tree: &mut TranscriptionTree) {
        let plan = mutation::normalize_positions(tree);
        if plan.writes.is_empty() {
            return;
        }
        let acte_id = tree.acte_id;
        for write in &plan.writes {
            if let Err(err) = self.store.apply(write) {
                warn!(
                    "event=position_repair module=session status=error acte_id={acte_id} level={} error={err}",
                    write.level().as_str()
                );
                return;
            }
        }
        info!(
            "event=position_repair module=session status=ok acte_id={acte_id} lists={}",
            plan.writes.len()
        );
    }

    fn refresh_focus(&mut self) {
        let still_present = match (&self.tree, self.focused_bloc) {
            (Some(tree), Some(id)) => tree.bloc(id).is_some(),
            _ => false,
        };
        if !still_present {
            self.focused_bloc = None;
        }
    }

    fn notify(&self, event: TreeEvent) {
        let Some(tree) = self.tree.as_ref() else {
            return;
        };
        for listener in &self.listeners {
            listener.on_tree_event(event, tree);
        }
    }
}

fn status_row(tree: &TranscriptionTree, change: StatusChange) -> Option<NodeRow> {
    match change.level {
        NodeLevel::Document => tree.document(change.id).map(NodeRow::from),
        NodeLevel::Section => tree.section(change.id).map(NodeRow::from),
        NodeLevel::Bloc => tree.bloc(change.id).map(NodeRow::from),
    }
}
