use rusqlite::Connection;
use std::cell::Cell;
use std::sync::{Arc, Mutex};
use transcript_core::db::open_db_in_memory;
use transcript_core::ordering::is_dense;
use transcript_core::{
    load_tree, ActeId, Annotation, BlocKind, BlocRow, DocumentRow, MutationError, NodeId,
    NodeLevel, NodeRow, Operation, ReconcilePolicy, SectionRow, SessionError,
    SqliteTranscriptionStore, Status, StoreError, StoreResult, SyncOutcome, TranscriptionSession,
    TranscriptionStore, TranscriptionTree, TreeEvent, TreeListener,
};
use uuid::Uuid;

/// SQLite store with switchable failures per primitive.
struct FlakyStore<'conn> {
    inner: SqliteTranscriptionStore<'conn>,
    fail_inserts: Cell<bool>,
    /// Fails inserts of one level only, after earlier writes went through.
    fail_inserts_at: Cell<Option<NodeLevel>>,
    fail_updates: Cell<bool>,
    fail_deletes: Cell<bool>,
    fail_reads: Cell<bool>,
    writes: Cell<usize>,
}

impl<'conn> FlakyStore<'conn> {
    fn new(conn: &'conn Connection) -> Self {
        Self {
            inner: SqliteTranscriptionStore::try_new(conn).unwrap(),
            fail_inserts: Cell::new(false),
            fail_inserts_at: Cell::new(None),
            fail_updates: Cell::new(false),
            fail_deletes: Cell::new(false),
            fail_reads: Cell::new(false),
            writes: Cell::new(0),
        }
    }

    fn write(&self, fail: &Cell<bool>) -> StoreResult<()> {
        if fail.get() {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }

    fn read(&self) -> StoreResult<()> {
        if self.fail_reads.get() {
            return Err(StoreError::Unavailable("injected read failure".to_string()));
        }
        Ok(())
    }
}

impl TranscriptionStore for FlakyStore<'_> {
    fn insert_row(&self, row: &NodeRow) -> StoreResult<()> {
        if self.fail_inserts_at.get() == Some(row.level()) {
            return Err(StoreError::Unavailable("injected insert failure".to_string()));
        }
        self.write(&self.fail_inserts)?;
        self.inner.insert_row(row)
    }

    fn update_row(&self, row: &NodeRow) -> StoreResult<()> {
        self.write(&self.fail_updates)?;
        self.inner.update_row(row)
    }

    fn delete_row(&self, level: NodeLevel, id: NodeId) -> StoreResult<()> {
        self.write(&self.fail_deletes)?;
        self.inner.delete_row(level, id)
    }

    fn upsert_positions(&self, level: NodeLevel, positions: &[(NodeId, i64)]) -> StoreResult<()> {
        self.write(&self.fail_updates)?;
        self.inner.upsert_positions(level, positions)
    }

    fn fetch_documents(&self, acte_id: ActeId) -> StoreResult<Vec<DocumentRow>> {
        self.read()?;
        self.inner.fetch_documents(acte_id)
    }

    fn fetch_sections(&self, acte_id: ActeId) -> StoreResult<Vec<SectionRow>> {
        self.read()?;
        self.inner.fetch_sections(acte_id)
    }

    fn fetch_blocs(&self, acte_id: ActeId) -> StoreResult<Vec<BlocRow>> {
        self.read()?;
        self.inner.fetch_blocs(acte_id)
    }

    fn fetch_annotations(&self, acte_id: ActeId) -> StoreResult<Vec<Annotation>> {
        self.read()?;
        self.inner.fetch_annotations(acte_id)
    }
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<(TreeEvent, TranscriptionTree)>>,
}

impl Recorder {
    fn events(&self) -> Vec<TreeEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(event, _)| *event)
            .collect()
    }

    fn tree_at(&self, index: usize) -> TranscriptionTree {
        self.events.lock().unwrap()[index].1.clone()
    }

    fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl TreeListener for Recorder {
    fn on_tree_event(&self, event: TreeEvent, tree: &TranscriptionTree) {
        self.events.lock().unwrap().push((event, tree.clone()));
    }
}

fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

fn open_session(conn: &Connection) -> TranscriptionSession<FlakyStore<'_>> {
    let mut session = TranscriptionSession::new(FlakyStore::new(conn));
    session.load(Uuid::new_v4()).unwrap();
    session
}

/// Adds one Document and returns (document, first section, first bloc).
fn add_seeded_document(session: &mut TranscriptionSession<FlakyStore<'_>>) -> (NodeId, NodeId, NodeId) {
    let document_id = session
        .add_document("Acte de naissance", None)
        .unwrap()
        .created()
        .unwrap();
    let tree = session.tree().unwrap();
    let document = tree.document(document_id).unwrap();
    let section = &document.sections[0];
    (document_id, section.id, section.blocs[0].id)
}

fn stored_tree(session: &TranscriptionSession<FlakyStore<'_>>) -> TranscriptionTree {
    load_tree(session.store(), session.acte_id().unwrap()).unwrap()
}

fn assert_dense(tree: &TranscriptionTree) {
    assert!(is_dense(&tree.documents));
    for document in &tree.documents {
        assert!(is_dense(&document.sections));
        for section in &document.sections {
            assert!(is_dense(&section.blocs));
        }
    }
}

fn bloc_positions(tree: &TranscriptionTree, section_id: NodeId) -> Vec<i64> {
    tree.section(section_id)
        .unwrap()
        .blocs
        .iter()
        .map(|bloc| bloc.position)
        .collect()
}

#[test]
fn mutations_are_mirrored_in_store() {
    let conn = setup();
    let mut session = open_session(&conn);
    let (document_id, section_id, bloc_id) = add_seeded_document(&mut session);

    session.update_bloc_content(bloc_id, "L'an mil huit cent").unwrap();
    session
        .add_bloc(section_id, BlocKind::Heading, "Mentions", Some(0))
        .unwrap();
    session.add_section(document_id, "", None, false).unwrap();
    session.rename_document(document_id, "Acte n° 12").unwrap();
    session.update_bloc_kind(bloc_id, BlocKind::Quote).unwrap();

    let local = session.tree().unwrap().clone();
    assert_eq!(stored_tree(&session), local);
    let document = local.document(document_id).unwrap();
    assert_eq!(document.title, "Acte n° 12");
    assert_eq!(document.sections[1].title, "Section 2");
    assert_eq!(document.sections[0].blocs[0].kind, BlocKind::Heading);
    assert_eq!(document.sections[0].blocs[1].content, "L'an mil huit cent");
}

#[test]
fn bloc_status_change_demotes_done_ancestors() {
    let conn = setup();
    let mut session = open_session(&conn);
    let (document_id, section_id, bloc_id) = add_seeded_document(&mut session);
    session.update_bloc_content(bloc_id, "Jean").unwrap();
    session.set_bloc_status(bloc_id, Status::Done).unwrap();
    session.set_section_status(section_id, Status::Done).unwrap();
    session.set_document_status(document_id, Status::Done).unwrap();

    let tree = session.tree().unwrap();
    assert_eq!(tree.section(section_id).unwrap().status, Some(Status::Done));
    assert_eq!(tree.document(document_id).unwrap().status, Some(Status::Done));

    session.set_bloc_status(bloc_id, Status::InProgress).unwrap();

    let tree = session.tree().unwrap().clone();
    assert_eq!(tree.bloc(bloc_id).unwrap().status, Some(Status::InProgress));
    assert_eq!(tree.section(section_id).unwrap().status, Some(Status::InProgress));
    assert_eq!(tree.document(document_id).unwrap().status, Some(Status::InProgress));
    assert_eq!(stored_tree(&session), tree);
}

#[test]
fn started_bloc_promotes_draft_section_but_never_to_done() {
    let conn = setup();
    let mut session = open_session(&conn);
    let (document_id, section_id, bloc_id) = add_seeded_document(&mut session);

    session.set_bloc_status(bloc_id, Status::Done).unwrap();

    let tree = session.tree().unwrap();
    assert_eq!(tree.section(section_id).unwrap().status, Some(Status::InProgress));
    assert_eq!(tree.document(document_id).unwrap().status, Some(Status::InProgress));
}

#[test]
fn deleting_only_bloc_drafts_its_section() {
    let conn = setup();
    let mut session = open_session(&conn);
    let (document_id, section_id, bloc_id) = add_seeded_document(&mut session);
    session.set_bloc_status(bloc_id, Status::InProgress).unwrap();

    let outcome = session.delete_bloc(bloc_id).unwrap();

    assert_eq!(outcome, SyncOutcome::Persisted { created: None });
    let tree = session.tree().unwrap().clone();
    let section = tree.section(section_id).unwrap();
    assert!(section.blocs.is_empty());
    assert_eq!(section.status, Some(Status::Draft));
    assert_eq!(tree.document(document_id).unwrap().status, Some(Status::Draft));
    assert_eq!(stored_tree(&session), tree);
}

#[test]
fn done_section_stays_done_when_emptied() {
    let conn = setup();
    let mut session = open_session(&conn);
    let (_, section_id, bloc_id) = add_seeded_document(&mut session);
    session.set_bloc_status(bloc_id, Status::Done).unwrap();
    session.set_section_status(section_id, Status::Done).unwrap();

    session.delete_bloc(bloc_id).unwrap();

    let section = session.tree().unwrap().section(section_id).unwrap();
    assert_eq!(section.status, Some(Status::Done));
}

#[test]
fn clearing_content_unsets_bloc_status_in_store() {
    let conn = setup();
    let mut session = open_session(&conn);
    let (_, section_id, bloc_id) = add_seeded_document(&mut session);
    session.update_bloc_content(bloc_id, "texte").unwrap();
    session.set_bloc_status(bloc_id, Status::InProgress).unwrap();

    session.update_bloc_content(bloc_id, "").unwrap();

    let stored = stored_tree(&session);
    assert_eq!(stored.bloc(bloc_id).unwrap().status, None);
    assert_eq!(stored.section(section_id).unwrap().status, Some(Status::Draft));
}

#[test]
fn failed_delete_reconciles_and_restores_node() {
    let conn = setup();
    let mut session = open_session(&conn);
    let (_, section_id, bloc_id) = add_seeded_document(&mut session);
    let recorder = Arc::new(Recorder::default());
    session.subscribe(recorder.clone());
    session.store().fail_deletes.set(true);

    let outcome = session.delete_bloc(bloc_id).unwrap();

    assert_eq!(outcome, SyncOutcome::Reconciled);
    assert_eq!(
        recorder.events(),
        vec![
            TreeEvent::Optimistic(Operation::DeleteBloc),
            TreeEvent::Reconciled(Operation::DeleteBloc),
        ]
    );
    assert!(recorder.tree_at(0).bloc(bloc_id).is_none());
    assert!(recorder.tree_at(1).bloc(bloc_id).is_some());
    let section = session.tree().unwrap().section(section_id).unwrap();
    assert_eq!(section.blocs.len(), 1);
    assert_eq!(section.blocs[0].id, bloc_id);
}

#[test]
fn failed_rollup_write_reconciles_to_store_state() {
    let conn = setup();
    let mut session = open_session(&conn);
    let (_, section_id, bloc_id) = add_seeded_document(&mut session);
    session.store().fail_updates.set(true);

    let outcome = session.set_bloc_status(bloc_id, Status::InProgress).unwrap();

    assert!(outcome.is_reconciled());
    let tree = session.tree().unwrap();
    assert_eq!(tree.bloc(bloc_id).unwrap().status, Some(Status::Draft));
    assert_eq!(tree.section(section_id).unwrap().status, Some(Status::Draft));
}

#[test]
fn failed_add_is_dropped_after_reconciliation() {
    let conn = setup();
    let mut session = open_session(&conn);
    let (_, section_id, _) = add_seeded_document(&mut session);
    session.store().fail_inserts.set(true);

    let outcome = session
        .add_bloc(section_id, BlocKind::Paragraph, "perdu", None)
        .unwrap();

    assert_eq!(outcome, SyncOutcome::Reconciled);
    assert_eq!(outcome.created(), None);
    assert_eq!(session.tree().unwrap().section(section_id).unwrap().blocs.len(), 1);
}

#[test]
fn unreadable_store_during_reconcile_clears_tree() {
    let conn = setup();
    let mut session = open_session(&conn);
    let (_, _, bloc_id) = add_seeded_document(&mut session);
    session.focus_bloc(Some(bloc_id)).unwrap();
    session.store().fail_deletes.set(true);
    session.store().fail_reads.set(true);

    let err = session.delete_bloc(bloc_id).unwrap_err();

    assert!(matches!(err, SessionError::Load(StoreError::Unavailable(_))));
    assert!(session.tree().is_none());
    assert_eq!(session.focused_bloc(), None);
    assert!(session.acte_id().is_some());

    session.store().fail_reads.set(false);
    session.reload().unwrap();
    assert!(session.tree().unwrap().bloc(bloc_id).is_some());
}

#[test]
fn missing_target_is_rejected_without_store_writes() {
    let conn = setup();
    let mut session = open_session(&conn);
    add_seeded_document(&mut session);
    let before = session.tree().unwrap().clone();
    let writes = session.store().writes.get();
    let missing = Uuid::new_v4();

    let err = session.delete_section(missing).unwrap_err();

    assert!(matches!(
        err,
        SessionError::Mutation(MutationError::NodeNotFound {
            level: NodeLevel::Section,
            id,
        }) if id == missing
    ));
    assert_eq!(session.tree().unwrap(), &before);
    assert_eq!(session.store().writes.get(), writes);
}

#[test]
fn invalid_reorder_leaves_tree_unchanged() {
    let conn = setup();
    let mut session = open_session(&conn);
    let (document_id, section_id, _) = add_seeded_document(&mut session);
    let second = session
        .add_section(document_id, "Corps", None, true)
        .unwrap()
        .created()
        .unwrap();
    let before = session.tree().unwrap().clone();

    let err = session
        .reorder_sections(document_id, &[second, second])
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Mutation(MutationError::InvalidPermutation { .. })
    ));
    assert_eq!(session.tree().unwrap(), &before);

    session.reorder_sections(document_id, &[second, section_id]).unwrap();
    let stored = stored_tree(&session);
    let sections = &stored.document(document_id).unwrap().sections;
    assert_eq!(sections[0].id, second);
    assert_eq!(sections[0].position, 1);
    assert_eq!(sections[1].id, section_id);
    assert_eq!(sections[1].position, 2);
}

#[test]
fn move_and_duplicate_keep_store_positions_dense() {
    let conn = setup();
    let mut session = open_session(&conn);
    let (document_id, source_id, first) = add_seeded_document(&mut session);
    let second = session
        .add_bloc(source_id, BlocKind::Paragraph, "deux", None)
        .unwrap()
        .created()
        .unwrap();
    let target_id = session
        .add_section(document_id, "Cible", None, true)
        .unwrap()
        .created()
        .unwrap();

    session.move_bloc(first, target_id, Some(0)).unwrap();
    session.duplicate_section(target_id).unwrap();
    session.duplicate_document(document_id).unwrap();

    let stored = stored_tree(&session);
    assert_eq!(&stored, session.tree().unwrap());
    let source = stored.section(source_id).unwrap();
    assert_eq!(source.blocs.len(), 1);
    assert_eq!(source.blocs[0].id, second);
    assert_eq!(source.blocs[0].position, 1);
    let target = stored.section(target_id).unwrap();
    assert_eq!(target.blocs[0].id, first);
    assert_eq!(
        target.blocs.iter().map(|bloc| bloc.position).collect::<Vec<_>>(),
        vec![1, 2]
    );
    assert_eq!(stored.documents.len(), 2);
    assert_eq!(stored.documents[1].sections.len(), 3);
    assert_eq!(stored.documents[1].title, "Acte de naissance (copy)");
}

#[test]
fn duplicate_bloc_drops_annotations() {
    let conn = setup();
    let mut session = open_session(&conn);
    let (_, section_id, bloc_id) = add_seeded_document(&mut session);
    conn.execute(
        "INSERT INTO annotations (id, bloc_id, payload) VALUES (?1, ?2, 'rature');",
        [Uuid::new_v4().to_string(), bloc_id.to_string()],
    )
    .unwrap();
    session.reload().unwrap();

    let clone_id = session.duplicate_bloc(bloc_id).unwrap().created().unwrap();

    let tree = session.tree().unwrap();
    assert_eq!(tree.bloc(bloc_id).unwrap().annotations.len(), 1);
    assert!(tree.bloc(clone_id).unwrap().annotations.is_empty());
    assert_eq!(tree.section(section_id).unwrap().blocs[1].id, clone_id);
}

#[test]
fn always_policy_refetches_after_structural_changes() {
    let conn = setup();
    let mut session = TranscriptionSession::new(FlakyStore::new(&conn))
        .with_policy(ReconcilePolicy::Always);
    session.load(Uuid::new_v4()).unwrap();
    let recorder = Arc::new(Recorder::default());
    session.subscribe(recorder.clone());

    let outcome = session.add_document("Registre", None).unwrap();
    assert!(outcome.created().is_some());
    assert_eq!(
        recorder.events(),
        vec![
            TreeEvent::Optimistic(Operation::AddDocument),
            TreeEvent::Reconciled(Operation::AddDocument),
        ]
    );

    recorder.clear();
    let document_id = outcome.created().unwrap();
    session.rename_document(document_id, "Registre 1832").unwrap();
    assert_eq!(
        recorder.events(),
        vec![
            TreeEvent::Optimistic(Operation::RenameDocument),
            TreeEvent::Persisted(Operation::RenameDocument),
        ]
    );
}

#[test]
fn focus_follows_added_bloc_and_clears_on_delete() {
    let conn = setup();
    let mut session = open_session(&conn);
    let (_, section_id, _) = add_seeded_document(&mut session);

    let created = session
        .add_bloc(section_id, BlocKind::Paragraph, "", None)
        .unwrap()
        .created()
        .unwrap();
    assert_eq!(session.focused_bloc(), Some(created));

    session.delete_bloc(created).unwrap();
    assert_eq!(session.focused_bloc(), None);

    assert!(matches!(
        session.focus_bloc(Some(Uuid::new_v4())),
        Err(SessionError::Mutation(MutationError::NodeNotFound { .. }))
    ));
}

#[test]
fn mutation_without_loaded_tree_is_rejected() {
    let conn = setup();
    let mut session = TranscriptionSession::new(FlakyStore::new(&conn));

    assert!(matches!(
        session.add_document("Registre", None),
        Err(SessionError::NoTreeLoaded)
    ));
    assert!(matches!(session.reload(), Err(SessionError::NoTreeLoaded)));
}

#[test]
fn status_summary_counts_each_level() {
    let conn = setup();
    let mut session = open_session(&conn);
    let (_, section_id, bloc_id) = add_seeded_document(&mut session);
    session
        .add_bloc(section_id, BlocKind::Paragraph, "", None)
        .unwrap();
    session.set_bloc_status(bloc_id, Status::Done).unwrap();

    let summary = session.tree().unwrap().status_summary();
    assert_eq!(summary.documents.total, 1);
    assert_eq!(summary.documents.in_progress, 1);
    assert_eq!(summary.sections.in_progress, 1);
    assert_eq!(summary.blocs.total, 2);
    assert_eq!(summary.blocs.done, 1);
    assert_eq!(summary.blocs.draft, 1);
}

#[test]
fn failed_position_upsert_after_insert_is_healed_by_next_add() {
    let conn = setup();
    let mut session = open_session(&conn);
    let (_, section_id, _) = add_seeded_document(&mut session);
    session.store().fail_updates.set(true);

    let outcome = session
        .add_bloc(section_id, BlocKind::Heading, "Mentions", Some(0))
        .unwrap();

    // the insert landed but its sibling shift did not
    assert_eq!(outcome, SyncOutcome::Reconciled);
    assert_eq!(bloc_positions(&stored_tree(&session), section_id), vec![1, 1]);
    assert_eq!(bloc_positions(session.tree().unwrap(), section_id), vec![1, 2]);
    assert_dense(session.tree().unwrap());

    session.store().fail_updates.set(false);
    let outcome = session
        .add_bloc(section_id, BlocKind::Paragraph, "suite", None)
        .unwrap();

    assert!(!outcome.is_reconciled());
    let local = session.tree().unwrap().clone();
    let stored = stored_tree(&session);
    assert_eq!(bloc_positions(&stored, section_id), vec![1, 2, 3]);
    assert_dense(&local);
    assert_dense(&stored);
    assert_eq!(stored, local);
}

#[test]
fn reload_rewrites_duplicate_store_positions() {
    let conn = setup();
    let mut session = open_session(&conn);
    let (_, section_id, _) = add_seeded_document(&mut session);
    session.store().fail_updates.set(true);
    session
        .add_bloc(section_id, BlocKind::Paragraph, "avant", Some(0))
        .unwrap();
    session.store().fail_updates.set(false);

    session.reload().unwrap();

    let local = session.tree().unwrap().clone();
    let stored = stored_tree(&session);
    assert_eq!(bloc_positions(&stored, section_id), vec![1, 2]);
    assert_dense(&stored);
    assert_eq!(stored, local);
}

#[test]
fn failed_seed_section_insert_leaves_dense_childless_document() {
    let conn = setup();
    let mut session = open_session(&conn);
    add_seeded_document(&mut session);
    session.store().fail_inserts_at.set(Some(NodeLevel::Section));

    let outcome = session.add_document("Registre", None).unwrap();

    assert!(outcome.is_reconciled());
    let tree = session.tree().unwrap().clone();
    assert_eq!(tree.documents.len(), 2);
    let document_id = tree.documents[1].id;
    assert!(tree.documents[1].sections.is_empty());
    assert_dense(&tree);
    assert_eq!(stored_tree(&session), tree);

    session.store().fail_inserts_at.set(None);
    session.add_section(document_id, "", None, true).unwrap();
    session.add_document("Tables", Some(0)).unwrap();

    let local = session.tree().unwrap().clone();
    let stored = stored_tree(&session);
    assert_eq!(local.document(document_id).unwrap().sections.len(), 1);
    assert_dense(&local);
    assert_dense(&stored);
    assert_eq!(stored, local);
}
