//! Tree mutation engine.
//!
//! # Responsibility
//! - Apply structural and field changes to the in-memory tree synchronously.
//! - Describe the remote writes and rollup targets each change requires.
//!
//! # Invariants
//! - Every touched sibling list is re-indexed to dense `1..=N`.
//! - Structural changes upsert the positions of the whole touched sibling list.
//! - Lookups run before any change: a failed operation leaves the tree as is.
//! - Duplication mints a fresh id for every cloned node.

use crate::model::ids::{IdGenerator, NodeId};
use crate::model::status::Status;
use crate::model::tree::{Bloc, BlocKind, Document, NodeLevel, Section, TranscriptionTree};
use crate::ordering::{insert_index, is_dense, position_pairs, reindex, Positioned};
use crate::repo::transcription_repo::{NodeRow, RemoteWrite};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));

const COPY_SUFFIX: &str = " (copy)";

/// Internal consistency failures detected before mutating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    /// Target node is not in the tree.
    NodeNotFound { level: NodeLevel, id: NodeId },
    /// Reorder ids are not a permutation of the current children.
    InvalidPermutation {
        level: NodeLevel,
        expected: usize,
        actual: usize,
    },
}

impl Display for MutationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NodeNotFound { level, id } => write!(f, "{} not found: {id}", level.as_str()),
            Self::InvalidPermutation {
                level,
                expected,
                actual,
            } => write!(
                f,
                "{} reorder must list each of {expected} siblings exactly once, got {actual} ids",
                level.as_str()
            ),
        }
    }
}

impl Error for MutationError {}

/// Container whose status must be recomputed after persistence succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollupTarget {
    Section(NodeId),
    Document(NodeId),
}

/// Result of one optimistic mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationPlan {
    /// Remote writes, in the order they must be issued.
    pub writes: Vec<RemoteWrite>,
    /// Containers to roll up once the writes succeed.
    pub rollup: Vec<RollupTarget>,
    /// Root of the created subtree, for add/duplicate.
    pub created: Option<NodeId>,
}

pub type MutationResult = Result<MutationPlan, MutationError>;

/// Deep clone with fresh identifiers, shared by all three levels.
pub trait CloneSubtree: Sized {
    /// Clones `self` under `parent_id`, drawing every new id from `mint`.
    ///
    /// Cloned nodes are reset to `Draft`; titles get a " (copy)" suffix.
    fn clone_subtree(&self, parent_id: NodeId, mint: &mut dyn FnMut() -> NodeId) -> Self;
}

impl CloneSubtree for Bloc {
    fn clone_subtree(&self, parent_id: NodeId, mint: &mut dyn FnMut() -> NodeId) -> Self {
        Self {
            id: mint(),
            section_id: parent_id,
            kind: self.kind,
            content: self.content.clone(),
            position: self.position,
            status: Some(Status::Draft),
            annotations: Vec::new(),
        }
    }
}

impl CloneSubtree for Section {
    fn clone_subtree(&self, parent_id: NodeId, mint: &mut dyn FnMut() -> NodeId) -> Self {
        let id = mint();
        Self {
            id,
            document_id: parent_id,
            title: format!("{}{COPY_SUFFIX}", self.title),
            position: self.position,
            status: Some(Status::Draft),
            blocs: self
                .blocs
                .iter()
                .map(|bloc| bloc.clone_subtree(id, &mut *mint))
                .collect(),
        }
    }
}

impl CloneSubtree for Document {
    fn clone_subtree(&self, parent_id: NodeId, mint: &mut dyn FnMut() -> NodeId) -> Self {
        let id = mint();
        Self {
            id,
            acte_id: parent_id,
            title: format!("{}{COPY_SUFFIX}", self.title),
            position: self.position,
            status: Some(Status::Draft),
            sections: self
                .sections
                .iter()
                .map(|section| section.clone_subtree(id, &mut *mint))
                .collect(),
        }
    }
}

/// Inserts a Document seeded with one Section holding one empty Bloc.
pub fn add_document(
    tree: &mut TranscriptionTree,
    ids: &dyn IdGenerator,
    title: &str,
    index: Option<usize>,
) -> MutationPlan {
    let index = insert_index(index, tree.documents.len());
    let id = ids.next_id();
    let document = Document {
        id,
        acte_id: tree.acte_id,
        title: normalize_title(title, || format!("Document {}", index + 1)),
        position: 0,
        status: Some(Status::Draft),
        sections: vec![new_section(ids, id, "Section 1".to_string(), true)],
    };

    tree.documents.insert(index, document);
    reindex(&mut tree.documents);

    let mut writes = document_inserts(&tree.documents[index]);
    push_sibling_positions(&mut writes, NodeLevel::Document, &tree.documents);
    MutationPlan {
        writes,
        rollup: Vec::new(),
        created: Some(id),
    }
}

/// Inserts a Section, optionally seeded with one empty Bloc.
pub fn add_section(
    tree: &mut TranscriptionTree,
    ids: &dyn IdGenerator,
    document_id: NodeId,
    title: &str,
    index: Option<usize>,
    with_initial_bloc: bool,
) -> MutationResult {
    let document = tree
        .document_mut(document_id)
        .ok_or(MutationError::NodeNotFound {
            level: NodeLevel::Document,
            id: document_id,
        })?;

    let index = insert_index(index, document.sections.len());
    let title = normalize_title(title, || format!("Section {}", index + 1));
    let section = new_section(ids, document_id, title, with_initial_bloc);
    let id = section.id;

    document.sections.insert(index, section);
    reindex(&mut document.sections);

    let mut writes = section_inserts(&document.sections[index]);
    push_sibling_positions(&mut writes, NodeLevel::Section, &document.sections);
    Ok(MutationPlan {
        writes,
        rollup: vec![RollupTarget::Document(document_id)],
        created: Some(id),
    })
}

/// Inserts a `Draft` Bloc.
pub fn add_bloc(
    tree: &mut TranscriptionTree,
    ids: &dyn IdGenerator,
    section_id: NodeId,
    kind: BlocKind,
    content: &str,
    index: Option<usize>,
) -> MutationResult {
    let section = tree
        .section_mut(section_id)
        .ok_or(MutationError::NodeNotFound {
            level: NodeLevel::Section,
            id: section_id,
        })?;

    let index = insert_index(index, section.blocs.len());
    let mut bloc = new_bloc(ids, section_id);
    bloc.kind = kind;
    bloc.content = content.to_string();
    let id = bloc.id;

    section.blocs.insert(index, bloc);
    reindex(&mut section.blocs);

    let mut writes = vec![RemoteWrite::Insert(NodeRow::from(&section.blocs[index]))];
    push_sibling_positions(&mut writes, NodeLevel::Bloc, &section.blocs);
    Ok(MutationPlan {
        writes,
        rollup: vec![RollupTarget::Section(section_id)],
        created: Some(id),
    })
}

/// Removes a Document and its subtree.
pub fn delete_document(tree: &mut TranscriptionTree, document_id: NodeId) -> MutationResult {
    let index = tree
        .documents
        .iter()
        .position(|document| document.id == document_id)
        .ok_or(MutationError::NodeNotFound {
            level: NodeLevel::Document,
            id: document_id,
        })?;

    tree.documents.remove(index);
    reindex(&mut tree.documents);

    let mut writes = vec![RemoteWrite::Delete {
        level: NodeLevel::Document,
        id: document_id,
    }];
    push_sibling_positions(&mut writes, NodeLevel::Document, &tree.documents);
    Ok(MutationPlan {
        writes,
        ..MutationPlan::default()
    })
}

/// Removes a Section and its Blocs.
pub fn delete_section(tree: &mut TranscriptionTree, section_id: NodeId) -> MutationResult {
    let (document_index, section_index) =
        tree.locate_section(section_id)
            .ok_or(MutationError::NodeNotFound {
                level: NodeLevel::Section,
                id: section_id,
            })?;

    let document = &mut tree.documents[document_index];
    document.sections.remove(section_index);
    reindex(&mut document.sections);

    let mut writes = vec![RemoteWrite::Delete {
        level: NodeLevel::Section,
        id: section_id,
    }];
    push_sibling_positions(&mut writes, NodeLevel::Section, &document.sections);
    Ok(MutationPlan {
        writes,
        rollup: vec![RollupTarget::Document(document.id)],
        created: None,
    })
}

/// Removes one Bloc.
pub fn delete_bloc(tree: &mut TranscriptionTree, bloc_id: NodeId) -> MutationResult {
    let (document_index, section_index, bloc_index) =
        tree.locate_bloc(bloc_id).ok_or(MutationError::NodeNotFound {
            level: NodeLevel::Bloc,
            id: bloc_id,
        })?;

    let section = &mut tree.documents[document_index].sections[section_index];
    section.blocs.remove(bloc_index);
    reindex(&mut section.blocs);

    let mut writes = vec![RemoteWrite::Delete {
        level: NodeLevel::Bloc,
        id: bloc_id,
    }];
    push_sibling_positions(&mut writes, NodeLevel::Bloc, &section.blocs);
    Ok(MutationPlan {
        writes,
        rollup: vec![RollupTarget::Section(section.id)],
        created: None,
    })
}

/// Clones a Document subtree right after the original.
pub fn duplicate_document(
    tree: &mut TranscriptionTree,
    ids: &dyn IdGenerator,
    document_id: NodeId,
) -> MutationResult {
    let index = tree
        .documents
        .iter()
        .position(|document| document.id == document_id)
        .ok_or(MutationError::NodeNotFound {
            level: NodeLevel::Document,
            id: document_id,
        })?;

    let mut mint = || ids.next_id();
    let clone = tree.documents[index].clone_subtree(tree.acte_id, &mut mint);
    let clone_id = clone.id;
    tree.documents.insert(index + 1, clone);
    reindex(&mut tree.documents);

    let mut writes = document_inserts(&tree.documents[index + 1]);
    push_sibling_positions(&mut writes, NodeLevel::Document, &tree.documents);
    Ok(MutationPlan {
        writes,
        rollup: Vec::new(),
        created: Some(clone_id),
    })
}

/// Clones a Section subtree right after the original.
pub fn duplicate_section(
    tree: &mut TranscriptionTree,
    ids: &dyn IdGenerator,
    section_id: NodeId,
) -> MutationResult {
    let (document_index, section_index) =
        tree.locate_section(section_id)
            .ok_or(MutationError::NodeNotFound {
                level: NodeLevel::Section,
                id: section_id,
            })?;

    let document = &mut tree.documents[document_index];
    let mut mint = || ids.next_id();
    let clone = document.sections[section_index].clone_subtree(document.id, &mut mint);
    let clone_id = clone.id;
    let insert_at = section_index + 1;
    document.sections.insert(insert_at, clone);
    reindex(&mut document.sections);

    let mut writes = section_inserts(&document.sections[insert_at]);
    push_sibling_positions(&mut writes, NodeLevel::Section, &document.sections);
    Ok(MutationPlan {
        writes,
        rollup: vec![RollupTarget::Document(document.id)],
        created: Some(clone_id),
    })
}

/// Clones a Bloc right after the original.
pub fn duplicate_bloc(
    tree: &mut TranscriptionTree,
    ids: &dyn IdGenerator,
    bloc_id: NodeId,
) -> MutationResult {
    let (document_index, section_index, bloc_index) =
        tree.locate_bloc(bloc_id).ok_or(MutationError::NodeNotFound {
            level: NodeLevel::Bloc,
            id: bloc_id,
        })?;

    let section = &mut tree.documents[document_index].sections[section_index];
    let mut mint = || ids.next_id();
    let clone = section.blocs[bloc_index].clone_subtree(section.id, &mut mint);
    let clone_id = clone.id;
    let insert_at = bloc_index + 1;
    section.blocs.insert(insert_at, clone);
    reindex(&mut section.blocs);

    let mut writes = vec![RemoteWrite::Insert(NodeRow::from(&section.blocs[insert_at]))];
    push_sibling_positions(&mut writes, NodeLevel::Bloc, &section.blocs);
    Ok(MutationPlan {
        writes,
        rollup: vec![RollupTarget::Section(section.id)],
        created: Some(clone_id),
    })
}

/// Moves a Bloc to `index` inside `target_section_id`, possibly its own Section.
pub fn move_bloc(
    tree: &mut TranscriptionTree,
    bloc_id: NodeId,
    target_section_id: NodeId,
    index: Option<usize>,
) -> MutationResult {
    let (document_index, section_index, bloc_index) =
        tree.locate_bloc(bloc_id).ok_or(MutationError::NodeNotFound {
            level: NodeLevel::Bloc,
            id: bloc_id,
        })?;
    let (target_document_index, target_section_index) = tree
        .locate_section(target_section_id)
        .ok_or(MutationError::NodeNotFound {
            level: NodeLevel::Section,
            id: target_section_id,
        })?;

    let source = &mut tree.documents[document_index].sections[section_index];
    let source_section_id = source.id;
    let mut bloc = source.blocs.remove(bloc_index);
    reindex(&mut source.blocs);
    let source_positions = position_pairs(&source.blocs);

    bloc.section_id = target_section_id;
    let target = &mut tree.documents[target_document_index].sections[target_section_index];
    let insert_at = insert_index(index, target.blocs.len());
    target.blocs.insert(insert_at, bloc);
    reindex(&mut target.blocs);

    let mut writes = vec![RemoteWrite::Update(NodeRow::from(&target.blocs[insert_at]))];
    let mut rollup = vec![RollupTarget::Section(target_section_id)];
    if source_section_id != target_section_id {
        if !source_positions.is_empty() {
            writes.push(RemoteWrite::UpsertPositions {
                level: NodeLevel::Bloc,
                positions: source_positions,
            });
        }
        rollup.insert(0, RollupTarget::Section(source_section_id));
    }
    writes.push(RemoteWrite::UpsertPositions {
        level: NodeLevel::Bloc,
        positions: position_pairs(&target.blocs),
    });

    Ok(MutationPlan {
        writes,
        rollup,
        created: None,
    })
}

/// Reorders the acte's Documents to match `order`.
pub fn reorder_documents(tree: &mut TranscriptionTree, order: &[NodeId]) -> MutationResult {
    permute(&mut tree.documents, order, NodeLevel::Document)?;
    Ok(positions_plan(NodeLevel::Document, &tree.documents))
}

/// Reorders one Document's Sections to match `order`.
pub fn reorder_sections(
    tree: &mut TranscriptionTree,
    document_id: NodeId,
    order: &[NodeId],
) -> MutationResult {
    let document = tree
        .document_mut(document_id)
        .ok_or(MutationError::NodeNotFound {
            level: NodeLevel::Document,
            id: document_id,
        })?;
    permute(&mut document.sections, order, NodeLevel::Section)?;
    Ok(positions_plan(NodeLevel::Section, &document.sections))
}

/// Reorders one Section's Blocs to match `order`.
pub fn reorder_blocs(
    tree: &mut TranscriptionTree,
    section_id: NodeId,
    order: &[NodeId],
) -> MutationResult {
    let section = tree
        .section_mut(section_id)
        .ok_or(MutationError::NodeNotFound {
            level: NodeLevel::Section,
            id: section_id,
        })?;
    permute(&mut section.blocs, order, NodeLevel::Bloc)?;
    Ok(positions_plan(NodeLevel::Bloc, &section.blocs))
}

/// Renames a Document; a blank title falls back to "Document N".
pub fn rename_document(
    tree: &mut TranscriptionTree,
    document_id: NodeId,
    title: &str,
) -> MutationResult {
    let document = tree
        .document_mut(document_id)
        .ok_or(MutationError::NodeNotFound {
            level: NodeLevel::Document,
            id: document_id,
        })?;
    let position = document.position;
    document.title = normalize_title(title, || format!("Document {position}"));
    Ok(update_plan(NodeRow::from(&*document), None))
}

/// Renames a Section; a blank title falls back to "Section N".
pub fn rename_section(
    tree: &mut TranscriptionTree,
    section_id: NodeId,
    title: &str,
) -> MutationResult {
    let section = tree
        .section_mut(section_id)
        .ok_or(MutationError::NodeNotFound {
            level: NodeLevel::Section,
            id: section_id,
        })?;
    let position = section.position;
    section.title = normalize_title(title, || format!("Section {position}"));
    Ok(update_plan(NodeRow::from(&*section), None))
}

/// Replaces Bloc content. Empty content clears the Bloc status.
pub fn update_bloc_content(
    tree: &mut TranscriptionTree,
    bloc_id: NodeId,
    content: &str,
) -> MutationResult {
    let bloc = tree.bloc_mut(bloc_id).ok_or(MutationError::NodeNotFound {
        level: NodeLevel::Bloc,
        id: bloc_id,
    })?;
    bloc.content = content.to_string();

    let mut rollup = None;
    if content.is_empty() && bloc.status.is_some() {
        bloc.status = None;
        rollup = Some(RollupTarget::Section(bloc.section_id));
    }
    Ok(update_plan(NodeRow::from(&*bloc), rollup))
}

pub fn update_bloc_kind(
    tree: &mut TranscriptionTree,
    bloc_id: NodeId,
    kind: BlocKind,
) -> MutationResult {
    let bloc = tree.bloc_mut(bloc_id).ok_or(MutationError::NodeNotFound {
        level: NodeLevel::Bloc,
        id: bloc_id,
    })?;
    bloc.kind = kind;
    Ok(update_plan(NodeRow::from(&*bloc), None))
}

/// Sets a Document status explicitly. Documents have no parent to roll up.
pub fn set_document_status(
    tree: &mut TranscriptionTree,
    document_id: NodeId,
    status: Status,
) -> MutationResult {
    let document = tree
        .document_mut(document_id)
        .ok_or(MutationError::NodeNotFound {
            level: NodeLevel::Document,
            id: document_id,
        })?;
    document.status = Some(status);
    Ok(update_plan(NodeRow::from(&*document), None))
}

pub fn set_section_status(
    tree: &mut TranscriptionTree,
    section_id: NodeId,
    status: Status,
) -> MutationResult {
    let section = tree
        .section_mut(section_id)
        .ok_or(MutationError::NodeNotFound {
            level: NodeLevel::Section,
            id: section_id,
        })?;
    section.status = Some(status);
    let rollup = RollupTarget::Document(section.document_id);
    Ok(update_plan(NodeRow::from(&*section), Some(rollup)))
}

pub fn set_bloc_status(
    tree: &mut TranscriptionTree,
    bloc_id: NodeId,
    status: Status,
) -> MutationResult {
    let bloc = tree.bloc_mut(bloc_id).ok_or(MutationError::NodeNotFound {
        level: NodeLevel::Bloc,
        id: bloc_id,
    })?;
    bloc.status = Some(status);
    let rollup = RollupTarget::Section(bloc.section_id);
    Ok(update_plan(NodeRow::from(&*bloc), Some(rollup)))
}

/// Re-indexes every sibling list whose positions are not dense `1..=N`.
///
/// Used on trees read from the store; returns one upsert per repaired list.
pub fn normalize_positions(tree: &mut TranscriptionTree) -> MutationPlan {
    let mut writes = Vec::new();
    repair_list(&mut writes, NodeLevel::Document, &mut tree.documents);
    for document in &mut tree.documents {
        repair_list(&mut writes, NodeLevel::Section, &mut document.sections);
        for section in &mut document.sections {
            repair_list(&mut writes, NodeLevel::Bloc, &mut section.blocs);
        }
    }
    MutationPlan {
        writes,
        ..MutationPlan::default()
    }
}

fn new_bloc(ids: &dyn IdGenerator, section_id: NodeId) -> Bloc {
    Bloc {
        id: ids.next_id(),
        section_id,
        kind: BlocKind::default(),
        content: String::new(),
        position: 1,
        status: Some(Status::Draft),
        annotations: Vec::new(),
    }
}

fn new_section(
    ids: &dyn IdGenerator,
    document_id: NodeId,
    title: String,
    with_initial_bloc: bool,
) -> Section {
    let id = ids.next_id();
    let blocs = if with_initial_bloc {
        vec![new_bloc(ids, id)]
    } else {
        Vec::new()
    };
    Section {
        id,
        document_id,
        title,
        position: 1,
        status: Some(Status::Draft),
        blocs,
    }
}

/// Trims and collapses whitespace; blank input takes the fallback label.
fn normalize_title(value: &str, fallback: impl FnOnce() -> String) -> String {
    let collapsed = WHITESPACE_RE.replace_all(value.trim(), " ");
    if collapsed.is_empty() {
        return fallback();
    }
    collapsed.into_owned()
}

/// Insert writes for a Section subtree, parents first.
fn section_inserts(section: &Section) -> Vec<RemoteWrite> {
    let mut writes = vec![RemoteWrite::Insert(NodeRow::from(section))];
    writes.extend(
        section
            .blocs
            .iter()
            .map(|bloc| RemoteWrite::Insert(NodeRow::from(bloc))),
    );
    writes
}

/// Insert writes for a Document subtree, parents first.
fn document_inserts(document: &Document) -> Vec<RemoteWrite> {
    let mut writes = vec![RemoteWrite::Insert(NodeRow::from(document))];
    for section in &document.sections {
        writes.extend(section_inserts(section));
    }
    writes
}

/// Adds the position upsert for a whole sibling list touched by a
/// structural change, whether or not any sibling shifted locally.
fn push_sibling_positions<T: Positioned>(
    writes: &mut Vec<RemoteWrite>,
    level: NodeLevel,
    siblings: &[T],
) {
    if !siblings.is_empty() {
        writes.push(RemoteWrite::UpsertPositions {
            level,
            positions: position_pairs(siblings),
        });
    }
}

/// Re-indexes a sibling list read back with gaps or duplicate positions.
fn repair_list<T: Positioned>(
    writes: &mut Vec<RemoteWrite>,
    level: NodeLevel,
    siblings: &mut [T],
) {
    if is_dense(siblings) {
        return;
    }
    reindex(siblings);
    writes.push(RemoteWrite::UpsertPositions {
        level,
        positions: position_pairs(siblings),
    });
}

fn positions_plan<T: Positioned>(level: NodeLevel, siblings: &[T]) -> MutationPlan {
    let writes = if siblings.is_empty() {
        Vec::new()
    } else {
        vec![RemoteWrite::UpsertPositions {
            level,
            positions: position_pairs(siblings),
        }]
    };
    MutationPlan {
        writes,
        ..MutationPlan::default()
    }
}

fn update_plan(row: NodeRow, rollup: Option<RollupTarget>) -> MutationPlan {
    MutationPlan {
        writes: vec![RemoteWrite::Update(row)],
        rollup: rollup.into_iter().collect(),
        created: None,
    }
}

/// Reorders `siblings` to follow `order` and re-indexes them.
///
/// Leaves `siblings` untouched unless `order` lists each sibling id once.
fn permute<T: Positioned>(
    siblings: &mut Vec<T>,
    order: &[NodeId],
    level: NodeLevel,
) -> Result<(), MutationError> {
    let expected = siblings.len();
    let invalid = || MutationError::InvalidPermutation {
        level,
        expected,
        actual: order.len(),
    };
    if order.len() != expected {
        return Err(invalid());
    }

    let mut seen = HashSet::with_capacity(order.len());
    let mut indices = Vec::with_capacity(order.len());
    for id in order {
        match siblings.iter().position(|node| node.node_id() == *id) {
            Some(index) if seen.insert(*id) => indices.push(index),
            _ => return Err(invalid()),
        }
    }

    let mut pool: Vec<Option<T>> = std::mem::take(siblings).into_iter().map(Some).collect();
    *siblings = indices
        .into_iter()
        .filter_map(|index| pool[index].take())
        .collect();
    reindex(siblings);
    Ok(())
}
