//! Status rollup engine.
//!
//! # Responsibility
//! - Derive a container's status from its immediate children.
//! - Propagate changes bottom-up: Section → owning Document.
//!
//! # Invariants
//! - Rollup never produces `Done`.
//! - A stored `Done` is kept while every child is `Done` (vacuously true for
//!   a childless container), otherwise the container is demoted.
//! - A level whose status does not change stops propagation.

use crate::model::ids::NodeId;
use crate::model::status::Status;
use crate::model::tree::{NodeLevel, TranscriptionTree};

/// Status written by one rollup step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub level: NodeLevel,
    pub id: NodeId,
    pub status: Status,
}

/// Returns the new container status, or `None` when the stored one stands.
pub fn rolled_up_status<I>(current: Option<Status>, children: I) -> Option<Status>
where
    I: IntoIterator<Item = Option<Status>>,
{
    let children: Vec<Option<Status>> = children.into_iter().collect();

    if current == Some(Status::Done) && children.iter().all(|child| *child == Some(Status::Done))
    {
        return None;
    }

    let candidate = if children
        .iter()
        .any(|child| child.is_some_and(Status::is_started))
    {
        Status::InProgress
    } else {
        Status::Draft
    };

    (current != Some(candidate)).then_some(candidate)
}

/// Recomputes one Section and, when it changes, its Document.
///
/// Applies changes to `tree` and returns them in bottom-up order.
/// Unknown ids yield no changes.
pub fn rollup_section(tree: &mut TranscriptionTree, section_id: NodeId) -> Vec<StatusChange> {
    let mut changes = Vec::new();
    let Some((document_index, section_index)) = tree.locate_section(section_id) else {
        return changes;
    };

    let section = &mut tree.documents[document_index].sections[section_index];
    let next = rolled_up_status(section.status, section.blocs.iter().map(|bloc| bloc.status));
    let Some(next) = next else {
        return changes;
    };
    section.status = Some(next);
    changes.push(StatusChange {
        level: NodeLevel::Section,
        id: section_id,
        status: next,
    });

    let document_id = tree.documents[document_index].id;
    changes.extend(rollup_document(tree, document_id));
    changes
}

/// Recomputes one Document from its Sections.
pub fn rollup_document(tree: &mut TranscriptionTree, document_id: NodeId) -> Vec<StatusChange> {
    let Some(document) = tree.document_mut(document_id) else {
        return Vec::new();
    };

    let next = rolled_up_status(
        document.status,
        document.sections.iter().map(|section| section.status),
    );
    match next {
        Some(next) => {
            document.status = Some(next);
            vec![StatusChange {
                level: NodeLevel::Document,
                id: document_id,
                status: next,
            }]
        }
        None => Vec::new(),
    }
}
