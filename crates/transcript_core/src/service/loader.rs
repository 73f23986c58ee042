//! Tree loader.
//!
//! # Responsibility
//! - Fetch every row of one acte and assemble the three-level tree.
//!
//! # Invariants
//! - Every sibling list is sorted `position ASC, id ASC`.
//! - Rows whose parent is not part of the acte are rejected, not dropped.
//! - The result always replaces the in-memory tree wholesale.

use crate::model::ids::{ActeId, NodeId};
use crate::model::tree::{Bloc, Document, Section, TranscriptionTree};
use crate::ordering::sort_by_position;
use crate::repo::transcription_repo::{StoreError, StoreResult, TranscriptionStore};
use log::{error, info};
use std::collections::HashMap;
use std::time::Instant;

/// Loads the full tree of `acte_id`, annotations included.
pub fn load_tree<S>(store: &S, acte_id: ActeId) -> StoreResult<TranscriptionTree>
where
    S: TranscriptionStore + ?Sized,
{
    let started_at = Instant::now();
    match assemble(store, acte_id) {
        Ok(tree) => {
            let summary = tree.status_summary();
            info!(
                "event=tree_load module=loader status=ok acte_id={acte_id} documents={} sections={} blocs={} duration_ms={}",
                summary.documents.total,
                summary.sections.total,
                summary.blocs.total,
                started_at.elapsed().as_millis()
            );
            Ok(tree)
        }
        Err(err) => {
            error!(
                "event=tree_load module=loader status=error acte_id={acte_id} duration_ms={} error={err}",
                started_at.elapsed().as_millis()
            );
            Err(err)
        }
    }
}

fn assemble<S>(store: &S, acte_id: ActeId) -> StoreResult<TranscriptionTree>
where
    S: TranscriptionStore + ?Sized,
{
    let mut documents: Vec<Document> = store
        .fetch_documents(acte_id)?
        .into_iter()
        .map(|row| Document {
            id: row.id,
            acte_id: row.acte_id,
            title: row.title,
            position: row.position,
            status: row.status,
            sections: Vec::new(),
        })
        .collect();
    sort_by_position(&mut documents);
    let document_index: HashMap<NodeId, usize> = documents
        .iter()
        .enumerate()
        .map(|(index, document)| (document.id, index))
        .collect();

    for row in store.fetch_sections(acte_id)? {
        let index = *document_index
            .get(&row.document_id)
            .ok_or_else(|| orphan("section", row.id, "document", row.document_id))?;
        documents[index].sections.push(Section {
            id: row.id,
            document_id: row.document_id,
            title: row.title,
            position: row.position,
            status: row.status,
            blocs: Vec::new(),
        });
    }

    let mut section_index: HashMap<NodeId, (usize, usize)> = HashMap::new();
    for (d, document) in documents.iter_mut().enumerate() {
        sort_by_position(&mut document.sections);
        for (s, section) in document.sections.iter().enumerate() {
            section_index.insert(section.id, (d, s));
        }
    }

    for row in store.fetch_blocs(acte_id)? {
        let (d, s) = *section_index
            .get(&row.section_id)
            .ok_or_else(|| orphan("bloc", row.id, "section", row.section_id))?;
        documents[d].sections[s].blocs.push(Bloc {
            id: row.id,
            section_id: row.section_id,
            kind: row.kind,
            content: row.content,
            position: row.position,
            status: row.status,
            annotations: Vec::new(),
        });
    }

    let mut bloc_index: HashMap<NodeId, (usize, usize, usize)> = HashMap::new();
    for (d, document) in documents.iter_mut().enumerate() {
        for (s, section) in document.sections.iter_mut().enumerate() {
            sort_by_position(&mut section.blocs);
            for (b, bloc) in section.blocs.iter().enumerate() {
                bloc_index.insert(bloc.id, (d, s, b));
            }
        }
    }

    for annotation in store.fetch_annotations(acte_id)? {
        let (d, s, b) = *bloc_index
            .get(&annotation.bloc_id)
            .ok_or_else(|| orphan("annotation", annotation.id, "bloc", annotation.bloc_id))?;
        documents[d].sections[s].blocs[b].annotations.push(annotation);
    }

    Ok(TranscriptionTree {
        acte_id,
        documents,
    })
}

fn orphan(kind: &str, id: NodeId, parent_kind: &str, parent_id: NodeId) -> StoreError {
    StoreError::InvalidData(format!(
        "{kind} {id} references {parent_kind} {parent_id} outside the loaded acte"
    ))
}
