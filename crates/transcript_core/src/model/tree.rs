//! In-memory transcription tree.
//!
//! # Responsibility
//! - Hold the three-level tree for one acte.
//! - Provide id-based lookups used by the mutation engine and session.
//!
//! # Invariants
//! - `Section::document_id` equals the id of the Document holding it.
//! - `Bloc::section_id` equals the id of the Section holding it.
//! - Child vectors are kept in `position` order.

use crate::model::ids::{ActeId, NodeId};
use crate::model::status::Status;
use serde::{Deserialize, Serialize};

/// Tree level of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeLevel {
    Document,
    Section,
    Bloc,
}

impl NodeLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Section => "section",
            Self::Bloc => "bloc",
        }
    }
}

/// Closed set of Bloc presentation kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlocKind {
    /// Plain paragraph text.
    #[default]
    Paragraph,
    /// Heading line.
    Heading,
    /// Unordered list.
    BulletList,
    /// Ordered list.
    NumberedList,
    /// Quoted passage, e.g. a marginal note.
    Quote,
}

impl BlocKind {
    /// Returns the store representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Paragraph => "paragraph",
            Self::Heading => "heading",
            Self::BulletList => "bullet_list",
            Self::NumberedList => "numbered_list",
            Self::Quote => "quote",
        }
    }

    /// Parses the store representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "paragraph" => Some(Self::Paragraph),
            "heading" => Some(Self::Heading),
            "bullet_list" => Some(Self::BulletList),
            "numbered_list" => Some(Self::NumberedList),
            "quote" => Some(Self::Quote),
            _ => None,
        }
    }
}

/// Opaque span attached to a Bloc by the mention-linking collaborator.
///
/// Read-only here: loaded with the tree, never written by this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: NodeId,
    pub bloc_id: NodeId,
    /// Collaborator-defined payload, kept verbatim.
    pub payload: String,
}

/// Finest tree level: one transcribed passage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bloc {
    pub id: NodeId,
    pub section_id: NodeId,
    pub kind: BlocKind,
    pub content: String,
    /// 1-based rank among sibling Blocs.
    pub position: i64,
    /// `None` when the Bloc has no content yet.
    pub status: Option<Status>,
    pub annotations: Vec<Annotation>,
}

/// Middle tree level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub id: NodeId,
    pub document_id: NodeId,
    pub title: String,
    /// 1-based rank among sibling Sections.
    pub position: i64,
    pub status: Option<Status>,
    pub blocs: Vec<Bloc>,
}

/// Top tree level, owned by one acte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: NodeId,
    pub acte_id: ActeId,
    pub title: String,
    /// 1-based rank among the acte's Documents.
    pub position: i64,
    pub status: Option<Status>,
    pub sections: Vec<Section>,
}

/// Whole transcription tree for one acte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionTree {
    pub acte_id: ActeId,
    pub documents: Vec<Document>,
}

/// Per-status node counts for one tree level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LevelSummary {
    pub total: usize,
    pub draft: usize,
    pub in_progress: usize,
    pub done: usize,
    pub unset: usize,
}

impl LevelSummary {
    fn record(&mut self, status: Option<Status>) {
        self.total += 1;
        match status {
            Some(Status::Draft) => self.draft += 1,
            Some(Status::InProgress) => self.in_progress += 1,
            Some(Status::Done) => self.done += 1,
            None => self.unset += 1,
        }
    }
}

/// Node counts per level and status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusSummary {
    pub documents: LevelSummary,
    pub sections: LevelSummary,
    pub blocs: LevelSummary,
}

impl TranscriptionTree {
    /// Creates an empty tree for one acte.
    pub fn empty(acte_id: ActeId) -> Self {
        Self {
            acte_id,
            documents: Vec::new(),
        }
    }

    pub fn document(&self, id: NodeId) -> Option<&Document> {
        self.documents.iter().find(|document| document.id == id)
    }

    pub fn document_mut(&mut self, id: NodeId) -> Option<&mut Document> {
        self.documents.iter_mut().find(|document| document.id == id)
    }

    pub fn section(&self, id: NodeId) -> Option<&Section> {
        self.documents
            .iter()
            .flat_map(|document| document.sections.iter())
            .find(|section| section.id == id)
    }

    pub fn section_mut(&mut self, id: NodeId) -> Option<&mut Section> {
        self.documents
            .iter_mut()
            .flat_map(|document| document.sections.iter_mut())
            .find(|section| section.id == id)
    }

    pub fn bloc(&self, id: NodeId) -> Option<&Bloc> {
        self.documents
            .iter()
            .flat_map(|document| document.sections.iter())
            .flat_map(|section| section.blocs.iter())
            .find(|bloc| bloc.id == id)
    }

    pub fn bloc_mut(&mut self, id: NodeId) -> Option<&mut Bloc> {
        self.documents
            .iter_mut()
            .flat_map(|document| document.sections.iter_mut())
            .flat_map(|section| section.blocs.iter_mut())
            .find(|bloc| bloc.id == id)
    }

    /// Returns `(document_index, section_index)` for a Section id.
    pub fn locate_section(&self, id: NodeId) -> Option<(usize, usize)> {
        self.documents
            .iter()
            .enumerate()
            .find_map(|(document_index, document)| {
                document
                    .sections
                    .iter()
                    .position(|section| section.id == id)
                    .map(|section_index| (document_index, section_index))
            })
    }

    /// Returns `(document_index, section_index, bloc_index)` for a Bloc id.
    pub fn locate_bloc(&self, id: NodeId) -> Option<(usize, usize, usize)> {
        for (document_index, document) in self.documents.iter().enumerate() {
            for (section_index, section) in document.sections.iter().enumerate() {
                if let Some(bloc_index) = section.blocs.iter().position(|bloc| bloc.id == id) {
                    return Some((document_index, section_index, bloc_index));
                }
            }
        }
        None
    }

    /// Returns the Document id holding a Section.
    pub fn parent_of_section(&self, section_id: NodeId) -> Option<NodeId> {
        self.locate_section(section_id)
            .map(|(document_index, _)| self.documents[document_index].id)
    }

    /// Returns the Section id holding a Bloc.
    pub fn parent_of_bloc(&self, bloc_id: NodeId) -> Option<NodeId> {
        self.locate_bloc(bloc_id)
            .map(|(document_index, section_index, _)| {
                self.documents[document_index].sections[section_index].id
            })
    }

    /// Counts nodes per level and status.
    pub fn status_summary(&self) -> StatusSummary {
        let mut summary = StatusSummary::default();
        for document in &self.documents {
            summary.documents.record(document.status);
            for section in &document.sections {
                summary.sections.record(section.status);
                for bloc in &section.blocs {
                    summary.blocs.record(bloc.status);
                }
            }
        }
        summary
    }
}
