//! Transcription store contracts and SQLite implementation.
//!
//! # Responsibility
//! - Mirror tree mutations as row writes on `documents`, `sections`, `blocs`.
//! - Return every row belonging to one acte for the tree loader.
//!
//! # Invariants
//! - Deleting a Document or Section row cascades to its subtree.
//! - A bulk position upsert is atomic: all pairs apply or none do.
//! - Rows are returned `position ASC, id ASC`.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::ids::{ActeId, NodeId};
use crate::model::status::Status;
use crate::model::tree::{Annotation, Bloc, BlocKind, Document, NodeLevel, Section};
use rusqlite::{params, Connection, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Result type used by transcription store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from transcription store operations.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Update/delete/upsert targeted a row that does not exist.
    RowNotFound { level: NodeLevel, id: NodeId },
    /// Remote (non-SQLite) store rejected the call or could not be reached.
    ///
    /// SQLite failures surface as `Db` instead.
    Unavailable(String),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Required column is missing from expected table.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    /// Persisted data cannot be converted to a valid row.
    InvalidData(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::RowNotFound { level, id } => {
                write!(f, "{} row not found: {id}", level.as_str())
            }
            Self::Unavailable(message) => write!(f, "transcription store unavailable: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "transcription store requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "transcription store requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "transcription store requires column `{column}` in table `{table}`"
            ),
            Self::InvalidData(message) => write!(f, "invalid transcription data: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Flat `documents` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRow {
    pub id: NodeId,
    pub acte_id: ActeId,
    pub title: String,
    pub position: i64,
    pub status: Option<Status>,
}

/// Flat `sections` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionRow {
    pub id: NodeId,
    pub document_id: NodeId,
    pub title: String,
    pub position: i64,
    pub status: Option<Status>,
}

/// Flat `blocs` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlocRow {
    pub id: NodeId,
    pub section_id: NodeId,
    pub kind: BlocKind,
    pub content: String,
    pub position: i64,
    pub status: Option<Status>,
}

/// One row of any tree table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRow {
    Document(DocumentRow),
    Section(SectionRow),
    Bloc(BlocRow),
}

impl NodeRow {
    pub fn level(&self) -> NodeLevel {
        match self {
            Self::Document(_) => NodeLevel::Document,
            Self::Section(_) => NodeLevel::Section,
            Self::Bloc(_) => NodeLevel::Bloc,
        }
    }

    pub fn id(&self) -> NodeId {
        match self {
            Self::Document(row) => row.id,
            Self::Section(row) => row.id,
            Self::Bloc(row) => row.id,
        }
    }
}

impl From<&Document> for NodeRow {
    fn from(value: &Document) -> Self {
        Self::Document(DocumentRow {
            id: value.id,
            acte_id: value.acte_id,
            title: value.title.clone(),
            position: value.position,
            status: value.status,
        })
    }
}

impl From<&Section> for NodeRow {
    fn from(value: &Section) -> Self {
        Self::Section(SectionRow {
            id: value.id,
            document_id: value.document_id,
            title: value.title.clone(),
            position: value.position,
            status: value.status,
        })
    }
}

impl From<&Bloc> for NodeRow {
    fn from(value: &Bloc) -> Self {
        Self::Bloc(BlocRow {
            id: value.id,
            section_id: value.section_id,
            kind: value.kind,
            content: value.content.clone(),
            position: value.position,
            status: value.status,
        })
    }
}

/// One remote write derived from a tree mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteWrite {
    Insert(NodeRow),
    Update(NodeRow),
    Delete { level: NodeLevel, id: NodeId },
    /// Positions for one whole sibling list.
    UpsertPositions {
        level: NodeLevel,
        positions: Vec<(NodeId, i64)>,
    },
}

impl RemoteWrite {
    /// Short operation label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Insert(_) => "insert",
            Self::Update(_) => "update",
            Self::Delete { .. } => "delete",
            Self::UpsertPositions { .. } => "upsert_positions",
        }
    }

    pub fn level(&self) -> NodeLevel {
        match self {
            Self::Insert(row) | Self::Update(row) => row.level(),
            Self::Delete { level, .. } | Self::UpsertPositions { level, .. } => *level,
        }
    }
}

/// Remote store interface for transcription trees.
pub trait TranscriptionStore {
    /// Inserts one new row.
    fn insert_row(&self, row: &NodeRow) -> StoreResult<()>;
    /// Replaces every mutable column of one existing row.
    fn update_row(&self, row: &NodeRow) -> StoreResult<()>;
    /// Deletes one row and, through foreign keys, its subtree.
    fn delete_row(&self, level: NodeLevel, id: NodeId) -> StoreResult<()>;
    /// Writes `(id, position)` pairs for existing rows.
    fn upsert_positions(&self, level: NodeLevel, positions: &[(NodeId, i64)])
        -> StoreResult<()>;
    /// Lists Documents of one acte.
    fn fetch_documents(&self, acte_id: ActeId) -> StoreResult<Vec<DocumentRow>>;
    /// Lists Sections of every Document of one acte.
    fn fetch_sections(&self, acte_id: ActeId) -> StoreResult<Vec<SectionRow>>;
    /// Lists Blocs of every Section of one acte.
    fn fetch_blocs(&self, acte_id: ActeId) -> StoreResult<Vec<BlocRow>>;
    /// Lists annotation payloads attached to Blocs of one acte.
    fn fetch_annotations(&self, acte_id: ActeId) -> StoreResult<Vec<Annotation>>;

    /// Dispatches one planned write to the matching primitive.
    fn apply(&self, write: &RemoteWrite) -> StoreResult<()> {
        match write {
            RemoteWrite::Insert(row) => self.insert_row(row),
            RemoteWrite::Update(row) => self.update_row(row),
            RemoteWrite::Delete { level, id } => self.delete_row(*level, *id),
            RemoteWrite::UpsertPositions { level, positions } => {
                self.upsert_positions(*level, positions)
            }
        }
    }
}

/// SQLite-backed transcription store.
pub struct SqliteTranscriptionStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTranscriptionStore<'conn> {
    /// Creates store from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_store_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl TranscriptionStore for SqliteTranscriptionStore<'_> {
    fn insert_row(&self, row: &NodeRow) -> StoreResult<()> {
        match row {
            NodeRow::Document(row) => self.conn.execute(
                "INSERT INTO documents (id, acte_id, title, position, status)
                 VALUES (?1, ?2, ?3, ?4, ?5);",
                params![
                    row.id.to_string(),
                    row.acte_id.to_string(),
                    row.title.as_str(),
                    row.position,
                    row.status.map(Status::as_str),
                ],
            )?,
            NodeRow::Section(row) => self.conn.execute(
                "INSERT INTO sections (id, document_id, title, position, status)
                 VALUES (?1, ?2, ?3, ?4, ?5);",
                params![
                    row.id.to_string(),
                    row.document_id.to_string(),
                    row.title.as_str(),
                    row.position,
                    row.status.map(Status::as_str),
                ],
            )?,
            NodeRow::Bloc(row) => self.conn.execute(
                "INSERT INTO blocs (id, section_id, kind, content, position, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
                params![
                    row.id.to_string(),
                    row.section_id.to_string(),
                    row.kind.as_str(),
                    row.content.as_str(),
                    row.position,
                    row.status.map(Status::as_str),
                ],
            )?,
        };
        Ok(())
    }

    fn update_row(&self, row: &NodeRow) -> StoreResult<()> {
        let changed = match row {
            NodeRow::Document(row) => self.conn.execute(
                "UPDATE documents
                 SET acte_id = ?2,
                     title = ?3,
                     position = ?4,
                     status = ?5,
                     updated_at = (strftime('%s', 'now') * 1000)
                 WHERE id = ?1;",
                params![
                    row.id.to_string(),
                    row.acte_id.to_string(),
                    row.title.as_str(),
                    row.position,
                    row.status.map(Status::as_str),
                ],
            )?,
            NodeRow::Section(row) => self.conn.execute(
                "UPDATE sections
                 SET document_id = ?2,
                     title = ?3,
                     position = ?4,
                     status = ?5,
                     updated_at = (strftime('%s', 'now') * 1000)
                 WHERE id = ?1;",
                params![
                    row.id.to_string(),
                    row.document_id.to_string(),
                    row.title.as_str(),
                    row.position,
                    row.status.map(Status::as_str),
                ],
            )?,
            NodeRow::Bloc(row) => self.conn.execute(
                "UPDATE blocs
                 SET section_id = ?2,
                     kind = ?3,
                     content = ?4,
                     position = ?5,
                     status = ?6,
                     updated_at = (strftime('%s', 'now') * 1000)
                 WHERE id = ?1;",
                params![
                    row.id.to_string(),
                    row.section_id.to_string(),
                    row.kind.as_str(),
                    row.content.as_str(),
                    row.position,
                    row.status.map(Status::as_str),
                ],
            )?,
        };
        if changed == 0 {
            return Err(StoreError::RowNotFound {
                level: row.level(),
                id: row.id(),
            });
        }
        Ok(())
    }

    fn delete_row(&self, level: NodeLevel, id: NodeId) -> StoreResult<()> {
        let changed = self.conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1;", table_name(level)),
            [id.to_string()],
        )?;
        if changed == 0 {
            return Err(StoreError::RowNotFound { level, id });
        }
        Ok(())
    }

    fn upsert_positions(
        &self,
        level: NodeLevel,
        positions: &[(NodeId, i64)],
    ) -> StoreResult<()> {
        if positions.is_empty() {
            return Ok(());
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        {
            let mut stmt = tx.prepare(&format!(
                "UPDATE {}
                 SET position = ?2,
                     updated_at = (strftime('%s', 'now') * 1000)
                 WHERE id = ?1;",
                table_name(level)
            ))?;
            for (id, position) in positions {
                if stmt.execute(params![id.to_string(), *position])? == 0 {
                    // Dropping `tx` rolls back the pairs already written.
                    return Err(StoreError::RowNotFound { level, id: *id });
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn fetch_documents(&self, acte_id: ActeId) -> StoreResult<Vec<DocumentRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, acte_id, title, position, status
             FROM documents
             WHERE acte_id = ?1
             ORDER BY position ASC, id ASC;",
        )?;
        let mut rows = stmt.query([acte_id.to_string()])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(DocumentRow {
                id: parse_uuid_column(row, "id", "documents.id")?,
                acte_id: parse_uuid_column(row, "acte_id", "documents.acte_id")?,
                title: row.get("title")?,
                position: row.get("position")?,
                status: parse_status_column(row, "documents.status")?,
            });
        }
        Ok(items)
    }

    fn fetch_sections(&self, acte_id: ActeId) -> StoreResult<Vec<SectionRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                s.id AS id,
                s.document_id AS document_id,
                s.title AS title,
                s.position AS position,
                s.status AS status
             FROM sections s
             INNER JOIN documents d ON d.id = s.document_id
             WHERE d.acte_id = ?1
             ORDER BY s.position ASC, s.id ASC;",
        )?;
        let mut rows = stmt.query([acte_id.to_string()])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(SectionRow {
                id: parse_uuid_column(row, "id", "sections.id")?,
                document_id: parse_uuid_column(row, "document_id", "sections.document_id")?,
                title: row.get("title")?,
                position: row.get("position")?,
                status: parse_status_column(row, "sections.status")?,
            });
        }
        Ok(items)
    }

    fn fetch_blocs(&self, acte_id: ActeId) -> StoreResult<Vec<BlocRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                b.id AS id,
                b.section_id AS section_id,
                b.kind AS kind,
                b.content AS content,
                b.position AS position,
                b.status AS status
             FROM blocs b
             INNER JOIN sections s ON s.id = b.section_id
             INNER JOIN documents d ON d.id = s.document_id
             WHERE d.acte_id = ?1
             ORDER BY b.position ASC, b.id ASC;",
        )?;
        let mut rows = stmt.query([acte_id.to_string()])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            let kind_text: String = row.get("kind")?;
            let kind = BlocKind::parse(&kind_text).ok_or_else(|| {
                StoreError::InvalidData(format!("invalid bloc kind `{kind_text}` in blocs.kind"))
            })?;
            items.push(BlocRow {
                id: parse_uuid_column(row, "id", "blocs.id")?,
                section_id: parse_uuid_column(row, "section_id", "blocs.section_id")?,
                kind,
                content: row.get("content")?,
                position: row.get("position")?,
                status: parse_status_column(row, "blocs.status")?,
            });
        }
        Ok(items)
    }

    fn fetch_annotations(&self, acte_id: ActeId) -> StoreResult<Vec<Annotation>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                a.id AS id,
                a.bloc_id AS bloc_id,
                a.payload AS payload
             FROM annotations a
             INNER JOIN blocs b ON b.id = a.bloc_id
             INNER JOIN sections s ON s.id = b.section_id
             INNER JOIN documents d ON d.id = s.document_id
             WHERE d.acte_id = ?1
             ORDER BY a.created_at ASC, a.id ASC;",
        )?;
        let mut rows = stmt.query([acte_id.to_string()])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(Annotation {
                id: parse_uuid_column(row, "id", "annotations.id")?,
                bloc_id: parse_uuid_column(row, "bloc_id", "annotations.bloc_id")?,
                payload: row.get("payload")?,
            });
        }
        Ok(items)
    }
}

fn table_name(level: NodeLevel) -> &'static str {
    match level {
        NodeLevel::Document => "documents",
        NodeLevel::Section => "sections",
        NodeLevel::Bloc => "blocs",
    }
}

fn parse_uuid_column(row: &Row<'_>, name: &str, column: &'static str) -> StoreResult<Uuid> {
    let value: String = row.get(name)?;
    Uuid::parse_str(&value)
        .map_err(|_| StoreError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

fn parse_status_column(row: &Row<'_>, column: &'static str) -> StoreResult<Option<Status>> {
    match row.get::<_, Option<String>>("status")? {
        None => Ok(None),
        Some(value) => Status::parse(&value).map(Some).ok_or_else(|| {
            StoreError::InvalidData(format!("invalid status `{value}` in {column}"))
        }),
    }
}

fn ensure_store_connection_ready(conn: &Connection) -> StoreResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(StoreError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    const REQUIRED: &[(&str, &[&str])] = &[
        ("documents", &["id", "acte_id", "title", "position", "status"]),
        ("sections", &["id", "document_id", "title", "position", "status"]),
        (
            "blocs",
            &["id", "section_id", "kind", "content", "position", "status"],
        ),
        ("annotations", &["id", "bloc_id", "payload", "created_at"]),
    ];

    for &(table, columns) in REQUIRED {
        let present = table_columns(conn, table)?;
        if present.is_empty() {
            return Err(StoreError::MissingRequiredTable(table));
        }
        for &column in columns {
            if !present.iter().any(|name| name == column) {
                return Err(StoreError::MissingRequiredColumn { table, column });
            }
        }
    }
    Ok(())
}

fn table_columns(conn: &Connection, table: &str) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        columns.push(row.get::<_, String>(1)?);
    }
    Ok(columns)
}
