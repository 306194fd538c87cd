//! Local term store contract and SQLite implementation.
//!
//! # Responsibility
//! - Provide the storage port the synchronizer depends on.
//! - Keep SQL for `terms`, `term_taxonomy`, `term_data`,
//!   `term_relationships` and `content_term_links` inside this boundary.
//!
//! # Invariants
//! - `term_data.external_id` never changes once written for a local id.
//! - `replace_relationships` swaps the whole edge set of one local id in a
//!   single transaction.
//! - Deletion is logical (`term_data.deleted = 1`).

use crate::db::DbError;
use crate::model::term::{
    ClassificationId, ExternalTermId, LocalTermId, RelationKind, RelationshipEdge, Taxonomy, Term,
    TermData, TermRecord, TermReference,
};
use crate::model::timestamp::{datetime_to_epoch, epoch_to_datetime};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

static SLUG_SEPARATOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{L}\p{N}]+").expect("valid slug regex"));

const FALLBACK_SLUG: &str = "term";

const TERM_SELECT_SQL: &str = "SELECT
    t.term_id,
    t.name,
    t.slug,
    d.external_id,
    d.scope_note,
    d.preferred,
    d.ambiguous,
    d.deleted,
    d.last_retrieved
FROM terms t
LEFT JOIN term_data d ON d.term_id = t.term_id";

pub type RepoResult<T> = Result<T, RepoError>;

/// Term store error for persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    NotFound(LocalTermId),
    /// Slug already used by another local term.
    SlugTaken(String),
    /// The local id is already mapped to a different external id.
    ExternalIdConflict {
        local_id: LocalTermId,
        existing: ExternalTermId,
        incoming: ExternalTermId,
    },
    /// The external id is already mapped to another local id.
    ExternalIdTaken(ExternalTermId),
    MissingRequiredTable(&'static str),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "term not found: {id}"),
            Self::SlugTaken(slug) => write!(f, "term slug already taken: `{slug}`"),
            Self::ExternalIdConflict {
                local_id,
                existing,
                incoming,
            } => write!(
                f,
                "term {local_id} is mapped to external id {existing}, refusing to remap to {incoming}"
            ),
            Self::ExternalIdTaken(id) => {
                write!(f, "external id {id} is already mapped to another term")
            }
            Self::MissingRequiredTable(table) => {
                write!(f, "term store requires table `{table}`")
            }
            Self::InvalidData(message) => write!(f, "invalid persisted term data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Storage port used by the synchronizer.
pub trait TermStore {
    /// Loads the stored attributes of one local term.
    fn get_term(&self, local_id: LocalTermId) -> RepoResult<Option<TermRecord>>;
    /// Maps an external id to its local id.
    fn find_by_external_id(&self, external_id: ExternalTermId)
        -> RepoResult<Option<LocalTermId>>;
    /// Lists local terms with exactly this display name, oldest first.
    fn find_by_name(&self, name: &str) -> RepoResult<Vec<TermRecord>>;
    /// Inserts a local term, optionally classified in `taxonomy`.
    ///
    /// Fails with `RepoError::SlugTaken` when `slug` is in use.
    fn insert_term(
        &self,
        name: &str,
        slug: &str,
        taxonomy: Option<&Taxonomy>,
    ) -> RepoResult<LocalTermId>;
    /// Updates the display name of a local term.
    fn rename_term(&self, local_id: LocalTermId, name: &str) -> RepoResult<()>;
    /// Inserts or updates thesaurus metadata for a local term.
    fn write_term_data(&self, local_id: LocalTermId, data: &TermData) -> RepoResult<()>;
    /// Sets the deleted flag of a mapped term.
    fn mark_deleted(&self, local_id: LocalTermId) -> RepoResult<()>;
    /// Returns the first taxonomy the term is classified in.
    fn classification_of(&self, local_id: LocalTermId) -> RepoResult<Option<Taxonomy>>;
    /// Returns the classification-scoped id of `(local_id, taxonomy)`.
    fn classification_id(
        &self,
        local_id: LocalTermId,
        taxonomy: &Taxonomy,
    ) -> RepoResult<Option<ClassificationId>>;
    /// Classifies the term in `taxonomy` if needed and returns the id.
    fn ensure_classification(
        &self,
        local_id: LocalTermId,
        taxonomy: &Taxonomy,
    ) -> RepoResult<ClassificationId>;
    /// Sets the hierarchical parent pointer. Returns `false` when the term
    /// is not classified in `taxonomy`.
    fn set_parent(
        &self,
        local_id: LocalTermId,
        taxonomy: &Taxonomy,
        parent: LocalTermId,
    ) -> RepoResult<bool>;
    /// Reads the hierarchical parent pointer; `None` for root terms.
    fn parent_of(
        &self,
        local_id: LocalTermId,
        taxonomy: &Taxonomy,
    ) -> RepoResult<Option<LocalTermId>>;
    /// Replaces every edge touching `local_id` with `edges` atomically.
    fn replace_relationships(
        &self,
        local_id: LocalTermId,
        edges: &[RelationshipEdge],
    ) -> RepoResult<usize>;
    /// Lists every edge touching `local_id`, sorted.
    fn relationships_for(&self, local_id: LocalTermId) -> RepoResult<Vec<RelationshipEdge>>;
    /// Moves every content association from one classification to another.
    fn repoint_content(&self, from: ClassificationId, to: ClassificationId) -> RepoResult<usize>;
    /// Loads a mapped term with its relationship references.
    ///
    /// Returns `None` for unknown ids and for local terms without an
    /// external id.
    fn load_term(&self, local_id: LocalTermId) -> RepoResult<Option<Term>>;
}

/// SQLite-backed term store.
pub struct SqliteTermStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTermStore<'conn> {
    /// Creates a store from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_term_connection_ready(conn)?;
        Ok(Self { conn })
    }

    /// Links one content item to a classification.
    pub fn link_content(
        &self,
        content_id: i64,
        classification: ClassificationId,
    ) -> RepoResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO content_term_links (content_id, term_taxonomy_id)
             VALUES (?1, ?2);",
            params![content_id, classification],
        )?;
        Ok(())
    }

    /// Lists content ids linked to a classification, ascending.
    pub fn content_for(&self, classification: ClassificationId) -> RepoResult<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT content_id
             FROM content_term_links
             WHERE term_taxonomy_id = ?1
             ORDER BY content_id ASC;",
        )?;
        let mut rows = stmt.query([classification])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            ids.push(row.get(0)?);
        }
        Ok(ids)
    }
}

impl TermStore for SqliteTermStore<'_> {
    fn get_term(&self, local_id: LocalTermId) -> RepoResult<Option<TermRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{TERM_SELECT_SQL} WHERE t.term_id = ?1;"))?;
        let mut rows = stmt.query([local_id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_term_row(row)?));
        }
        Ok(None)
    }

    fn find_by_external_id(
        &self,
        external_id: ExternalTermId,
    ) -> RepoResult<Option<LocalTermId>> {
        let local_id = self
            .conn
            .query_row(
                "SELECT term_id FROM term_data WHERE external_id = ?1;",
                [external_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(local_id)
    }

    fn find_by_name(&self, name: &str) -> RepoResult<Vec<TermRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "{TERM_SELECT_SQL} WHERE t.name = ?1 ORDER BY t.term_id ASC;"
        ))?;
        let mut rows = stmt.query([name])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_term_row(row)?);
        }
        Ok(records)
    }

    fn insert_term(
        &self,
        name: &str,
        slug: &str,
        taxonomy: Option<&Taxonomy>,
    ) -> RepoResult<LocalTermId> {
        let tx = self.conn.unchecked_transaction()?;
        match tx.execute(
            "INSERT INTO terms (name, slug) VALUES (?1, ?2);",
            params![name, slug],
        ) {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(RepoError::SlugTaken(slug.to_string()));
            }
            Err(err) => return Err(err.into()),
        }
        let local_id = tx.last_insert_rowid();
        if let Some(taxonomy) = taxonomy {
            tx.execute(
                "INSERT INTO term_taxonomy (term_id, taxonomy) VALUES (?1, ?2);",
                params![local_id, taxonomy.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(local_id)
    }

    fn rename_term(&self, local_id: LocalTermId, name: &str) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE terms SET name = ?2 WHERE term_id = ?1;",
            params![local_id, name],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(local_id));
        }
        Ok(())
    }

    fn write_term_data(&self, local_id: LocalTermId, data: &TermData) -> RepoResult<()> {
        if !term_exists(self.conn, local_id)? {
            return Err(RepoError::NotFound(local_id));
        }

        let existing: Option<ExternalTermId> = self
            .conn
            .query_row(
                "SELECT external_id FROM term_data WHERE term_id = ?1;",
                [local_id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(existing) = existing {
            if existing != data.external_id {
                return Err(RepoError::ExternalIdConflict {
                    local_id,
                    existing,
                    incoming: data.external_id,
                });
            }
        }

        let result = self.conn.execute(
            "INSERT INTO term_data (
                term_id,
                external_id,
                scope_note,
                preferred,
                ambiguous,
                deleted,
                last_retrieved
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (term_id) DO UPDATE SET
                scope_note = excluded.scope_note,
                preferred = excluded.preferred,
                ambiguous = excluded.ambiguous,
                deleted = excluded.deleted,
                last_retrieved = excluded.last_retrieved;",
            params![
                local_id,
                data.external_id,
                data.scope_note.as_str(),
                bool_to_int(data.preferred),
                bool_to_int(data.ambiguous),
                bool_to_int(data.deleted),
                epoch_to_datetime(data.last_retrieved),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                Err(RepoError::ExternalIdTaken(data.external_id))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn mark_deleted(&self, local_id: LocalTermId) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE term_data SET deleted = 1 WHERE term_id = ?1;",
            [local_id],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(local_id));
        }
        Ok(())
    }

    fn classification_of(&self, local_id: LocalTermId) -> RepoResult<Option<Taxonomy>> {
        let name: Option<String> = self
            .conn
            .query_row(
                "SELECT taxonomy
                 FROM term_taxonomy
                 WHERE term_id = ?1
                 ORDER BY term_taxonomy_id ASC
                 LIMIT 1;",
                [local_id],
                |row| row.get(0),
            )
            .optional()?;
        name.map(|value| {
            value.parse::<Taxonomy>().map_err(|_| {
                RepoError::InvalidData(format!(
                    "invalid taxonomy `{value}` in term_taxonomy.taxonomy"
                ))
            })
        })
        .transpose()
    }

    fn classification_id(
        &self,
        local_id: LocalTermId,
        taxonomy: &Taxonomy,
    ) -> RepoResult<Option<ClassificationId>> {
        let id = self
            .conn
            .query_row(
                "SELECT term_taxonomy_id
                 FROM term_taxonomy
                 WHERE term_id = ?1 AND taxonomy = ?2;",
                params![local_id, taxonomy.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn ensure_classification(
        &self,
        local_id: LocalTermId,
        taxonomy: &Taxonomy,
    ) -> RepoResult<ClassificationId> {
        if !term_exists(self.conn, local_id)? {
            return Err(RepoError::NotFound(local_id));
        }
        self.conn.execute(
            "INSERT OR IGNORE INTO term_taxonomy (term_id, taxonomy) VALUES (?1, ?2);",
            params![local_id, taxonomy.as_str()],
        )?;
        self.classification_id(local_id, taxonomy)?
            .ok_or(RepoError::NotFound(local_id))
    }

    fn set_parent(
        &self,
        local_id: LocalTermId,
        taxonomy: &Taxonomy,
        parent: LocalTermId,
    ) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "UPDATE term_taxonomy
             SET parent = ?3
             WHERE term_id = ?1 AND taxonomy = ?2;",
            params![local_id, taxonomy.as_str(), parent],
        )?;
        Ok(changed > 0)
    }

    fn parent_of(
        &self,
        local_id: LocalTermId,
        taxonomy: &Taxonomy,
    ) -> RepoResult<Option<LocalTermId>> {
        let parent: Option<LocalTermId> = self
            .conn
            .query_row(
                "SELECT parent
                 FROM term_taxonomy
                 WHERE term_id = ?1 AND taxonomy = ?2;",
                params![local_id, taxonomy.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(parent.filter(|value| *value != 0))
    }

    fn replace_relationships(
        &self,
        local_id: LocalTermId,
        edges: &[RelationshipEdge],
    ) -> RepoResult<usize> {
        let unique: BTreeSet<RelationshipEdge> = edges
            .iter()
            .copied()
            .filter(|edge| edge.touches(local_id) && !edge.is_self_loop())
            .collect();

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM term_relationships
             WHERE term_id = ?1 OR related_id = ?1;",
            [local_id],
        )?;
        for edge in &unique {
            tx.execute(
                "INSERT INTO term_relationships (term_id, rel_type, related_id)
                 VALUES (?1, ?2, ?3);",
                params![edge.term_id, edge.kind.as_db(), edge.related_id],
            )?;
        }
        tx.commit()?;
        Ok(unique.len())
    }

    fn relationships_for(&self, local_id: LocalTermId) -> RepoResult<Vec<RelationshipEdge>> {
        let mut stmt = self.conn.prepare(
            "SELECT term_id, rel_type, related_id
             FROM term_relationships
             WHERE term_id = ?1 OR related_id = ?1;",
        )?;
        let mut rows = stmt.query([local_id])?;
        let mut edges = Vec::new();
        while let Some(row) = rows.next()? {
            let rel_type: String = row.get("rel_type")?;
            let kind = RelationKind::parse_db(&rel_type).ok_or_else(|| {
                RepoError::InvalidData(format!(
                    "invalid relation type `{rel_type}` in term_relationships.rel_type"
                ))
            })?;
            edges.push(RelationshipEdge {
                term_id: row.get("term_id")?,
                kind,
                related_id: row.get("related_id")?,
            });
        }
        edges.sort();
        Ok(edges)
    }

    fn repoint_content(&self, from: ClassificationId, to: ClassificationId) -> RepoResult<usize> {
        if from == to {
            return Ok(0);
        }
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO content_term_links (content_id, term_taxonomy_id)
             SELECT content_id, ?2
             FROM content_term_links
             WHERE term_taxonomy_id = ?1;",
            params![from, to],
        )?;
        let removed = tx.execute(
            "DELETE FROM content_term_links WHERE term_taxonomy_id = ?1;",
            [from],
        )?;
        tx.commit()?;
        Ok(removed)
    }

    fn load_term(&self, local_id: LocalTermId) -> RepoResult<Option<Term>> {
        let Some(record) = self.get_term(local_id)? else {
            return Ok(None);
        };
        let Some(data) = record.data else {
            return Ok(None);
        };

        let mut term = Term::new(data.external_id, record.name);
        term.local_id = Some(local_id);
        term.scope_note = data.scope_note;
        term.taxonomy = self.classification_of(local_id)?;
        term.ambiguous = data.ambiguous;
        term.deleted = data.deleted;
        term.last_retrieved = data.last_retrieved;

        for edge in self.relationships_for(local_id)? {
            let outgoing = edge.term_id == local_id;
            let other = if outgoing { edge.related_id } else { edge.term_id };
            let Some(reference) = term_reference(self.conn, other)? else {
                continue;
            };
            let bucket = match (edge.kind, outgoing) {
                (RelationKind::Narrower, true) => &mut term.narrower,
                (RelationKind::Narrower, false) => &mut term.broader,
                (RelationKind::UsedFor, true) => &mut term.used_for,
                (RelationKind::UsedFor, false) => &mut term.use_terms,
                (RelationKind::Related, _) => &mut term.related,
            };
            bucket.push(reference);
        }

        Ok(Some(term))
    }
}

/// Normalizes a display name into a slug.
pub fn slugify(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    let slug = SLUG_SEPARATOR_RE.replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug.to_string()
    }
}

/// Returns the slug candidate for a zero-based attempt: `foo`, `foo-2`, ...
pub fn suffixed_slug(base: &str, attempt: u32) -> String {
    if attempt == 0 {
        base.to_string()
    } else {
        format!("{base}-{}", attempt + 1)
    }
}

fn parse_term_row(row: &Row<'_>) -> RepoResult<TermRecord> {
    let local_id: LocalTermId = row.get("term_id")?;
    let external_id: Option<ExternalTermId> = row.get("external_id")?;

    let data = match external_id {
        Some(external_id) => {
            let last_retrieved_text: Option<String> = row.get("last_retrieved")?;
            let last_retrieved =
                datetime_to_epoch(last_retrieved_text.as_deref()).ok_or_else(|| {
                    RepoError::InvalidData(format!(
                        "invalid last_retrieved value for term {local_id}"
                    ))
                })?;
            Some(TermData {
                external_id,
                scope_note: row.get("scope_note")?,
                preferred: int_to_bool(row.get("preferred")?, "preferred")?,
                ambiguous: int_to_bool(row.get("ambiguous")?, "ambiguous")?,
                deleted: int_to_bool(row.get("deleted")?, "deleted")?,
                last_retrieved,
            })
        }
        None => None,
    };

    Ok(TermRecord {
        local_id,
        name: row.get("name")?,
        slug: row.get("slug")?,
        data,
    })
}

fn term_reference(conn: &Connection, local_id: LocalTermId) -> RepoResult<Option<TermReference>> {
    let row: Option<(ExternalTermId, String)> = conn
        .query_row(
            "SELECT d.external_id, t.name
             FROM terms t
             INNER JOIN term_data d ON d.term_id = t.term_id
             WHERE t.term_id = ?1;",
            [local_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(row.map(|(external_id, name)| TermReference::new(external_id, name)))
}

fn term_exists(conn: &Connection, local_id: LocalTermId) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM terms WHERE term_id = ?1);",
        [local_id],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == ErrorCode::ConstraintViolation
                && inner.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn ensure_term_connection_ready(conn: &Connection) -> RepoResult<()> {
    for table in [
        "terms",
        "term_taxonomy",
        "term_data",
        "term_relationships",
        "content_term_links",
    ] {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(RepoError::MissingRequiredTable(table));
        }
    }
    Ok(())
}

fn int_to_bool(value: Option<i64>, column: &str) -> RepoResult<bool> {
    match value {
        Some(0) | None => Ok(false),
        Some(1) => Ok(true),
        Some(other) => Err(RepoError::InvalidData(format!(
            "invalid {column} value `{other}` in term_data.{column}"
        ))),
    }
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
