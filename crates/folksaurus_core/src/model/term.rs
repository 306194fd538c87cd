//! Term domain model.
//!
//! # Responsibility
//! - Define the authoritative `Term` record exchanged with the thesaurus.
//! - Define the stored `TermRecord` read model and relationship edges.
//! - Derive the display status of a stored term.
//!
//! # Invariants
//! - `preferred` is never stored on `Term`; it is derived from `use_terms`.
//! - `RelationshipEdge::related` always orders endpoints `(min, max)`.
//! - Display status precedence is `deleted > ambiguous > nonpreferred`.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Identifier assigned by the local term store.
pub type LocalTermId = i64;

/// Identifier assigned by the thesaurus source.
pub type ExternalTermId = i64;

/// Identifier pairing a local term with one taxonomy (`term_taxonomy_id`).
///
/// Content associations are keyed by this id, not by the bare local id.
pub type ClassificationId = i64;

/// Classification a local term belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Taxonomy {
    Category,
    PostTag,
    /// Any other named taxonomy registered by the host.
    Custom(String),
}

impl Taxonomy {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Category => "category",
            Self::PostTag => "post_tag",
            Self::Custom(name) => name.as_str(),
        }
    }
}

impl Display for Taxonomy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Taxonomy {
    type Err = TermValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "" => Err(TermValidationError::EmptyTaxonomy),
            "category" => Ok(Self::Category),
            "post_tag" => Ok(Self::PostTag),
            other => Ok(Self::Custom(other.to_string())),
        }
    }
}

impl TryFrom<String> for Taxonomy {
    type Error = TermValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Taxonomy> for String {
    fn from(value: Taxonomy) -> Self {
        value.as_str().to_string()
    }
}

/// Relationship endpoint as described by the thesaurus, before resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermReference {
    pub external_id: ExternalTermId,
    pub name: String,
}

impl TermReference {
    pub fn new(external_id: ExternalTermId, name: impl Into<String>) -> Self {
        Self {
            external_id,
            name: name.into(),
        }
    }
}

/// Authoritative term record as supplied by the thesaurus source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    /// Known local id, if the caller already mapped this term.
    pub local_id: Option<LocalTermId>,
    pub external_id: ExternalTermId,
    pub name: String,
    pub scope_note: String,
    /// Taxonomy used for placeholders and parent pointers. When `None`, the
    /// stored classification of `local_id` is used instead.
    pub taxonomy: Option<Taxonomy>,
    /// True when the name maps to several distinct thesaurus concepts.
    pub ambiguous: bool,
    pub deleted: bool,
    /// Unix seconds of the last retrieval from the thesaurus.
    pub last_retrieved: i64,
    pub broader: Vec<TermReference>,
    pub narrower: Vec<TermReference>,
    pub related: Vec<TermReference>,
    /// Non-preferred aliases pointing at this term.
    pub used_for: Vec<TermReference>,
    /// Preferred terms this term is an alias of.
    pub use_terms: Vec<TermReference>,
}

impl Term {
    /// Creates a preferred term with no relationships.
    pub fn new(external_id: ExternalTermId, name: impl Into<String>) -> Self {
        Self {
            local_id: None,
            external_id,
            name: name.into(),
            scope_note: String::new(),
            taxonomy: None,
            ambiguous: false,
            deleted: false,
            last_retrieved: 0,
            broader: Vec::new(),
            narrower: Vec::new(),
            related: Vec::new(),
            used_for: Vec::new(),
            use_terms: Vec::new(),
        }
    }

    /// A term is preferred unless it designates a preferred alternative.
    pub fn is_preferred(&self) -> bool {
        self.use_terms.is_empty()
    }

    /// Returns the single replacement content should move to, if any.
    ///
    /// Ambiguous terms have no unambiguous replacement.
    pub fn preferred_replacement(&self) -> Option<&TermReference> {
        if self.ambiguous {
            return None;
        }
        self.use_terms.first()
    }

    /// Iterates every relationship reference regardless of kind.
    pub fn references(&self) -> impl Iterator<Item = &TermReference> {
        self.broader
            .iter()
            .chain(&self.narrower)
            .chain(&self.related)
            .chain(&self.used_for)
            .chain(&self.use_terms)
    }

    /// Checks record-level invariants before persistence.
    pub fn validate(&self) -> Result<(), TermValidationError> {
        if self.external_id <= 0 {
            return Err(TermValidationError::InvalidExternalId(self.external_id));
        }
        if self.name.trim().is_empty() {
            return Err(TermValidationError::EmptyName(self.external_id));
        }
        if self.last_retrieved < 0 {
            return Err(TermValidationError::NegativeTimestamp(self.last_retrieved));
        }
        for reference in self.references() {
            if reference.external_id <= 0 {
                return Err(TermValidationError::InvalidExternalId(
                    reference.external_id,
                ));
            }
            if reference.name.trim().is_empty() {
                return Err(TermValidationError::EmptyName(reference.external_id));
            }
            if reference.external_id == self.external_id {
                return Err(TermValidationError::SelfReference(self.external_id));
            }
        }
        Ok(())
    }
}

/// Invariant violations of a `Term` or `Taxonomy` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermValidationError {
    InvalidExternalId(ExternalTermId),
    EmptyName(ExternalTermId),
    NegativeTimestamp(i64),
    SelfReference(ExternalTermId),
    EmptyTaxonomy,
}

impl Display for TermValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidExternalId(id) => write!(f, "external id must be positive, got {id}"),
            Self::EmptyName(id) => write!(f, "term {id} has an empty name"),
            Self::NegativeTimestamp(value) => {
                write!(f, "last_retrieved must not be negative, got {value}")
            }
            Self::SelfReference(id) => write!(f, "term {id} references itself"),
            Self::EmptyTaxonomy => write!(f, "taxonomy name cannot be empty"),
        }
    }
}

impl Error for TermValidationError {}

/// Thesaurus metadata stored alongside a local term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermData {
    pub external_id: ExternalTermId,
    pub scope_note: String,
    pub preferred: bool,
    pub ambiguous: bool,
    pub deleted: bool,
    /// Unix seconds; zero means never retrieved.
    pub last_retrieved: i64,
}

impl TermData {
    /// Zeroed metadata written for relationship placeholders.
    pub fn placeholder(external_id: ExternalTermId) -> Self {
        Self {
            external_id,
            scope_note: String::new(),
            preferred: false,
            ambiguous: false,
            deleted: false,
            last_retrieved: 0,
        }
    }

    /// Metadata derived from an authoritative record.
    pub fn from_term(term: &Term) -> Self {
        Self {
            external_id: term.external_id,
            scope_note: term.scope_note.clone(),
            preferred: term.is_preferred(),
            ambiguous: term.ambiguous,
            deleted: term.deleted,
            last_retrieved: term.last_retrieved,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.last_retrieved == 0
    }
}

/// Stored local term with optional thesaurus metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermRecord {
    pub local_id: LocalTermId,
    pub name: String,
    pub slug: String,
    /// `None` for local terms never linked to the thesaurus.
    pub data: Option<TermData>,
}

impl TermRecord {
    pub fn external_id(&self) -> Option<ExternalTermId> {
        self.data.as_ref().map(|data| data.external_id)
    }

    pub fn is_preferred(&self) -> bool {
        self.data.as_ref().is_some_and(|data| data.preferred)
    }

    pub fn display_status(&self) -> DisplayStatus {
        DisplayStatus::derive(self.data.as_ref())
    }
}

/// Flag shown next to a rendered term link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayStatus {
    Deleted,
    Ambiguous,
    NonPreferred,
    None,
}

impl DisplayStatus {
    /// Derives the status of stored metadata.
    ///
    /// Local-only terms and never-retrieved placeholders derive `None`
    /// unless they were marked deleted.
    pub fn derive(data: Option<&TermData>) -> Self {
        let Some(data) = data else {
            return Self::None;
        };
        if data.deleted {
            return Self::Deleted;
        }
        if data.is_placeholder() {
            return Self::None;
        }
        if data.ambiguous {
            Self::Ambiguous
        } else if !data.preferred {
            Self::NonPreferred
        } else {
            Self::None
        }
    }

    pub fn css_class(self) -> Option<&'static str> {
        match self {
            Self::Deleted => Some("deleted"),
            Self::Ambiguous => Some("ambiguous"),
            Self::NonPreferred => Some("nonpreferred"),
            Self::None => None,
        }
    }
}

/// Kind of a stored relationship edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RelationKind {
    /// `term_id` is broader than `related_id`.
    Narrower,
    /// `term_id` is preferred over the alias `related_id`.
    UsedFor,
    /// Symmetric; `term_id < related_id`.
    Related,
}

impl RelationKind {
    pub fn as_db(self) -> &'static str {
        match self {
            Self::Narrower => "NT",
            Self::UsedFor => "UF",
            Self::Related => "RT",
        }
    }

    pub fn parse_db(value: &str) -> Option<Self> {
        match value {
            "NT" => Some(Self::Narrower),
            "UF" => Some(Self::UsedFor),
            "RT" => Some(Self::Related),
            _ => None,
        }
    }
}

/// Directed (or canonicalized symmetric) edge between two local terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationshipEdge {
    pub term_id: LocalTermId,
    pub kind: RelationKind,
    pub related_id: LocalTermId,
}

impl RelationshipEdge {
    pub fn narrower(broader: LocalTermId, narrower: LocalTermId) -> Self {
        Self {
            term_id: broader,
            kind: RelationKind::Narrower,
            related_id: narrower,
        }
    }

    pub fn used_for(preferred: LocalTermId, alias: LocalTermId) -> Self {
        Self {
            term_id: preferred,
            kind: RelationKind::UsedFor,
            related_id: alias,
        }
    }

    pub fn related(a: LocalTermId, b: LocalTermId) -> Self {
        Self {
            term_id: a.min(b),
            kind: RelationKind::Related,
            related_id: a.max(b),
        }
    }

    pub fn is_self_loop(&self) -> bool {
        self.term_id == self.related_id
    }

    pub fn touches(&self, local_id: LocalTermId) -> bool {
        self.term_id == local_id || self.related_id == local_id
    }
}
