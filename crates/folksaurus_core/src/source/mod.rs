//! Thesaurus source port.
//!
//! # Responsibility
//! - Define how authoritative term records are fetched.
//! - Parse and validate raw payloads into `Term` values at the boundary.
//!
//! # Invariants
//! - Every `Term` returned by a source has passed `Term::validate()`.
//! - Transport and payload failures are reported as `SourceError`, never
//!   as panics.

pub mod dir;
pub mod payload;

use crate::model::term::{ExternalTermId, Term};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub use dir::JsonDirSource;
pub use payload::{parse_term_payload, TermPayload};

pub type SourceResult<T> = Result<T, SourceError>;

/// Failure reported by a thesaurus source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The source could not be reached or read.
    Unavailable(String),
    /// The source answered with data that does not form a valid term.
    Malformed(String),
    /// The source does not know this external id (anymore).
    NotFound(ExternalTermId),
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(message) => write!(f, "thesaurus source unavailable: {message}"),
            Self::Malformed(message) => write!(f, "malformed thesaurus payload: {message}"),
            Self::NotFound(id) => write!(f, "thesaurus term not found: {id}"),
        }
    }
}

impl Error for SourceError {}

/// Supplier of authoritative term records.
pub trait ThesaurusSource {
    /// Fetches the full record of one external term.
    fn fetch_term(&self, external_id: ExternalTermId) -> SourceResult<Term>;

    /// Looks up a term by exact display name.
    ///
    /// Sources without name search return `Ok(None)`.
    fn find_term(&self, name: &str) -> SourceResult<Option<Term>> {
        let _ = name;
        Ok(None)
    }
}
