//! JSON payload shape of a thesaurus term record.

use crate::model::term::{ExternalTermId, Term, TermReference};
use crate::source::{SourceError, SourceResult};
use serde::{Deserialize, Serialize};

/// Wire shape of one relationship endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencePayload {
    pub id: ExternalTermId,
    pub name: String,
}

/// Wire shape of one term record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermPayload {
    pub id: ExternalTermId,
    pub name: String,
    #[serde(default)]
    pub scope_note: String,
    #[serde(default)]
    pub ambiguous: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub broader: Vec<ReferencePayload>,
    #[serde(default)]
    pub narrower: Vec<ReferencePayload>,
    #[serde(default)]
    pub related: Vec<ReferencePayload>,
    #[serde(default)]
    pub used_for: Vec<ReferencePayload>,
    #[serde(default, rename = "use")]
    pub use_terms: Vec<ReferencePayload>,
    /// Unix seconds; absent means "retrieved now".
    #[serde(default)]
    pub last_retrieved: Option<i64>,
}

impl TermPayload {
    /// Converts the payload into a validated `Term`.
    ///
    /// `retrieved_at` stamps records that carry no retrieval time.
    pub fn into_term(self, retrieved_at: i64) -> SourceResult<Term> {
        let term = Term {
            local_id: None,
            external_id: self.id,
            name: self.name.trim().to_string(),
            scope_note: self.scope_note,
            taxonomy: None,
            ambiguous: self.ambiguous,
            deleted: self.deleted,
            last_retrieved: self.last_retrieved.unwrap_or(retrieved_at),
            broader: into_references(self.broader),
            narrower: into_references(self.narrower),
            related: into_references(self.related),
            used_for: into_references(self.used_for),
            use_terms: into_references(self.use_terms),
        };
        term.validate()
            .map_err(|err| SourceError::Malformed(err.to_string()))?;
        Ok(term)
    }
}

/// Parses one JSON term record.
pub fn parse_term_payload(json: &str, retrieved_at: i64) -> SourceResult<Term> {
    let payload: TermPayload =
        serde_json::from_str(json).map_err(|err| SourceError::Malformed(err.to_string()))?;
    payload.into_term(retrieved_at)
}

fn into_references(values: Vec<ReferencePayload>) -> Vec<TermReference> {
    values
        .into_iter()
        .map(|value| TermReference::new(value.id, value.name.trim()))
        .collect()
}
