//! Term synchronization use-case service.
//!
//! # Responsibility
//! - Resolve external ids to local ids, creating placeholders on demand.
//! - Upsert the attributes of a synced term.
//! - Replace its relationship edges and parent pointers.
//! - Repoint content when a term stops being preferred.
//!
//! # Invariants
//! - Resolving the same external id twice never creates a second term.
//! - A failed reference resolution skips only that edge.
//! - Ambiguous terms never move content associations.

use crate::config::{SyncConfig, DEFAULT_SLUG_RETRY_ATTEMPTS};
use crate::model::term::{
    ClassificationId, ExternalTermId, LocalTermId, RelationshipEdge, Taxonomy, Term, TermData,
    TermReference, TermValidationError,
};
use crate::model::timestamp::unix_now;
use crate::repo::term_repo::{slugify, suffixed_slug, RepoError, TermStore};
use crate::retry::{retry_bounded, RetryError};
use log::{error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// An external reference could not be mapped to a local term.
#[derive(Debug)]
pub enum ResolutionError {
    /// Every slug candidate was taken.
    Exhausted {
        external_id: ExternalTermId,
        name: String,
        attempts: u32,
    },
    Repo(RepoError),
}

impl Display for ResolutionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exhausted {
                external_id,
                name,
                attempts,
            } => write!(
                f,
                "no free slug for term {external_id} `{name}` after {attempts} attempts"
            ),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ResolutionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::Exhausted { .. } => None,
        }
    }
}

impl From<RepoError> for ResolutionError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// Failed save of the primary term.
#[derive(Debug)]
pub enum SyncError {
    InvalidTerm(TermValidationError),
    /// The primary term could not be mapped or created locally.
    Resolution(ResolutionError),
    Repo(RepoError),
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTerm(err) => write!(f, "invalid term: {err}"),
            Self::Resolution(err) => write!(f, "term resolution failed: {err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidTerm(err) => Some(err),
            Self::Resolution(err) => Some(err),
            Self::Repo(err) => Some(err),
        }
    }
}

impl From<TermValidationError> for SyncError {
    fn from(value: TermValidationError) -> Self {
        Self::InvalidTerm(value)
    }
}

impl From<ResolutionError> for SyncError {
    fn from(value: ResolutionError) -> Self {
        Self::Resolution(value)
    }
}

impl From<RepoError> for SyncError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// Relationship list a reference was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceRole {
    Broader,
    Narrower,
    UsedFor,
    Use,
    Related,
}

impl ReferenceRole {
    fn as_str(self) -> &'static str {
        match self {
            Self::Broader => "broader",
            Self::Narrower => "narrower",
            Self::UsedFor => "used_for",
            Self::Use => "use",
            Self::Related => "related",
        }
    }
}

/// Relationship reference dropped from a save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedReference {
    pub role: ReferenceRole,
    pub reference: TermReference,
    pub reason: String,
}

/// Why content was not repointed after a preference change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationSkip {
    MissingTaxonomy,
    NoReplacement,
    UnresolvedReplacement,
    MissingClassification,
}

/// Outcome of preferred-term propagation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Propagation {
    /// The term did not go from preferred to non-preferred, or is ambiguous.
    NotApplicable,
    Repointed {
        from: ClassificationId,
        to: ClassificationId,
        moved: usize,
    },
    Skipped(PropagationSkip),
}

/// Summary of one term save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub local_id: LocalTermId,
    /// True when the save created the local term.
    pub created: bool,
    pub edges_written: usize,
    /// True when no taxonomy was known and edges were left untouched.
    pub relationships_skipped: bool,
    pub skipped_references: Vec<SkippedReference>,
    pub propagation: Propagation,
}

/// Reconciles authoritative term records against a local term store.
pub struct TermSynchronizer<S: TermStore> {
    store: S,
    slug_retry_attempts: u32,
}

impl<S: TermStore> TermSynchronizer<S> {
    /// Creates a synchronizer with the default slug retry bound.
    pub fn new(store: S) -> Self {
        Self {
            store,
            slug_retry_attempts: DEFAULT_SLUG_RETRY_ATTEMPTS,
        }
    }

    pub fn with_config(store: S, config: &SyncConfig) -> Self {
        Self {
            store,
            slug_retry_attempts: config.slug_retry_attempts,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Maps a reference to a local id, creating a placeholder when needed.
    ///
    /// Placeholders are classified in `taxonomy` when one is given.
    pub fn resolve(
        &self,
        reference: &TermReference,
        taxonomy: Option<&Taxonomy>,
    ) -> Result<LocalTermId, ResolutionError> {
        self.resolve_reference(reference, taxonomy)
            .map(|(local_id, _)| local_id)
    }

    /// Saves one authoritative term record.
    ///
    /// # Errors
    /// - `SyncError::InvalidTerm` when the record breaks `Term::validate()`.
    /// - `SyncError::Resolution` when no local term can be mapped or created.
    /// - `SyncError::Repo` on storage failures, including an attempt to
    ///   remap a local term to another external id. Mapping conflicts are
    ///   detected before the name or classification changes.
    ///
    /// Records without a retrieval time are stamped with the current time.
    pub fn save(&self, term: &Term) -> Result<SyncReport, SyncError> {
        let started_at = Instant::now();
        term.validate()?;

        let (local_id, created) = match term.local_id {
            Some(local_id) => (local_id, false),
            None => self.resolve_reference(
                &TermReference::new(term.external_id, term.name.as_str()),
                term.taxonomy.as_ref(),
            )?,
        };

        let previous = self
            .store
            .get_term(local_id)?
            .ok_or(RepoError::NotFound(local_id))?;
        let was_preferred = previous.is_preferred();
        self.check_mapping(local_id, previous.external_id(), term.external_id)?;

        if previous.name != term.name {
            self.store.rename_term(local_id, &term.name)?;
        }
        if let Some(taxonomy) = term.taxonomy.as_ref() {
            self.store.ensure_classification(local_id, taxonomy)?;
        }
        let mut data = TermData::from_term(term);
        // Saved records are never placeholders.
        if data.last_retrieved == 0 {
            data.last_retrieved = unix_now();
        }
        self.store.write_term_data(local_id, &data)?;

        let taxonomy = match term.taxonomy.clone() {
            Some(taxonomy) => Some(taxonomy),
            None => self.store.classification_of(local_id)?,
        };

        let mut report = SyncReport {
            local_id,
            created,
            edges_written: 0,
            relationships_skipped: false,
            skipped_references: Vec::new(),
            propagation: Propagation::NotApplicable,
        };

        match taxonomy.as_ref() {
            Some(taxonomy) => self.reconcile_relationships(local_id, term, taxonomy, &mut report)?,
            None => {
                report.relationships_skipped = true;
                warn!(
                    "event=term_reconcile module=sync status=skip local_id={} external_id={} reason=unknown_taxonomy",
                    local_id, term.external_id
                );
            }
        }

        if was_preferred && !term.ambiguous && !term.is_preferred() {
            report.propagation = self.propagate_preferred(local_id, term, taxonomy.as_ref())?;
        }

        info!(
            "event=term_sync module=sync status=ok local_id={} external_id={} created={} edges={} skipped_refs={} duration_ms={}",
            local_id,
            term.external_id,
            created,
            report.edges_written,
            report.skipped_references.len(),
            started_at.elapsed().as_millis()
        );
        Ok(report)
    }

    /// Marks a local term as deleted.
    pub fn delete_term(&self, local_id: LocalTermId) -> Result<(), SyncError> {
        self.store.mark_deleted(local_id)?;
        info!("event=term_delete module=sync status=ok local_id={local_id}");
        Ok(())
    }

    /// Rejects a save that would remap `local_id` or steal another term's
    /// external id, before any attribute is written.
    fn check_mapping(
        &self,
        local_id: LocalTermId,
        existing: Option<ExternalTermId>,
        incoming: ExternalTermId,
    ) -> Result<(), RepoError> {
        if let Some(existing) = existing {
            if existing != incoming {
                return Err(RepoError::ExternalIdConflict {
                    local_id,
                    existing,
                    incoming,
                });
            }
            return Ok(());
        }
        match self.store.find_by_external_id(incoming)? {
            Some(owner) if owner != local_id => Err(RepoError::ExternalIdTaken(incoming)),
            _ => Ok(()),
        }
    }

    fn resolve_reference(
        &self,
        reference: &TermReference,
        taxonomy: Option<&Taxonomy>,
    ) -> Result<(LocalTermId, bool), ResolutionError> {
        if let Some(local_id) = self.store.find_by_external_id(reference.external_id)? {
            if let Some(taxonomy) = taxonomy {
                self.store.ensure_classification(local_id, taxonomy)?;
            }
            return Ok((local_id, false));
        }

        let unmapped = self
            .store
            .find_by_name(&reference.name)?
            .into_iter()
            .find(|record| record.data.is_none());
        if let Some(record) = unmapped {
            self.store.write_term_data(
                record.local_id,
                &TermData::placeholder(reference.external_id),
            )?;
            if let Some(taxonomy) = taxonomy {
                self.store.ensure_classification(record.local_id, taxonomy)?;
            }
            info!(
                "event=term_resolve module=sync status=ok mode=name_match local_id={} external_id={}",
                record.local_id, reference.external_id
            );
            return Ok((record.local_id, false));
        }

        let base_slug = slugify(&reference.name);
        let inserted = retry_bounded(
            self.slug_retry_attempts,
            |err: &RepoError| matches!(err, RepoError::SlugTaken(_)),
            |attempt| {
                self.store.insert_term(
                    &reference.name,
                    &suffixed_slug(&base_slug, attempt),
                    taxonomy,
                )
            },
        );
        let local_id = match inserted {
            Ok(local_id) => local_id,
            Err(RetryError::Exhausted { attempts, .. }) => {
                return Err(ResolutionError::Exhausted {
                    external_id: reference.external_id,
                    name: reference.name.clone(),
                    attempts,
                });
            }
            Err(RetryError::Fatal(err)) => return Err(err.into()),
        };

        self.store
            .write_term_data(local_id, &TermData::placeholder(reference.external_id))?;
        info!(
            "event=term_resolve module=sync status=ok mode=placeholder local_id={} external_id={}",
            local_id, reference.external_id
        );
        Ok((local_id, true))
    }

    fn reconcile_relationships(
        &self,
        local_id: LocalTermId,
        term: &Term,
        taxonomy: &Taxonomy,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let mut edges = Vec::new();
        // (child, parent) pairs applied after the edge replacement.
        let mut parents = Vec::new();
        let mut own_parent = None;

        for reference in &term.broader {
            if let Some(broader_id) =
                self.resolve_for_edge(ReferenceRole::Broader, reference, taxonomy, report)
            {
                edges.push(RelationshipEdge::narrower(broader_id, local_id));
                own_parent = Some(broader_id);
            }
        }
        for reference in &term.narrower {
            if let Some(narrower_id) =
                self.resolve_for_edge(ReferenceRole::Narrower, reference, taxonomy, report)
            {
                edges.push(RelationshipEdge::narrower(local_id, narrower_id));
                parents.push((narrower_id, local_id));
            }
        }
        for reference in &term.used_for {
            if let Some(alias_id) =
                self.resolve_for_edge(ReferenceRole::UsedFor, reference, taxonomy, report)
            {
                edges.push(RelationshipEdge::used_for(local_id, alias_id));
            }
        }
        for reference in &term.use_terms {
            if let Some(preferred_id) =
                self.resolve_for_edge(ReferenceRole::Use, reference, taxonomy, report)
            {
                edges.push(RelationshipEdge::used_for(preferred_id, local_id));
            }
        }
        for reference in &term.related {
            if let Some(related_id) =
                self.resolve_for_edge(ReferenceRole::Related, reference, taxonomy, report)
            {
                edges.push(RelationshipEdge::related(local_id, related_id));
            }
        }

        report.edges_written = self.store.replace_relationships(local_id, &edges)?;

        self.store
            .set_parent(local_id, taxonomy, own_parent.unwrap_or(0))?;
        for (child_id, parent_id) in parents {
            if child_id != parent_id {
                self.store.set_parent(child_id, taxonomy, parent_id)?;
            }
        }
        Ok(())
    }

    fn resolve_for_edge(
        &self,
        role: ReferenceRole,
        reference: &TermReference,
        taxonomy: &Taxonomy,
        report: &mut SyncReport,
    ) -> Option<LocalTermId> {
        match self.resolve_reference(reference, Some(taxonomy)) {
            Ok((local_id, _)) => Some(local_id),
            Err(err) => {
                match &err {
                    ResolutionError::Exhausted { .. } => warn!(
                        "event=term_resolve module=sync status=skip role={} external_id={} error={}",
                        role.as_str(),
                        reference.external_id,
                        err
                    ),
                    ResolutionError::Repo(_) => error!(
                        "event=term_resolve module=sync status=error role={} external_id={} error={}",
                        role.as_str(),
                        reference.external_id,
                        err
                    ),
                }
                report.skipped_references.push(SkippedReference {
                    role,
                    reference: reference.clone(),
                    reason: err.to_string(),
                });
                None
            }
        }
    }

    fn propagate_preferred(
        &self,
        local_id: LocalTermId,
        term: &Term,
        taxonomy: Option<&Taxonomy>,
    ) -> Result<Propagation, SyncError> {
        let Some(taxonomy) = taxonomy else {
            return Ok(self.skip_propagation(local_id, PropagationSkip::MissingTaxonomy));
        };
        let Some(replacement) = term.preferred_replacement() else {
            return Ok(self.skip_propagation(local_id, PropagationSkip::NoReplacement));
        };
        let preferred_id = match self.resolve_reference(replacement, Some(taxonomy)) {
            Ok((preferred_id, _)) => preferred_id,
            Err(_) => {
                return Ok(
                    self.skip_propagation(local_id, PropagationSkip::UnresolvedReplacement)
                );
            }
        };

        let from = self.store.classification_id(local_id, taxonomy)?;
        let to = self.store.classification_id(preferred_id, taxonomy)?;
        let (Some(from), Some(to)) = (from, to) else {
            return Ok(self.skip_propagation(local_id, PropagationSkip::MissingClassification));
        };

        let moved = self.store.repoint_content(from, to)?;
        info!(
            "event=term_propagate module=sync status=ok local_id={} preferred_id={} moved={}",
            local_id, preferred_id, moved
        );
        Ok(Propagation::Repointed { from, to, moved })
    }

    fn skip_propagation(&self, local_id: LocalTermId, reason: PropagationSkip) -> Propagation {
        info!(
            "event=term_propagate module=sync status=skip local_id={} reason={:?}",
            local_id, reason
        );
        Propagation::Skipped(reason)
    }
}
