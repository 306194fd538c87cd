//! Core of the Folksaurus term synchronizer.
//!
//! Reconciles authoritative thesaurus term records against a local term
//! store: id resolution, attribute upsert, relationship replacement and
//! preferred-term propagation.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod retry;
pub mod service;
pub mod source;

pub use config::{ConfigError, LoggingConfig, SyncConfig};
pub use logging::{default_log_level, init_logging, init_logging_from_config, logging_status};
pub use model::term::{
    ClassificationId, DisplayStatus, ExternalTermId, LocalTermId, RelationKind, RelationshipEdge,
    Taxonomy, Term, TermData, TermRecord, TermReference, TermValidationError,
};
pub use repo::term_repo::{RepoError, RepoResult, SqliteTermStore, TermStore};
pub use retry::{retry_bounded, RetryError};
pub use service::term_refresh::{RefreshReport, TermRefresher};
pub use service::term_sync::{
    Propagation, PropagationSkip, ReferenceRole, ResolutionError, SkippedReference, SyncError,
    SyncReport, TermSynchronizer,
};
pub use source::{JsonDirSource, SourceError, SourceResult, ThesaurusSource};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
