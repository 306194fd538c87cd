//! Display-time refresh of stored terms from the thesaurus source.
//!
//! # Responsibility
//! - Re-fetch stale terms before they are shown and save them.
//! - Link local-only terms to the thesaurus by exact name.
//!
//! # Invariants
//! - Each local term is fetched at most once per batch; each distinct name
//!   of a local-only term is looked up at most once per batch.
//! - Terms already marked deleted are not fetched again.
//! - Source failures never surface as errors; local data stays unchanged.

use crate::config::{SyncConfig, DEFAULT_REFRESH_INTERVAL_SECS};
use crate::model::term::{LocalTermId, Term};
use crate::model::timestamp::unix_now;
use crate::repo::term_repo::TermStore;
use crate::service::term_sync::TermSynchronizer;
use crate::source::{SourceError, ThesaurusSource};
use log::{error, info, warn};
use std::collections::BTreeSet;

/// Outcome of one refresh batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Terms fetched and saved.
    pub refreshed: Vec<LocalTermId>,
    /// Terms shown as stored: retrieved recently, or already deleted.
    pub fresh: Vec<LocalTermId>,
    /// Terms the source no longer knows; marked deleted.
    pub deleted: Vec<LocalTermId>,
    /// Local-only terms the source has no match for.
    pub unmatched: Vec<LocalTermId>,
    /// Terms left unchanged because the source or the save failed.
    pub failed: Vec<LocalTermId>,
}

/// Refreshes stored terms through a synchronizer and a thesaurus source.
pub struct TermRefresher<'a, S: TermStore, T: ThesaurusSource> {
    synchronizer: &'a TermSynchronizer<S>,
    source: &'a T,
    refresh_interval_secs: i64,
}

impl<'a, S: TermStore, T: ThesaurusSource> TermRefresher<'a, S, T> {
    pub fn new(synchronizer: &'a TermSynchronizer<S>, source: &'a T) -> Self {
        Self {
            synchronizer,
            source,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
        }
    }

    pub fn with_config(
        synchronizer: &'a TermSynchronizer<S>,
        source: &'a T,
        config: &SyncConfig,
    ) -> Self {
        Self {
            synchronizer,
            source,
            refresh_interval_secs: config.refresh_interval_secs,
        }
    }

    /// Refreshes `local_ids` relative to the current time.
    pub fn refresh(&self, local_ids: &[LocalTermId]) -> RefreshReport {
        self.refresh_at(local_ids, unix_now())
    }

    /// Refreshes `local_ids`, treating `now` (Unix seconds) as current time.
    pub fn refresh_at(&self, local_ids: &[LocalTermId], now: i64) -> RefreshReport {
        let mut report = RefreshReport::default();
        let mut seen_local = BTreeSet::new();
        let mut seen_names = BTreeSet::new();

        for &local_id in local_ids {
            if !seen_local.insert(local_id) {
                continue;
            }

            let record = match self.synchronizer.store().get_term(local_id) {
                Ok(Some(record)) => record,
                Ok(None) => {
                    warn!(
                        "event=term_refresh module=refresh status=skip local_id={local_id} reason=unknown_term"
                    );
                    report.failed.push(local_id);
                    continue;
                }
                Err(err) => {
                    error!(
                        "event=term_refresh module=refresh status=error local_id={local_id} error={err}"
                    );
                    report.failed.push(local_id);
                    continue;
                }
            };

            let Some(data) = record.data else {
                if seen_names.insert(record.name.clone()) {
                    self.link_by_name(local_id, &record.name, &mut report);
                } else {
                    // The first term with this name already claimed any match.
                    report.unmatched.push(local_id);
                }
                continue;
            };

            if data.deleted
                || now.saturating_sub(data.last_retrieved) < self.refresh_interval_secs
            {
                report.fresh.push(local_id);
                continue;
            }

            match self.source.fetch_term(data.external_id) {
                Ok(term) => self.save_fetched(local_id, term, &mut report),
                Err(SourceError::NotFound(external_id)) => {
                    match self.synchronizer.delete_term(local_id) {
                        Ok(()) => {
                            info!(
                                "event=term_refresh module=refresh status=ok local_id={local_id} external_id={external_id} action=deleted"
                            );
                            report.deleted.push(local_id);
                        }
                        Err(err) => {
                            error!(
                                "event=term_refresh module=refresh status=error local_id={local_id} error={err}"
                            );
                            report.failed.push(local_id);
                        }
                    }
                }
                Err(err) => {
                    warn!(
                        "event=term_refresh module=refresh status=skip local_id={} external_id={} error={}",
                        local_id, data.external_id, err
                    );
                    report.failed.push(local_id);
                }
            }
        }

        info!(
            "event=term_refresh_batch module=refresh status=ok requested={} refreshed={} fresh={} deleted={} unmatched={} failed={}",
            local_ids.len(),
            report.refreshed.len(),
            report.fresh.len(),
            report.deleted.len(),
            report.unmatched.len(),
            report.failed.len()
        );
        report
    }

    fn link_by_name(&self, local_id: LocalTermId, name: &str, report: &mut RefreshReport) {
        match self.source.find_term(name) {
            Ok(Some(term)) => self.save_fetched(local_id, term, report),
            Ok(None) => report.unmatched.push(local_id),
            Err(err) => {
                warn!(
                    "event=term_refresh module=refresh status=skip local_id={local_id} mode=name_lookup error={err}"
                );
                report.failed.push(local_id);
            }
        }
    }

    fn save_fetched(&self, local_id: LocalTermId, mut term: Term, report: &mut RefreshReport) {
        term.local_id = Some(local_id);
        match self.synchronizer.save(&term) {
            Ok(_) => report.refreshed.push(local_id),
            Err(err) => {
                error!(
                    "event=term_refresh module=refresh status=error local_id={} external_id={} error={}",
                    local_id, term.external_id, err
                );
                report.failed.push(local_id);
            }
        }
    }
}
