//! Directory-backed thesaurus source serving `<external_id>.json` files.

use crate::model::term::{ExternalTermId, Term};
use crate::model::timestamp::unix_now;
use crate::source::payload::parse_term_payload;
use crate::source::{SourceError, SourceResult, ThesaurusSource};
use log::warn;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Reads term records exported as one JSON file per external id.
#[derive(Debug, Clone)]
pub struct JsonDirSource {
    dir: PathBuf,
}

impl JsonDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read_term(&self, path: &Path) -> SourceResult<Term> {
        let json = std::fs::read_to_string(path).map_err(|err| {
            SourceError::Unavailable(format!("failed to read `{}`: {err}", path.display()))
        })?;
        parse_term_payload(&json, unix_now())
    }
}

impl ThesaurusSource for JsonDirSource {
    fn fetch_term(&self, external_id: ExternalTermId) -> SourceResult<Term> {
        let path = self.dir.join(format!("{external_id}.json"));
        match std::fs::metadata(&path) {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(SourceError::NotFound(external_id));
            }
            Err(err) => {
                return Err(SourceError::Unavailable(format!(
                    "failed to stat `{}`: {err}",
                    path.display()
                )));
            }
        }

        let term = self.read_term(&path)?;
        if term.external_id != external_id {
            return Err(SourceError::Malformed(format!(
                "`{}` holds term {} instead of {external_id}",
                path.display(),
                term.external_id
            )));
        }
        Ok(term)
    }

    fn find_term(&self, name: &str) -> SourceResult<Option<Term>> {
        let entries = std::fs::read_dir(&self.dir).map_err(|err| {
            SourceError::Unavailable(format!("failed to list `{}`: {err}", self.dir.display()))
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| SourceError::Unavailable(err.to_string()))?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            match self.read_term(&path) {
                Ok(term) if term.name == name.trim() => return Ok(Some(term)),
                Ok(_) => {}
                Err(err) => warn!(
                    "event=source_scan module=source status=skip path={} error={}",
                    path.display(),
                    err
                ),
            }
        }
        Ok(None)
    }
}
