//! Repository layer: the local term store port and its SQLite
//! implementation.
//!
//! # Responsibility
//! - Define the storage contract the synchronizer is written against.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Repository APIs return semantic errors (`NotFound`, `SlugTaken`,
//!   `ExternalIdConflict`) in addition to DB transport errors.

pub mod term_repo;
