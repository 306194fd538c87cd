//! Term domain model shared by the store, the thesaurus source and the
//! synchronizer.
//!
//! # Responsibility
//! - Define typed term records instead of loosely shaped maps.
//! - Keep local ids and external ids in separate, explicit fields.
//!
//! # Invariants
//! - An external id, once mapped to a local id, never changes.
//! - Deletion is a logical flag, never a physical removal.

pub mod term;
pub mod timestamp;
