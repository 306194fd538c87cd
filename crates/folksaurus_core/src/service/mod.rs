//! Use-case services.
//!
//! # Responsibility
//! - Orchestrate term store and thesaurus source calls into sync and
//!   refresh operations.
//! - Keep hosts decoupled from storage details.

pub mod term_refresh;
pub mod term_sync;
