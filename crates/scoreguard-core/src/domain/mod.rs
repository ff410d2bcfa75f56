//! Domain types for Scoreguard.
//!
//! The persisted entities (validation records, evaluators) live in
//! `scoreguard-state`; this module holds the error taxonomy and input
//! validation shared by the engine components.

pub mod error;

pub use error::{Result, ScoringError};
