//! Core domain types for the try-push bridge.
//!
//! This module contains the identifiers and payloads shared by the worker,
//! the Mercurial layer and the Phabricator client.

pub mod diff;
pub mod ids;
pub mod trigger;
pub mod unit;

// Re-export commonly used types at the module level
pub use diff::{CommitRecord, DIFF_TRAILER, Diff, InvalidDiff, PatchStackEntry, commit_message};
pub use ids::{InvalidNode, Node, Phid};
pub use trigger::{TRIGGER_CONFIG_FILE, TriggerConfig};
pub use unit::{BuildState, UnitResult, UnitResultState};
