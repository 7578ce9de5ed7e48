//! Harbormaster build states and unit results.

use serde::{Deserialize, Serialize};

/// Namespace under which every unit result of this bot is grouped.
pub const UNIT_NAMESPACE: &str = "code-review";

/// State sent to `harbormaster.sendmessage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildState {
    Work,
    Pass,
    Fail,
}

/// Outcome of a single unit result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitResultState {
    Pass,
    Fail,
    Skip,
    Broken,
    Unsound,
}

/// A unit result attached to a build target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitResult {
    pub namespace: String,
    pub name: String,
    pub result: UnitResultState,
    pub details: String,
    pub format: String,
    /// Wall-clock seconds.
    pub duration: f64,
}

impl UnitResult {
    /// Builds a `code-review` unit result with remarkup details.
    pub fn code_review(
        name: impl Into<String>,
        result: UnitResultState,
        details: impl Into<String>,
        duration: f64,
    ) -> Self {
        UnitResult {
            namespace: UNIT_NAMESPACE.to_string(),
            name: name.into(),
            result,
            details: details.into(),
            format: "remarkup".to_string(),
            duration,
        }
    }
}
