//! The `try_task_config.json` file that tells the CI decision task what to run.

use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;

/// File name of the trigger config, relative to the tree root.
pub const TRIGGER_CONFIG_FILE: &str = "try_task_config.json";

/// Schema version understood by the decision task.
pub const TRIGGER_CONFIG_VERSION: u32 = 2;

/// Target task method selecting the code-review task set.
pub const TARGET_TASKS_METHOD: &str = "codereview";

/// Contents of `try_task_config.json`.
///
/// Fields are declared in alphabetical order so that serialization yields
/// sorted keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub parameters: TriggerParameters,
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerParameters {
    pub optimize_target_tasks: bool,
    /// Build target PHID, or the diff PHID when no build target exists.
    pub phabricator_diff: String,
    pub target_tasks_method: String,
}

impl TriggerConfig {
    /// Builds the config for a code-review push identified by `phabricator_diff`.
    pub fn code_review(phabricator_diff: impl Into<String>) -> Self {
        TriggerConfig {
            parameters: TriggerParameters {
                optimize_target_tasks: true,
                phabricator_diff: phabricator_diff.into(),
                target_tasks_method: TARGET_TASKS_METHOD.to_string(),
            },
            version: TRIGGER_CONFIG_VERSION,
        }
    }

    /// Serializes with sorted keys and a 4-space indent.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        let mut out = Vec::new();
        let formatter = PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.serialize(&mut ser)?;
        Ok(out)
    }
}
