//! Diffs, patch stacks and the commits built from them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::ids::{Node, Phid};

/// Trailer appended to every commit created from a Phabricator diff.
pub const DIFF_TRAILER: &str = "Differential Diff:";

/// Error returned when a diff payload is unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidDiff {
    /// The payload could not be decoded at all.
    #[error("malformed diff payload: {0}")]
    Malformed(String),

    /// The payload has no usable `phid`.
    #[error("diff payload is missing a phid")]
    MissingPhid,
}

/// A Phabricator diff as received from the notification feed.
///
/// Only `phid` is required. The remaining known fields are used by the stack
/// resolver when present; anything else is kept verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    pub phid: Phid,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    #[serde(
        rename = "revisionPHID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub revision_phid: Option<Phid>,

    #[serde(
        rename = "baseRevision",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub base_revision: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Diff {
    /// Creates a diff carrying only its phid.
    pub fn new(phid: impl Into<Phid>) -> Self {
        Diff {
            phid: phid.into(),
            id: None,
            revision_phid: None,
            base_revision: None,
            extra: Map::new(),
        }
    }

    /// Decodes and validates a raw diff payload.
    pub fn from_value(value: Value) -> Result<Self, InvalidDiff> {
        match value.get("phid") {
            Some(Value::String(s)) if !s.trim().is_empty() => {}
            _ => return Err(InvalidDiff::MissingPhid),
        }
        serde_json::from_value(value).map_err(|e| InvalidDiff::Malformed(e.to_string()))
    }
}

/// One element of a patch stack: the diff it came from and its raw patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchStackEntry {
    pub diff_phid: Phid,
    pub patch: String,
}

impl PatchStackEntry {
    pub fn new(diff_phid: impl Into<Phid>, patch: impl Into<String>) -> Self {
        PatchStackEntry {
            diff_phid: diff_phid.into(),
            patch: patch.into(),
        }
    }
}

/// A changeset in the local tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub node: Node,
    pub author: String,
    pub message: String,
}

/// Builds the message for a commit imported from `diff_phid`.
///
/// The original commit message, when known, comes first; the
/// `Differential Diff:` trailer is always the last line.
pub fn commit_message(original: Option<&str>, diff_phid: &Phid) -> String {
    match original {
        Some(message) => format!("{}\n{} {}", message, DIFF_TRAILER, diff_phid),
        None => format!("{} {}", DIFF_TRAILER, diff_phid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn from_value_keeps_known_and_extra_fields() {
        let diff = Diff::from_value(json!({
            "phid": "PHID-DIFF-1",
            "id": 42,
            "revisionPHID": "PHID-DREV-1",
            "baseRevision": "abcdef",
            "attachments": {"commits": {}},
        }))
        .unwrap();

        assert_eq!(diff.phid, Phid::from("PHID-DIFF-1"));
        assert_eq!(diff.id, Some(42));
        assert_eq!(diff.revision_phid, Some(Phid::from("PHID-DREV-1")));
        assert_eq!(diff.base_revision.as_deref(), Some("abcdef"));
        assert!(diff.extra.contains_key("attachments"));
    }

    #[test]
    fn from_value_requires_phid() {
        assert_eq!(
            Diff::from_value(json!({"id": 1})),
            Err(InvalidDiff::MissingPhid)
        );
        assert_eq!(
            Diff::from_value(json!({"phid": "  "})),
            Err(InvalidDiff::MissingPhid)
        );
        assert_eq!(
            Diff::from_value(json!({"phid": 12})),
            Err(InvalidDiff::MissingPhid)
        );
    }

    #[test]
    fn from_value_rejects_bad_field_types() {
        let err = Diff::from_value(json!({"phid": "PHID-DIFF-1", "id": "nope"})).unwrap_err();
        assert!(matches!(err, InvalidDiff::Malformed(_)));
    }

    #[test]
    fn commit_message_without_original() {
        assert_eq!(
            commit_message(None, &Phid::from("PHID-DIFF-1")),
            "Differential Diff: PHID-DIFF-1"
        );
    }

    #[test]
    fn commit_message_with_original() {
        assert_eq!(
            commit_message(Some("Bug 1 - Fix it r=me"), &Phid::from("PHID-DIFF-1")),
            "Bug 1 - Fix it r=me\nDifferential Diff: PHID-DIFF-1"
        );
    }

    proptest! {
        #[test]
        fn commit_message_always_ends_with_trailer(
            original in proptest::option::of("[a-zA-Z0-9 ]{0,40}"),
            phid in "PHID-DIFF-[a-z0-9]{8}",
        ) {
            let phid = Phid::new(phid);
            let message = commit_message(original.as_deref(), &phid);
            let last = message.lines().last().unwrap_or_default().to_string();
            prop_assert_eq!(last, format!("Differential Diff: {}", phid));
        }
    }
}
