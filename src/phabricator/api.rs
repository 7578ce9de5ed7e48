//! Typed wrappers around the Conduit methods the worker uses.

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::types::{BuildState, Phid, UnitResult};

use super::client::ConduitClient;
use super::error::ConduitError;

/// Edge type linking a revision to the revision it depends on.
pub const REVISION_PARENT_EDGE: &str = "revision.parent";

/// Result page of a `*.search` method.
#[derive(Debug, Deserialize)]
pub struct SearchPage<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub cursor: Cursor,
}

/// Pagination cursor of a `*.search` method.
#[derive(Debug, Default, Deserialize)]
pub struct Cursor {
    #[serde(default)]
    pub after: Option<String>,
}

/// A diff as returned by `differential.diff.search`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DiffRecord {
    pub id: u64,
    pub phid: Phid,
    #[serde(default)]
    pub fields: DiffFields,
    #[serde(default)]
    pub attachments: DiffAttachments,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DiffFields {
    #[serde(rename = "revisionPHID", default)]
    pub revision_phid: Option<Phid>,
    #[serde(default)]
    pub refs: Vec<DiffRef>,
}

/// A VCS reference attached to a diff, such as its `base` revision.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DiffRef {
    #[serde(rename = "type")]
    pub kind: String,
    pub identifier: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DiffAttachments {
    #[serde(default)]
    pub commits: Option<CommitsAttachment>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CommitsAttachment {
    #[serde(default)]
    pub commits: Vec<AttachedCommit>,
}

/// A local commit uploaded alongside a diff.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AttachedCommit {
    #[serde(default)]
    pub identifier: Option<String>,
    pub message: String,
}

impl DiffRecord {
    /// The revision this diff was made against.
    pub fn base_revision(&self) -> Option<&str> {
        self.fields
            .refs
            .iter()
            .find(|r| r.kind == "base")
            .map(|r| r.identifier.as_str())
            .filter(|s| !s.is_empty())
    }

    /// Message of the first attached commit, if any.
    pub fn commit_message(&self) -> Option<&str> {
        self.attachments
            .commits
            .as_ref()
            .and_then(|c| c.commits.first())
            .map(|c| c.message.as_str())
    }
}

/// An edge between two objects, as returned by `edge.search`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Edge {
    #[serde(rename = "sourcePHID")]
    pub source_phid: Phid,
    #[serde(rename = "edgeType")]
    pub edge_type: String,
    #[serde(rename = "destinationPHID")]
    pub destination_phid: Phid,
}

/// Which diffs a `differential.diff.search` call selects.
#[derive(Debug, Clone, Copy)]
pub enum DiffConstraint<'a> {
    Phids(&'a [Phid]),
    Revisions(&'a [Phid]),
}

impl ConduitClient {
    /// Pages through `differential.diff.search`.
    pub async fn query_diffs(
        &self,
        constraint: DiffConstraint<'_>,
        commits: bool,
    ) -> Result<Vec<DiffRecord>, ConduitError> {
        let constraints = match constraint {
            DiffConstraint::Phids(phids) => json!({ "phids": phids }),
            DiffConstraint::Revisions(phids) => json!({ "revisionPHIDs": phids }),
        };
        let mut out = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let mut params = json!({
                "constraints": constraints,
                "attachments": { "commits": commits },
            });
            if let Some(after) = &after {
                params["after"] = Value::String(after.clone());
            }
            let page: SearchPage<DiffRecord> =
                self.call("differential.diff.search", params).await?;
            out.extend(page.data);
            match page.cursor.after {
                Some(next) => after = Some(next),
                None => break,
            }
        }
        debug!(count = out.len(), "Loaded diffs");
        Ok(out)
    }

    /// Loads the most recent diff of `revision`.
    pub async fn latest_revision_diff(&self, revision: &Phid) -> Result<DiffRecord, ConduitError> {
        self.query_diffs(DiffConstraint::Revisions(std::slice::from_ref(revision)), false)
            .await?
            .into_iter()
            .max_by_key(|d| d.id)
            .ok_or_else(|| ConduitError::RevisionWithoutDiff(revision.clone()))
    }

    /// Loads the raw patch of a diff by numeric id.
    pub async fn load_raw_diff(&self, diff_id: u64) -> Result<String, ConduitError> {
        self.call("differential.getrawdiff", json!({ "diffID": diff_id }))
            .await
    }

    /// Follows `revision.parent` edges from `revision` to the bottom of its stack.
    ///
    /// Returns the parents nearest first.
    pub async fn load_parents(&self, revision: &Phid) -> Result<Vec<Phid>, ConduitError> {
        let mut parents: Vec<Phid> = Vec::new();
        let mut current = revision.clone();
        loop {
            let page: SearchPage<Edge> = self
                .call(
                    "edge.search",
                    json!({
                        "sourcePHIDs": [current],
                        "types": [REVISION_PARENT_EDGE],
                    }),
                )
                .await?;
            let parent = match page.data.as_slice() {
                [] => break,
                [edge] => edge.destination_phid.clone(),
                _ => return Err(ConduitError::MultipleParents(current)),
            };
            if parent == *revision || parents.contains(&parent) {
                return Err(ConduitError::malformed(
                    "edge.search",
                    format!("revision {} is its own ancestor", parent),
                ));
            }
            parents.push(parent.clone());
            current = parent;
        }
        Ok(parents)
    }

    /// Sends a build state and unit results to a Harbormaster build target.
    pub async fn send_build_message(
        &self,
        build_target: &Phid,
        state: BuildState,
        unit: &[UnitResult],
    ) -> Result<(), ConduitError> {
        info!(build_target = %build_target, ?state, units = unit.len(), "Updating build target");
        let _: Value = self
            .call(
                "harbormaster.sendmessage",
                json!({
                    "buildTargetPHID": build_target,
                    "type": state,
                    "unit": unit,
                }),
            )
            .await?;
        Ok(())
    }

    /// Attaches an external URI artifact to a Harbormaster build target.
    pub async fn create_uri_artifact(
        &self,
        build_target: &Phid,
        artifact_key: &str,
        name: &str,
        uri: &str,
    ) -> Result<(), ConduitError> {
        info!(build_target = %build_target, key = artifact_key, uri, "Creating URI artifact");
        let _: Value = self
            .call(
                "harbormaster.createartifact",
                json!({
                    "buildTargetPHID": build_target,
                    "artifactKey": artifact_key,
                    "artifactType": "uri",
                    "artifactData": {
                        "uri": uri,
                        "name": name,
                        "ui.external": true,
                    },
                }),
            )
            .await?;
        Ok(())
    }
}
