//! Patch stack resolution.
//!
//! A diff belongs to a revision, and revisions can depend on parent
//! revisions. To test a diff, every parent that has not landed yet has to be
//! applied below it. The walk goes from the diff's revision down through its
//! parents, collecting the latest diff of each, and stops at the first parent
//! whose base revision is already present in the local tree.

use tracing::{debug, info, instrument, warn};

use crate::hg::Repository;
use crate::types::{CommitRecord, Diff, PatchStackEntry, Phid};

use super::api::{DiffConstraint, DiffRecord};
use super::client::ConduitClient;
use super::error::ConduitError;

/// The pieces of the top diff the walk needs.
#[derive(Debug)]
struct TopDiff {
    id: u64,
    revision: Option<Phid>,
    base: Option<String>,
}

impl ConduitClient {
    /// Fills in whatever the queue payload left out with a `differential.diff.search`.
    async fn resolve_top(&self, diff: &Diff) -> Result<TopDiff, ConduitError> {
        if let (Some(id), Some(revision)) = (diff.id, diff.revision_phid.as_ref()) {
            return Ok(TopDiff {
                id,
                revision: Some(revision.clone()),
                base: diff.base_revision.clone(),
            });
        }

        debug!(phid = %diff.phid, "Loading diff details");
        let record: DiffRecord = self
            .query_diffs(DiffConstraint::Phids(std::slice::from_ref(&diff.phid)), false)
            .await?
            .into_iter()
            .find(|d| d.phid == diff.phid)
            .ok_or_else(|| ConduitError::DiffNotFound(diff.phid.clone()))?;

        Ok(TopDiff {
            id: diff.id.unwrap_or(record.id),
            base: diff
                .base_revision
                .clone()
                .or_else(|| record.base_revision().map(str::to_string)),
            revision: diff.revision_phid.clone().or(record.fields.revision_phid),
        })
    }

    /// Resolves the stack for `diff` and updates `repo` to its base.
    ///
    /// Returns the base changeset and the stack in application order
    /// (bottom-most parent first, `diff` last).
    #[instrument(skip_all, fields(phid = %diff.phid))]
    pub async fn resolve_patches_stack<R: Repository>(
        &self,
        repo: &R,
        diff: &Diff,
        default_revision: &str,
    ) -> Result<(CommitRecord, Vec<PatchStackEntry>), ConduitError> {
        let top = self.resolve_top(diff).await?;

        // Top first; reversed before returning
        let mut diffs: Vec<(Phid, u64)> = vec![(diff.phid.clone(), top.id)];
        let mut base = top.base;

        let parents = match &top.revision {
            Some(revision) => self.load_parents(revision).await?,
            None => Vec::new(),
        };
        for parent in &parents {
            info!(revision = %parent, "Loading parent diff");
            let last = self.latest_revision_diff(parent).await?;
            diffs.push((last.phid.clone(), last.id));

            base = last.base_revision().map(str::to_string);
            if has_revision(repo, base.as_deref()).await? {
                info!(revision = %parent, "Found a parent with landed revision, stopping stack here");
                break;
            }
        }

        let known = has_revision(repo, base.as_deref()).await?;
        let base = match base {
            Some(rev) if known => rev,
            missing => {
                warn!(
                    base = missing.as_deref().unwrap_or("none"),
                    default = default_revision,
                    "Missing base revision from Phabricator"
                );
                default_revision.to_string()
            }
        };

        let mut stack = Vec::with_capacity(diffs.len());
        for (phid, id) in diffs.into_iter().rev() {
            let patch = self.load_raw_diff(id).await?;
            stack.push(PatchStackEntry::new(phid, patch));
        }

        info!(base = %base, patches = stack.len(), "Updating repository to base");
        let record = repo
            .update_clean(&base)
            .await
            .map_err(ConduitError::update_failed(&base))?;
        Ok((record, stack))
    }
}

async fn has_revision<R: Repository>(repo: &R, rev: Option<&str>) -> Result<bool, ConduitError> {
    match rev {
        Some(rev) if !rev.is_empty() => Ok(repo.identify(rev).await?.is_some()),
        _ => Ok(false),
    }
}
