//! Phabricator collaboration: patch stack retrieval and result reporting.
//!
//! The worker talks to Phabricator through two traits so tests can swap in
//! a recording implementation:
//! - [`PatchStackResolver`] loads the stack of patches to apply and the
//!   commit messages of their diffs
//! - [`ResultReporter`] publishes failures and dashboard links on a
//!   Harbormaster build target
//!
//! [`ConduitClient`] implements both over the Conduit HTTP API.

mod api;
mod client;
mod error;
mod stack;

use std::future::Future;

use crate::hg::Repository;
use crate::types::{BuildState, CommitRecord, Diff, PatchStackEntry, Phid, UnitResult};

pub use api::{
    AttachedCommit, CommitsAttachment, DiffAttachments, DiffConstraint, DiffFields, DiffRecord,
    DiffRef, Edge, REVISION_PARENT_EDGE,
};
pub use client::ConduitClient;
pub use error::ConduitError;

/// Artifact key of the dashboard link attached after a push.
pub const TREEHERDER_ARTIFACT_KEY: &str = "treeherder";

/// Label of the dashboard link attached after a push.
pub const TREEHERDER_ARTIFACT_NAME: &str = "Treeherder Jobs";

/// Dashboard URL for a revision pushed to try.
pub fn treeherder_url(revision: impl std::fmt::Display) -> String {
    format!(
        "https://treeherder.mozilla.org/#/jobs?repo=try&revision={}",
        revision
    )
}

/// Loads patch stacks and diff details from the review service.
pub trait PatchStackResolver: Send + Sync {
    /// Resolve the stack ending at `diff` and update `repo` to its base.
    ///
    /// The returned stack is in application order.
    fn load_patches_stack<R: Repository>(
        &self,
        repo: &R,
        diff: &Diff,
        default_revision: &str,
    ) -> impl Future<Output = Result<(CommitRecord, Vec<PatchStackEntry>), ConduitError>> + Send;

    /// Load the given diffs, optionally with their commits attached.
    fn search_diffs(
        &self,
        diff_phids: &[Phid],
        commits: bool,
    ) -> impl Future<Output = Result<Vec<DiffRecord>, ConduitError>> + Send;
}

/// Publishes outcomes on Harbormaster build targets.
pub trait ResultReporter: Send + Sync {
    fn update_build_target(
        &self,
        build_target: &Phid,
        state: BuildState,
        unit: &[UnitResult],
    ) -> impl Future<Output = Result<(), ConduitError>> + Send;

    fn create_harbormaster_uri(
        &self,
        build_target: &Phid,
        artifact_key: &str,
        name: &str,
        uri: &str,
    ) -> impl Future<Output = Result<(), ConduitError>> + Send;
}

impl PatchStackResolver for ConduitClient {
    async fn load_patches_stack<R: Repository>(
        &self,
        repo: &R,
        diff: &Diff,
        default_revision: &str,
    ) -> Result<(CommitRecord, Vec<PatchStackEntry>), ConduitError> {
        self.resolve_patches_stack(repo, diff, default_revision)
            .await
    }

    async fn search_diffs(
        &self,
        diff_phids: &[Phid],
        commits: bool,
    ) -> Result<Vec<DiffRecord>, ConduitError> {
        self.query_diffs(DiffConstraint::Phids(diff_phids), commits)
            .await
    }
}

impl ResultReporter for ConduitClient {
    async fn update_build_target(
        &self,
        build_target: &Phid,
        state: BuildState,
        unit: &[UnitResult],
    ) -> Result<(), ConduitError> {
        self.send_build_message(build_target, state, unit).await
    }

    async fn create_harbormaster_uri(
        &self,
        build_target: &Phid,
        artifact_key: &str,
        name: &str,
        uri: &str,
    ) -> Result<(), ConduitError> {
        self.create_uri_artifact(build_target, artifact_key, name, uri)
            .await
    }
}
