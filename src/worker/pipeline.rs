//! The per-diff state machine: clean, resolve, apply, configure, push, report.
//!
//! # States
//!
//! ```text
//! Received → Cleaning → StackResolved → PatchesApplied → ConfigCommitted → Pushed → Reported
//!     └──────────┴────────────┴───────────────┴────────────────┴────────────┴──→ Failed
//! ```
//!
//! A run never raises. Any error is classified as a [`PipelineError`], the
//! working tree is reverted, and when publication is enabled the failure is
//! sent to the build target as a unit result.

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use tracing::{debug, error, info, instrument, warn};

use crate::config::{DEFAULT_BOT_USER, DEFAULT_REVISION, DEFAULT_TRY_URL};
use crate::hg::{Repository, clean};
use crate::phabricator::{
    PatchStackResolver, ResultReporter, TREEHERDER_ARTIFACT_KEY, TREEHERDER_ARTIFACT_NAME,
    treeherder_url,
};
use crate::types::{
    BuildState, DIFF_TRAILER, Diff, Node, Phid, TRIGGER_CONFIG_FILE, TriggerConfig,
    commit_message,
};

use super::error::PipelineError;

/// Stage reached by a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Received,
    Cleaning,
    StackResolved,
    PatchesApplied,
    ConfigCommitted,
    Pushed,
    Reported,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Received => "received",
            PipelineState::Cleaning => "cleaning",
            PipelineState::StackResolved => "stack_resolved",
            PipelineState::PatchesApplied => "patches_applied",
            PipelineState::ConfigCommitted => "config_committed",
            PipelineState::Pushed => "pushed",
            PipelineState::Reported => "reported",
            PipelineState::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings for [`PatchPipeline`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Repository pushes go to.
    pub try_url: String,
    /// Revision used when a stack's base is not in the local tree.
    pub default_revision: String,
    /// Author of every commit the pipeline creates.
    pub bot_user: String,
    /// Whether failures and dashboard links are sent to Phabricator.
    pub publish: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            try_url: DEFAULT_TRY_URL.to_string(),
            default_revision: DEFAULT_REVISION.to_string(),
            bot_user: DEFAULT_BOT_USER.to_string(),
            publish: false,
        }
    }
}

/// Message of the commit that adds the trigger config.
pub fn config_commit_message(diff_phid: &Phid) -> String {
    format!(
        "try_task_config for code-review\n{} {}",
        DIFF_TRAILER, diff_phid
    )
}

/// Applies diffs to a working tree and pushes them to try.
pub struct PatchPipeline<R, S> {
    repo: R,
    service: S,
    config: PipelineConfig,
    ssh_command: String,
    history: Vec<PipelineState>,
}

impl<R, S> PatchPipeline<R, S>
where
    R: Repository,
    S: PatchStackResolver + ResultReporter,
{
    pub fn new(repo: R, service: S, config: PipelineConfig, ssh_command: impl Into<String>) -> Self {
        info!(
            publish = config.publish,
            "Phabricator publication is {}",
            if config.publish { "enabled" } else { "disabled" }
        );
        PatchPipeline {
            repo,
            service,
            config,
            ssh_command: ssh_command.into(),
            history: Vec::new(),
        }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// States visited by the most recent run, in order.
    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    /// State the most recent run ended in.
    pub fn state(&self) -> Option<PipelineState> {
        self.history.last().copied()
    }

    fn transition(&mut self, next: PipelineState) {
        debug!(from = ?self.state(), to = %next, "Pipeline transition");
        self.history.push(next);
    }

    /// Process one diff. Returns true if it was pushed to try.
    #[instrument(skip_all, fields(phid = %diff.phid, build_target = ?build_target.map(Phid::as_str)))]
    pub async fn handle_build(&mut self, build_target: Option<&Phid>, diff: &Diff) -> bool {
        let start = Instant::now();
        self.history.clear();
        self.transition(PipelineState::Received);

        let failure = match self.push_to_try(build_target, diff).await {
            Ok(node) => {
                info!(rev = %node, "Diff processed");
                return true;
            }
            Err(failure) => failure,
        };

        match &failure {
            PipelineError::VersionControl { stderr } => {
                warn!(error = %stderr, "Mercurial error on diff");
            }
            PipelineError::Generic { message } => {
                warn!(error = %message, "Failed to process diff");
            }
        }
        let unit = failure.to_unit_result(start.elapsed().as_secs_f64());
        self.transition(PipelineState::Failed);

        // Remove uncommitted changes
        if let Err(e) = self.repo.revert_all().await {
            error!(error = %e, "Failed to revert working tree");
        }

        if self.config.publish {
            let target = build_target.unwrap_or(&diff.phid);
            if let Err(e) = self
                .service
                .update_build_target(target, BuildState::Fail, &[unit])
                .await
            {
                warn!(error = %e, "Failed to publish failure");
            }
        }
        false
    }

    async fn push_to_try(
        &mut self,
        build_target: Option<&Phid>,
        diff: &Diff,
    ) -> Result<Node, PipelineError> {
        info!("Received diff {}", diff.phid);
        // Let other tasks run before the tree is locked up
        tokio::task::yield_now().await;

        self.transition(PipelineState::Cleaning);
        clean(&self.repo).await?;

        let (base, stack) = self
            .service
            .load_patches_stack(&self.repo, diff, &self.config.default_revision)
            .await?;
        if stack.is_empty() {
            return Err(PipelineError::empty_stack());
        }
        self.transition(PipelineState::StackResolved);

        let phids: Vec<Phid> = stack.iter().map(|e| e.diff_phid.clone()).collect();
        let messages: HashMap<Phid, String> = self
            .service
            .search_diffs(&phids, true)
            .await?
            .into_iter()
            .filter_map(|d| {
                let message = d.commit_message()?.to_string();
                Some((d.phid, message))
            })
            .collect();

        for entry in &stack {
            let message = commit_message(
                messages.get(&entry.diff_phid).map(String::as_str),
                &entry.diff_phid,
            );
            info!(phid = %entry.diff_phid, %message, "Applying patch");
            self.repo
                .import_patch(&entry.patch, &message, &self.config.bot_user)
                .await?;
            tokio::task::yield_now().await;
        }
        self.transition(PipelineState::PatchesApplied);

        let trigger = TriggerConfig::code_review(build_target.unwrap_or(&diff.phid).as_str());
        let path = self.repo.root().join(TRIGGER_CONFIG_FILE);
        tokio::fs::write(&path, trigger.to_json()?).await?;
        self.repo.add(&path).await?;
        self.repo
            .commit(&config_commit_message(&diff.phid), &self.config.bot_user)
            .await?;
        self.transition(PipelineState::ConfigCommitted);

        let tip = self.repo.tip().await?;
        if tip.node == base.node {
            return Err(PipelineError::no_op(&tip.node));
        }

        info!(rev = %tip.node, "Pushing patches to try");
        self.repo
            .push(&self.config.try_url, &tip.node, &self.ssh_command, true)
            .await?;
        self.transition(PipelineState::Pushed);
        info!(rev = %tip.node, "Diff has been pushed");

        if let Some(target) = build_target
            && self.config.publish
        {
            let uri = treeherder_url(&tip.node);
            if let Err(e) = self
                .service
                .create_harbormaster_uri(
                    target,
                    TREEHERDER_ARTIFACT_KEY,
                    TREEHERDER_ARTIFACT_NAME,
                    &uri,
                )
                .await
            {
                warn!(error = %e, "Failed to publish Treeherder link");
            }
        }
        self.transition(PipelineState::Reported);

        Ok(tip.node)
    }
}
