//! The working-tree interface used by the pipeline and its Mercurial implementation.

use std::future::Future;
use std::path::{Path, PathBuf};

use crate::types::{CommitRecord, Node};

use super::{
    EMPTY_REVISION_SET, HgError, HgResult, blocking, log_record, run_hg_stdout, run_hg_sync,
    run_hg_with_stdin,
};

/// Operations on the local working tree.
///
/// The worker owns exactly one implementation for its whole lifetime and
/// drives it from a single task, so implementations need no internal locking.
/// Tests substitute a recording in-memory implementation.
pub trait Repository: Send + Sync {
    /// Root directory of the working tree.
    fn root(&self) -> &Path;

    /// Discard every uncommitted change (`hg revert --all`).
    fn revert_all(&self) -> impl Future<Output = HgResult<()>> + Send;

    /// Strip local draft changesets that are not on the default remote.
    ///
    /// Fails with [`EMPTY_REVISION_SET`] in stderr when there is nothing to strip.
    fn strip_outgoing(&self) -> impl Future<Output = HgResult<()>> + Send;

    /// Pull from the default remote without updating the working directory.
    fn pull(&self) -> impl Future<Output = HgResult<()>> + Send;

    /// Apply `patch` and commit it with `message` as `user`.
    fn import_patch(
        &self,
        patch: &str,
        message: &str,
        user: &str,
    ) -> impl Future<Output = HgResult<()>> + Send;

    /// Schedule a file for addition.
    fn add(&self, path: &Path) -> impl Future<Output = HgResult<()>> + Send;

    /// Commit pending changes.
    fn commit(&self, message: &str, user: &str) -> impl Future<Output = HgResult<()>> + Send;

    /// Read the tip changeset.
    fn tip(&self) -> impl Future<Output = HgResult<CommitRecord>> + Send;

    /// Push `rev` to `dest`, authenticating with the `ssh` command line.
    fn push(
        &self,
        dest: &str,
        rev: &Node,
        ssh: &str,
        force: bool,
    ) -> impl Future<Output = HgResult<()>> + Send;

    /// Resolve `rev` to a node, or `None` if the tree does not know it.
    fn identify(&self, rev: &str) -> impl Future<Output = HgResult<Option<Node>>> + Send;

    /// Update the working directory to `rev`, discarding local changes.
    fn update_clean(&self, rev: &str) -> impl Future<Output = HgResult<CommitRecord>> + Send;
}

/// A Mercurial clone driven through the `hg` command line.
#[derive(Debug, Clone)]
pub struct HgRepository {
    root: PathBuf,
}

impl HgRepository {
    /// Open an existing clone.
    pub fn open(root: impl Into<PathBuf>) -> HgResult<Self> {
        let root = root.into();
        if !root.join(".hg").is_dir() {
            return Err(HgError::NotARepository(root.display().to_string()));
        }
        Ok(HgRepository { root })
    }

    /// Returns true if tracked files have uncommitted modifications.
    pub fn has_uncommitted_changes(&self) -> HgResult<bool> {
        let out = run_hg_stdout(
            &self.root,
            &["status", "--modified", "--added", "--removed", "--deleted"],
        )?;
        Ok(!out.is_empty())
    }

    async fn run(&self, args: Vec<String>) -> HgResult<()> {
        let root = self.root.clone();
        blocking(move || run_hg_sync(&root, args.as_slice()).map(|_| ())).await
    }
}

impl Repository for HgRepository {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn revert_all(&self) -> HgResult<()> {
        self.run(vec!["revert".into(), "--all".into(), "--no-backup".into()])
            .await
    }

    async fn strip_outgoing(&self) -> HgResult<()> {
        self.run(vec![
            "--config".into(),
            "extensions.strip=".into(),
            "strip".into(),
            "--rev".into(),
            "roots(outgoing())".into(),
            "--force".into(),
            "--no-backup".into(),
        ])
        .await
    }

    async fn pull(&self) -> HgResult<()> {
        self.run(vec!["pull".into()]).await
    }

    async fn import_patch(&self, patch: &str, message: &str, user: &str) -> HgResult<()> {
        let root = self.root.clone();
        let patch = patch.as_bytes().to_vec();
        let args = vec![
            "import".to_string(),
            "--message".to_string(),
            message.to_string(),
            "--user".to_string(),
            user.to_string(),
            "-".to_string(),
        ];
        blocking(move || run_hg_with_stdin(&root, args.as_slice(), &patch).map(|_| ())).await
    }

    async fn add(&self, path: &Path) -> HgResult<()> {
        self.run(vec!["add".into(), path.to_string_lossy().into_owned()])
            .await
    }

    async fn commit(&self, message: &str, user: &str) -> HgResult<()> {
        self.run(vec![
            "commit".into(),
            "--message".into(),
            message.to_string(),
            "--user".into(),
            user.to_string(),
        ])
        .await
    }

    async fn tip(&self) -> HgResult<CommitRecord> {
        let root = self.root.clone();
        blocking(move || log_record(&root, "tip")).await
    }

    async fn push(&self, dest: &str, rev: &Node, ssh: &str, force: bool) -> HgResult<()> {
        let mut args = vec![
            "push".to_string(),
            "--rev".to_string(),
            rev.to_string(),
            "--ssh".to_string(),
            ssh.to_string(),
        ];
        if force {
            args.push("--force".to_string());
        }
        args.push(dest.to_string());
        self.run(args).await
    }

    async fn identify(&self, rev: &str) -> HgResult<Option<Node>> {
        let root = self.root.clone();
        let rev = rev.to_string();
        blocking(move || {
            match run_hg_stdout(
                &root,
                &["log", "--rev", rev.as_str(), "--limit", "1", "--template", "{node}"],
            ) {
                Ok(out) if out.is_empty() => Ok(None),
                Ok(out) => Ok(Some(Node::parse(out)?)),
                // Unknown revisions make hg abort
                Err(HgError::CommandFailed { .. }) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
    }

    async fn update_clean(&self, rev: &str) -> HgResult<CommitRecord> {
        let root = self.root.clone();
        let rev = rev.to_string();
        blocking(move || {
            run_hg_sync(&root, &["update", "--clean", "--rev", rev.as_str()])?;
            log_record(&root, ".")
        })
        .await
    }
}

/// Strip outgoing drafts and pull the latest remote state.
///
/// Having nothing to strip is not an error; any other failure propagates
/// unchanged.
pub async fn clean<R: Repository>(repo: &R) -> HgResult<()> {
    tracing::info!("Remove all mercurial drafts");
    match repo.strip_outgoing().await {
        Ok(()) => {}
        Err(e) if e.stderr().is_some_and(|s| s.contains(EMPTY_REVISION_SET)) => {
            tracing::debug!("no draft to strip");
        }
        Err(e) => return Err(e),
    }

    tracing::info!("Pull updates from remote repo");
    repo.pull().await
}
