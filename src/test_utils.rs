//! Shared test utilities: recording collaborators and proptest generators.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use proptest::prelude::*;

use crate::hg::{HgError, HgResult, Repository, hg_available};
use crate::phabricator::{
    AttachedCommit, CommitsAttachment, ConduitError, DiffAttachments, DiffFields, DiffRecord,
    PatchStackResolver, ResultReporter,
};
use crate::types::{
    BuildState, CommitRecord, Diff, Node, PatchStackEntry, Phid, UnitResult,
};

pub fn arb_phid() -> impl Strategy<Value = Phid> {
    "PHID-[A-Z]{4}-[a-z0-9]{20}".prop_map(Phid::from)
}

pub fn arb_node() -> impl Strategy<Value = Node> {
    "[0-9a-f]{40}".prop_map(|s| Node::parse(s).unwrap())
}

/// Deterministic node for the `n`th changeset a mock creates.
pub fn mock_node(n: u64) -> Node {
    Node::parse(format!("{:040x}", n)).unwrap()
}

/// True when the `hg` binary is missing; the calling test should return.
///
/// Prints the skip so runs without Mercurial show what was not exercised.
pub fn skip_without_hg(test: &str) -> bool {
    if hg_available() {
        return false;
    }
    eprintln!("skipping {}: hg is not installed", test);
    true
}

pub fn command_failed(command: &str, stderr: &str) -> HgError {
    HgError::CommandFailed {
        command: command.to_string(),
        stderr: stderr.to_string(),
    }
}

// ─── Repository ───────────────────────────────────────────────────────────────

/// A call made against [`MockRepository`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoCall {
    RevertAll,
    StripOutgoing,
    Pull,
    ImportPatch {
        patch: String,
        message: String,
        user: String,
    },
    Add(PathBuf),
    Commit {
        message: String,
        user: String,
    },
    Push {
        dest: String,
        rev: Node,
        ssh: String,
        force: bool,
    },
    Identify(String),
    UpdateClean(String),
}

impl RepoCall {
    /// True for calls that change history or the working directory contents.
    pub fn mutates_tree(&self) -> bool {
        matches!(
            self,
            RepoCall::ImportPatch { .. }
                | RepoCall::Add(_)
                | RepoCall::Commit { .. }
                | RepoCall::Push { .. }
        )
    }
}

#[derive(Default)]
struct Failures {
    strip: Option<HgError>,
    pull: Option<HgError>,
    import: Option<HgError>,
    commit: Option<HgError>,
    push: Option<HgError>,
}

struct RepoState {
    calls: Vec<RepoCall>,
    revisions: HashMap<String, CommitRecord>,
    tip: CommitRecord,
    next_node: u64,
    dirty: bool,
    frozen: bool,
    failures: Failures,
}

/// An in-memory [`Repository`] that records every call.
///
/// It starts with one public changeset, reachable as `central`. Imports and
/// commits create new changesets and move the tip. Configured failures fire
/// once; a failing import leaves the tree dirty until `revert_all`.
pub struct MockRepository {
    root: PathBuf,
    state: Mutex<RepoState>,
}

impl MockRepository {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let base = CommitRecord {
            node: mock_node(1),
            author: "Test".to_string(),
            message: "Initial commit".to_string(),
        };
        let mut revisions = HashMap::new();
        revisions.insert("central".to_string(), base.clone());
        revisions.insert(base.node.to_string(), base.clone());
        MockRepository {
            root: root.as_ref().to_path_buf(),
            state: Mutex::new(RepoState {
                calls: Vec::new(),
                revisions,
                tip: base,
                next_node: 2,
                dirty: false,
                frozen: false,
                failures: Failures::default(),
            }),
        }
    }

    /// Node of the initial changeset.
    pub fn base_node(&self) -> Node {
        mock_node(1)
    }

    /// Registers a revision name that `identify` and `update_clean` know.
    pub fn add_revision(&self, rev: &str) -> Node {
        let mut state = self.state.lock().unwrap();
        let node = mock_node(state.next_node);
        state.next_node += 1;
        let record = CommitRecord {
            node: node.clone(),
            author: "Test".to_string(),
            message: format!("revision {}", rev),
        };
        state.revisions.insert(rev.to_string(), record.clone());
        state.revisions.insert(node.to_string(), record);
        node
    }

    /// Make imports and commits leave the tip where it is.
    pub fn freeze_tip(&self) {
        self.state.lock().unwrap().frozen = true;
    }

    pub fn fail_strip(&self, err: HgError) {
        self.state.lock().unwrap().failures.strip = Some(err);
    }

    pub fn fail_pull(&self, err: HgError) {
        self.state.lock().unwrap().failures.pull = Some(err);
    }

    pub fn fail_import(&self, err: HgError) {
        self.state.lock().unwrap().failures.import = Some(err);
    }

    pub fn fail_commit(&self, err: HgError) {
        self.state.lock().unwrap().failures.commit = Some(err);
    }

    pub fn fail_push(&self, err: HgError) {
        self.state.lock().unwrap().failures.push = Some(err);
    }

    pub fn calls(&self) -> Vec<RepoCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn pushes(&self) -> Vec<RepoCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, RepoCall::Push { .. }))
            .collect()
    }

    /// True when a failed import left uncommitted changes behind.
    pub fn is_dirty(&self) -> bool {
        self.state.lock().unwrap().dirty
    }

    pub fn current_tip(&self) -> CommitRecord {
        self.state.lock().unwrap().tip.clone()
    }

    fn record(&self, call: RepoCall) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn advance(state: &mut RepoState, message: &str, user: &str) {
        if state.frozen {
            return;
        }
        let node = mock_node(state.next_node);
        state.next_node += 1;
        state.tip = CommitRecord {
            node,
            author: user.to_string(),
            message: message.to_string(),
        };
    }
}

impl Repository for MockRepository {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn revert_all(&self) -> HgResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(RepoCall::RevertAll);
        state.dirty = false;
        Ok(())
    }

    async fn strip_outgoing(&self) -> HgResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(RepoCall::StripOutgoing);
        state.failures.strip.take().map_or(Ok(()), Err)
    }

    async fn pull(&self) -> HgResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(RepoCall::Pull);
        state.failures.pull.take().map_or(Ok(()), Err)
    }

    async fn import_patch(&self, patch: &str, message: &str, user: &str) -> HgResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(RepoCall::ImportPatch {
            patch: patch.to_string(),
            message: message.to_string(),
            user: user.to_string(),
        });
        if let Some(err) = state.failures.import.take() {
            state.dirty = true;
            return Err(err);
        }
        Self::advance(&mut state, message, user);
        Ok(())
    }

    async fn add(&self, path: &Path) -> HgResult<()> {
        self.record(RepoCall::Add(path.to_path_buf()));
        Ok(())
    }

    async fn commit(&self, message: &str, user: &str) -> HgResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(RepoCall::Commit {
            message: message.to_string(),
            user: user.to_string(),
        });
        if let Some(err) = state.failures.commit.take() {
            return Err(err);
        }
        Self::advance(&mut state, message, user);
        Ok(())
    }

    async fn tip(&self) -> HgResult<CommitRecord> {
        Ok(self.current_tip())
    }

    async fn push(&self, dest: &str, rev: &Node, ssh: &str, force: bool) -> HgResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(RepoCall::Push {
            dest: dest.to_string(),
            rev: rev.clone(),
            ssh: ssh.to_string(),
            force,
        });
        state.failures.push.take().map_or(Ok(()), Err)
    }

    async fn identify(&self, rev: &str) -> HgResult<Option<Node>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(RepoCall::Identify(rev.to_string()));
        Ok(state.revisions.get(rev).map(|r| r.node.clone()))
    }

    async fn update_clean(&self, rev: &str) -> HgResult<CommitRecord> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(RepoCall::UpdateClean(rev.to_string()));
        let Some(record) = state.revisions.get(rev).cloned() else {
            return Err(command_failed(
                "hg update --clean",
                &format!("abort: unknown revision '{}'!\n", rev),
            ));
        };
        state.tip = record.clone();
        state.dirty = false;
        Ok(record)
    }
}

// ─── Review service ───────────────────────────────────────────────────────────

/// A `harbormaster.createartifact` call made against [`MockReviewService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactCall {
    pub build_target: Phid,
    pub artifact_key: String,
    pub name: String,
    pub uri: String,
}

/// A `harbormaster.sendmessage` call made against [`MockReviewService`].
#[derive(Debug, Clone, PartialEq)]
pub struct BuildUpdate {
    pub build_target: Phid,
    pub state: BuildState,
    pub unit: Vec<UnitResult>,
}

#[derive(Default)]
struct ReviewState {
    base: Option<String>,
    stack: Vec<PatchStackEntry>,
    messages: HashMap<Phid, String>,
    resolve_error: Option<ConduitError>,
    search_error: Option<ConduitError>,
    fail_reports: bool,
    resolved: Vec<Phid>,
    searches: Vec<(Vec<Phid>, bool)>,
    build_updates: Vec<BuildUpdate>,
    artifacts: Vec<ArtifactCall>,
}

/// An in-memory review service implementing both collaborator traits.
///
/// `load_patches_stack` updates the repository to the configured base
/// (`central` unless set) and returns the configured stack.
#[derive(Default)]
pub struct MockReviewService {
    state: Mutex<ReviewState>,
}

impl MockReviewService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Service resolving every diff to `stack`.
    pub fn with_stack(stack: Vec<PatchStackEntry>) -> Self {
        let service = Self::new();
        service.state.lock().unwrap().stack = stack;
        service
    }

    pub fn set_base(&self, rev: &str) {
        self.state.lock().unwrap().base = Some(rev.to_string());
    }

    /// Attach an original commit message to a diff.
    pub fn set_commit_message(&self, diff_phid: &str, message: &str) {
        self.state
            .lock()
            .unwrap()
            .messages
            .insert(Phid::from(diff_phid), message.to_string());
    }

    pub fn fail_resolve(&self, err: ConduitError) {
        self.state.lock().unwrap().resolve_error = Some(err);
    }

    pub fn fail_search(&self, err: ConduitError) {
        self.state.lock().unwrap().search_error = Some(err);
    }

    /// Make every reporting call fail.
    pub fn fail_reports(&self) {
        self.state.lock().unwrap().fail_reports = true;
    }

    /// Phids of the diffs whose stack was resolved, in order.
    pub fn resolved(&self) -> Vec<Phid> {
        self.state.lock().unwrap().resolved.clone()
    }

    pub fn searches(&self) -> Vec<(Vec<Phid>, bool)> {
        self.state.lock().unwrap().searches.clone()
    }

    pub fn build_updates(&self) -> Vec<BuildUpdate> {
        self.state.lock().unwrap().build_updates.clone()
    }

    pub fn artifacts(&self) -> Vec<ArtifactCall> {
        self.state.lock().unwrap().artifacts.clone()
    }

    fn report_error(method: &str) -> ConduitError {
        ConduitError::Status {
            method: method.to_string(),
            status: 503,
        }
    }
}

impl PatchStackResolver for MockReviewService {
    async fn load_patches_stack<R: Repository>(
        &self,
        repo: &R,
        diff: &Diff,
        default_revision: &str,
    ) -> Result<(CommitRecord, Vec<PatchStackEntry>), ConduitError> {
        let (base, stack) = {
            let mut state = self.state.lock().unwrap();
            state.resolved.push(diff.phid.clone());
            if let Some(err) = state.resolve_error.take() {
                return Err(err);
            }
            let base = state
                .base
                .clone()
                .unwrap_or_else(|| default_revision.to_string());
            (base, state.stack.clone())
        };
        let record = repo
            .update_clean(&base)
            .await
            .map_err(ConduitError::update_failed(&base))?;
        Ok((record, stack))
    }

    async fn search_diffs(
        &self,
        diff_phids: &[Phid],
        commits: bool,
    ) -> Result<Vec<DiffRecord>, ConduitError> {
        let mut state = self.state.lock().unwrap();
        state.searches.push((diff_phids.to_vec(), commits));
        if let Some(err) = state.search_error.take() {
            return Err(err);
        }
        Ok(diff_phids
            .iter()
            .enumerate()
            .map(|(i, phid)| DiffRecord {
                id: i as u64 + 1,
                phid: phid.clone(),
                fields: DiffFields::default(),
                attachments: DiffAttachments {
                    commits: Some(CommitsAttachment {
                        commits: state
                            .messages
                            .get(phid)
                            .map(|message| AttachedCommit {
                                identifier: None,
                                message: message.clone(),
                            })
                            .into_iter()
                            .collect(),
                    }),
                },
            })
            .collect())
    }
}

impl ResultReporter for MockReviewService {
    async fn update_build_target(
        &self,
        build_target: &Phid,
        state: BuildState,
        unit: &[UnitResult],
    ) -> Result<(), ConduitError> {
        let mut inner = self.state.lock().unwrap();
        inner.build_updates.push(BuildUpdate {
            build_target: build_target.clone(),
            state,
            unit: unit.to_vec(),
        });
        if inner.fail_reports {
            return Err(Self::report_error("harbormaster.sendmessage"));
        }
        Ok(())
    }

    async fn create_harbormaster_uri(
        &self,
        build_target: &Phid,
        artifact_key: &str,
        name: &str,
        uri: &str,
    ) -> Result<(), ConduitError> {
        let mut state = self.state.lock().unwrap();
        state.artifacts.push(ArtifactCall {
            build_target: build_target.clone(),
            artifact_key: artifact_key.to_string(),
            name: name.to_string(),
            uri: uri.to_string(),
        });
        if state.fail_reports {
            return Err(Self::report_error("harbormaster.createartifact"));
        }
        Ok(())
    }
}
