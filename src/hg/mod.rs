//! Local Mercurial operations on the shared working tree.
//!
//! This module implements the Mercurial commands the worker needs:
//! - Bootstrap (clone and batched checkout of the canonical tree)
//! - Cleaning (strip outgoing drafts, pull, revert)
//! - Patch application (import, add, commit)
//! - Push to the try repository over SSH
//!
//! Every command runs as an `hg` child process with `HGPLAIN=1`, so output
//! is stable regardless of the operator's configuration. The async
//! [`Repository`] methods move the blocking process calls onto tokio's
//! blocking pool; the bootstrap drives cancellable tokio child processes.

pub mod checkout;
pub mod repository;

use std::ffi::OsStr;
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::process::{Command, Output, Stdio};

use thiserror::Error;

use crate::types::{CommitRecord, InvalidNode, Node};

pub use checkout::{batch_checkout, bootstrap, checkout_steps};
pub use repository::{HgRepository, Repository, clean};

/// Stderr fragment printed by `hg strip` when there is nothing to strip.
pub const EMPTY_REVISION_SET: &str = "abort: empty revision set";

/// Errors from Mercurial operations.
#[derive(Debug, Error)]
pub enum HgError {
    /// Mercurial command exited with a non-zero status.
    #[error("hg command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// The path does not contain a Mercurial repository.
    #[error("not a mercurial repository: {0}")]
    NotARepository(String),

    /// Mercurial printed something we could not interpret.
    #[error("unexpected hg output: {0}")]
    UnexpectedOutput(String),

    /// Invalid changeset node.
    #[error(transparent)]
    InvalidNode(#[from] InvalidNode),

    /// The blocking task running the command panicked or was cancelled.
    #[error("hg task failed: {0}")]
    Join(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HgError {
    /// Returns the captured stderr if this is a command failure.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            HgError::CommandFailed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

/// Result type for Mercurial operations.
pub type HgResult<T> = Result<T, HgError>;

/// Template used to read a changeset as a [`CommitRecord`].
///
/// The description is last because it may span several lines.
pub(crate) const RECORD_TEMPLATE: &str = "{node}\\n{author}\\n{desc}";

/// Create an hg Command with plain, non-interactive output.
pub(crate) fn hg_command(workdir: &Path) -> Command {
    let mut cmd = Command::new("hg");
    cmd.current_dir(workdir);

    // Ignore aliases, localized messages and output-changing settings
    cmd.env("HGPLAIN", "1");
    cmd.env("HGENCODING", "utf-8");

    cmd.args(["--config", "ui.interactive=false"]);
    cmd
}

fn describe<S: AsRef<OsStr>>(args: &[S]) -> String {
    let parts: Vec<_> = args
        .iter()
        .map(|a| a.as_ref().to_string_lossy().into_owned())
        .collect();
    format!("hg {}", parts.join(" "))
}

fn check_output<S: AsRef<OsStr>>(args: &[S], output: Output) -> HgResult<Output> {
    let command = describe(args);
    if output.status.success() {
        tracing::trace!(
            %command,
            stdout = %String::from_utf8_lossy(&output.stdout).trim_end(),
            "hg command succeeded"
        );
        Ok(output)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        tracing::debug!(%command, %stderr, "hg command failed");
        Err(HgError::CommandFailed { command, stderr })
    }
}

/// Run an hg command in the given working directory.
///
/// Returns the command output on success, or an `HgError` carrying the
/// decoded stderr on failure.
pub fn run_hg_sync<S: AsRef<OsStr>>(workdir: &Path, args: &[S]) -> HgResult<Output> {
    let output = hg_command(workdir).args(args).output()?;
    check_output(args, output)
}

/// Run an hg command, feeding `stdin` to the child process.
///
/// hg may exit before reading its input (a held lock, an unfinished merge).
/// The write then fails with a broken pipe, and the command's own exit status
/// and stderr decide the result.
pub fn run_hg_with_stdin<S: AsRef<OsStr>>(
    workdir: &Path,
    args: &[S],
    stdin: &[u8],
) -> HgResult<Output> {
    let mut cmd = hg_command(workdir);
    cmd.args(args);
    run_with_stdin(cmd, args, stdin)
}

fn run_with_stdin<S: AsRef<OsStr>>(
    mut cmd: Command,
    args: &[S],
    stdin: &[u8],
) -> HgResult<Output> {
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let pipe = child.stdin.take();
    // Write from a second thread so a chatty child cannot fill its stdout
    // pipe while we block on stdin
    let (written, output) = std::thread::scope(|scope| {
        let writer = scope.spawn(move || match pipe {
            // Dropping the pipe closes it so hg sees EOF
            Some(mut pipe) => pipe.write_all(stdin),
            None => Ok(()),
        });
        let output = child.wait_with_output();
        (writer.join(), output)
    });

    let output = check_output(args, output?)?;
    match written {
        Ok(Ok(())) => Ok(output),
        Ok(Err(e)) if e.kind() == ErrorKind::BrokenPipe => Ok(output),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(HgError::Join("stdin writer panicked".to_string())),
    }
}

/// Run an hg command as a tokio child process.
///
/// The child is killed if the returned future is dropped.
pub async fn run_hg(workdir: &Path, args: &[&str]) -> HgResult<Output> {
    let mut cmd = tokio::process::Command::from(hg_command(workdir));
    cmd.args(args);
    run_killable(cmd, args).await
}

async fn run_killable<S: AsRef<OsStr>>(
    mut cmd: tokio::process::Command,
    args: &[S],
) -> HgResult<Output> {
    let output = cmd.kill_on_drop(true).output().await?;
    check_output(args, output)
}

/// Run an hg command and return stdout as a string.
pub fn run_hg_stdout<S: AsRef<OsStr>>(workdir: &Path, args: &[S]) -> HgResult<String> {
    let output = run_hg_sync(workdir, args)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Read a single changeset as a [`CommitRecord`].
pub fn log_record(workdir: &Path, rev: &str) -> HgResult<CommitRecord> {
    let out = run_hg_stdout(
        workdir,
        &["log", "--rev", rev, "--limit", "1", "--template", RECORD_TEMPLATE],
    )?;
    parse_record(&out)
}

/// Parse the output of [`RECORD_TEMPLATE`].
pub(crate) fn parse_record(out: &str) -> HgResult<CommitRecord> {
    let mut parts = out.splitn(3, '\n');
    let (Some(node), Some(author)) = (parts.next(), parts.next()) else {
        return Err(HgError::UnexpectedOutput(out.to_string()));
    };
    Ok(CommitRecord {
        node: Node::parse(node)?,
        author: author.to_string(),
        message: parts.next().unwrap_or_default().to_string(),
    })
}

/// Run a blocking hg operation on tokio's blocking pool.
pub(crate) async fn blocking<T, F>(f: F) -> HgResult<T>
where
    F: FnOnce() -> HgResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| HgError::Join(e.to_string()))?
}

/// Returns true if an `hg` binary can be executed.
pub fn hg_available() -> bool {
    Command::new("hg")
        .arg("version")
        .arg("--quiet")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_record_multiline_description() {
        let node = "a".repeat(40);
        let out = format!("{}\nbot <bot@example.com>\nfirst line\nDifferential Diff: PHID-1", node);
        let record = parse_record(&out).unwrap();
        assert_eq!(record.node.as_str(), node);
        assert_eq!(record.author, "bot <bot@example.com>");
        assert_eq!(record.message, "first line\nDifferential Diff: PHID-1");
    }

    #[test]
    fn parse_record_empty_description() {
        let out = format!("{}\nbot", "b".repeat(40));
        let record = parse_record(&out).unwrap();
        assert_eq!(record.message, "");
    }

    #[test]
    fn parse_record_rejects_garbage() {
        assert!(matches!(
            parse_record("nonsense"),
            Err(HgError::UnexpectedOutput(_))
        ));
        assert!(matches!(
            parse_record("nothex\nbot\nmsg"),
            Err(HgError::InvalidNode(_))
        ));
    }

    #[test]
    fn describe_joins_args() {
        assert_eq!(describe(&["push", "--force"]), "hg push --force");
    }

    #[cfg(unix)]
    #[test]
    fn child_exiting_before_reading_stdin_reports_its_stderr() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut cmd = Command::new("sh");
        cmd.current_dir(dir.path());
        let args = ["-c", "echo 'abort: uncommitted changes' >&2; exit 255"];
        cmd.args(args);

        let err = run_with_stdin(cmd, &args, &[b'+'; 1 << 20]).unwrap_err();

        assert_eq!(err.stderr(), Some("abort: uncommitted changes\n"));
    }

    #[cfg(unix)]
    #[test]
    fn child_reading_all_stdin_succeeds() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut cmd = Command::new("sh");
        cmd.current_dir(dir.path());
        let args = ["-c", "wc -c"];
        cmd.args(args);

        let output = run_with_stdin(cmd, &args, &[b'+'; 1 << 20]).unwrap();

        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "1048576");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn abandoned_child_is_killed() {
        use std::time::Duration;

        let dir = tempfile::TempDir::new().unwrap();
        let pidfile = dir.path().join("pid");
        let script = format!("echo $$ > {}; exec sleep 30", pidfile.display());
        let args = ["-c", script.as_str()];
        let mut cmd = tokio::process::Command::new("sh");
        cmd.args(args);

        let run = run_killable(cmd, &args);
        assert!(tokio::time::timeout(Duration::from_millis(500), run).await.is_err());

        let pid = std::fs::read_to_string(&pidfile).unwrap();
        let stat = Path::new("/proc").join(pid.trim()).join("stat");
        let mut gone = false;
        for _ in 0..100 {
            match std::fs::read_to_string(&stat) {
                // Exited and reaped, or a zombie waiting to be
                Err(_) => gone = true,
                Ok(s) => gone = s.rsplit(')').next().is_some_and(|rest| rest.trim_start().starts_with('Z')),
            }
            if gone {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(gone, "child {} still running", pid.trim());
    }

    #[test]
    fn stderr_only_for_command_failures() {
        let failed = HgError::CommandFailed {
            command: "hg import -".to_string(),
            stderr: "patch failed to apply".to_string(),
        };
        assert_eq!(failed.stderr(), Some("patch failed to apply"));
        assert_eq!(HgError::Join("boom".to_string()).stderr(), None);
    }
}
