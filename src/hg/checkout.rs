//! One-shot bootstrap of the local clone.
//!
//! A full checkout of a large tree in one `hg update` can exhaust memory or
//! time limits on small workers. Instead the clone is made without a working
//! directory and then updated forward in steps of `batch_size` revisions,
//! starting from wherever an existing clone already is.
//!
//! Each step is a tokio child process, so dropping the bootstrap future (on
//! shutdown) kills the running `hg`.

use std::path::{Path, PathBuf};

use tracing::{info, instrument};

use crate::types::Node;

use super::{HgError, HgResult, RECORD_TEMPLATE, parse_record, run_hg};

/// Revision numbers to update through when moving from `start` to `target`.
///
/// Empty when `start` is already at or past `target`. A `batch_size` of zero
/// updates straight to `target`.
pub fn checkout_steps(start: u64, target: u64, batch_size: u64) -> Vec<u64> {
    if start >= target {
        return Vec::new();
    }
    if batch_size == 0 {
        return vec![target];
    }
    let mut steps: Vec<u64> = (1..)
        .map(|i: u64| start.saturating_add(i.saturating_mul(batch_size)))
        .take_while(|&rev| rev < target)
        .collect();
    steps.push(target);
    steps
}

/// Working directory position reported by `hg identify --num`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WorkingRev {
    /// `None` when nothing is checked out (the null revision).
    rev: Option<u64>,
    dirty: bool,
}

fn parse_identify_num(out: &str) -> HgResult<WorkingRev> {
    let out = out.trim();
    let (num, dirty) = match out.strip_suffix('+') {
        Some(num) => (num, true),
        None => (out, false),
    };
    let num: i64 = num
        .parse()
        .map_err(|_| HgError::UnexpectedOutput(out.to_string()))?;
    Ok(WorkingRev {
        rev: u64::try_from(num).ok(),
        dirty,
    })
}

/// Updates needed to bring the working directory at `current` to `target`.
fn plan_updates(current: WorkingRev, target: u64, batch_size: u64) -> Vec<u64> {
    let steps = match current.rev {
        Some(rev) => checkout_steps(rev, target, batch_size),
        None if target == 0 => vec![0],
        None => checkout_steps(0, target, batch_size),
    };
    if steps.is_empty() && current.dirty {
        return vec![target];
    }
    steps
}

async fn hg_stdout(workdir: &Path, args: &[&str]) -> HgResult<String> {
    let output = run_hg(workdir, args).await?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Clone (or refresh) `remote_url` into `local_path` and check out `target`
/// in batches.
///
/// Returns the node of the checked out revision.
pub async fn batch_checkout(
    remote_url: &str,
    local_path: &Path,
    target: &str,
    batch_size: u64,
) -> HgResult<Node> {
    if local_path.join(".hg").is_dir() {
        info!(path = %local_path.display(), "Pulling into existing clone");
        run_hg(local_path, &["pull"]).await?;
    } else {
        let dest = std::path::absolute(local_path)?;
        let parent = dest.parent().unwrap_or_else(|| Path::new("/"));
        tokio::fs::create_dir_all(parent).await?;
        let dest = dest.to_string_lossy().into_owned();
        info!(remote = remote_url, path = %dest, "Cloning without working directory");
        run_hg(parent, &["clone", "--noupdate", remote_url, dest.as_str()]).await?;
    }

    let rev = hg_stdout(
        local_path,
        &["log", "--rev", target, "--limit", "1", "--template", "{rev}"],
    )
    .await?;
    let target_rev: u64 = rev
        .parse()
        .map_err(|_| HgError::UnexpectedOutput(rev.clone()))?;

    let current = parse_identify_num(&hg_stdout(local_path, &["identify", "--num"]).await?)?;
    let steps = plan_updates(current, target_rev, batch_size);
    if steps.is_empty() {
        info!(rev = target_rev, "Working directory already at target");
    }
    for step in &steps {
        info!(rev = step, tip = target_rev, "Moving repo to revision");
        let rev = step.to_string();
        // A reused clone may carry changes from an interrupted run
        run_hg(local_path, &["update", "--clean", "--rev", rev.as_str()]).await?;
    }

    let record = hg_stdout(
        local_path,
        &["log", "--rev", ".", "--limit", "1", "--template", RECORD_TEMPLATE],
    )
    .await?;
    Ok(parse_record(&record)?.node)
}

/// Clone and check out `target`, ready for the worker.
///
/// The worker awaits this before it accepts any queue entry; an error here
/// is fatal to startup.
#[instrument(skip_all, fields(remote = %remote_url, path = %local_path.display()))]
pub async fn bootstrap(
    remote_url: String,
    local_path: PathBuf,
    target: String,
    batch_size: u64,
) -> HgResult<Node> {
    info!("Checking out {} in child processes", target);
    let node = batch_checkout(&remote_url, &local_path, &target, batch_size).await?;
    info!(node = %node, "Batch checkout finished");
    Ok(node)
}
