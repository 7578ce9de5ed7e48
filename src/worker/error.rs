//! Failure classification at the per-diff boundary.

use thiserror::Error;

use crate::hg::HgError;
use crate::phabricator::ConduitError;
use crate::types::{Node, UnitResult, UnitResultState};

/// Why a pipeline run failed.
///
/// Every error raised while processing a diff collapses into one of these
/// two kinds, which decide what is reported on the build target.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// An `hg` command exited with a non-zero status.
    #[error("mercurial error: {stderr}")]
    VersionControl { stderr: String },

    /// Anything else.
    #[error("{message}")]
    Generic { message: String },
}

impl PipelineError {
    pub fn generic(message: impl ToString) -> Self {
        PipelineError::Generic {
            message: message.to_string(),
        }
    }

    /// The stack resolved to nothing.
    pub fn empty_stack() -> Self {
        Self::generic("No patches to apply")
    }

    /// Applying the stack left the tip on the base revision.
    pub fn no_op(node: &Node) -> Self {
        Self::generic(format!(
            "Commit is the same as base ({}), nothing changed !",
            node
        ))
    }

    /// Builds the unit result published for this failure.
    pub fn to_unit_result(&self, duration: f64) -> UnitResult {
        match self {
            PipelineError::VersionControl { stderr } => UnitResult::code_review(
                "mercurial",
                UnitResultState::Fail,
                format!(
                    "WARNING: The code review bot failed to apply your patch.\n\n```{}```",
                    stderr
                ),
                duration,
            ),
            PipelineError::Generic { message } => UnitResult::code_review(
                "general",
                UnitResultState::Broken,
                format!(
                    "WARNING: An error occured in the code review bot.\n\n```{}```",
                    message
                ),
                duration,
            ),
        }
    }
}

impl From<HgError> for PipelineError {
    fn from(e: HgError) -> Self {
        match e {
            HgError::CommandFailed { stderr, .. } => PipelineError::VersionControl { stderr },
            other => Self::generic(other),
        }
    }
}

impl From<ConduitError> for PipelineError {
    fn from(e: ConduitError) -> Self {
        match e {
            ConduitError::Hg(e) => e.into(),
            other => Self::generic(other),
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        Self::generic(e)
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        Self::generic(e)
    }
}
