//! Conduit API error types.

use thiserror::Error;

use crate::hg::HgError;
use crate::types::Phid;

/// Errors from the Phabricator Conduit API and from stack resolution.
#[derive(Debug, Error)]
pub enum ConduitError {
    /// The HTTP request could not be sent or its body could not be read.
    #[error("HTTP error calling {method}: {source}")]
    Http {
        method: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-success HTTP status.
    #[error("{method} returned HTTP {status}")]
    Status { method: String, status: u16 },

    /// Conduit reported an application-level error.
    #[error("{method} failed: {code}: {info}")]
    Api {
        method: String,
        code: String,
        info: String,
    },

    /// The response did not have the expected shape.
    #[error("malformed response from {method}: {message}")]
    Malformed { method: String, message: String },

    /// The API base URL is unusable.
    #[error("invalid Phabricator URL: {0}")]
    InvalidUrl(String),

    /// Building the HTTP client failed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// No diff exists with the given phid.
    #[error("diff {0} not found")]
    DiffNotFound(Phid),

    /// A revision in the stack has no diff to apply.
    #[error("revision {0} has no diff")]
    RevisionWithoutDiff(Phid),

    /// A revision has more than one parent, so the stack is ambiguous.
    #[error("revision {0} has multiple parents")]
    MultipleParents(Phid),

    /// The working directory could not be moved to the stack's base.
    #[error("Failed to update to revision {revision}: {source}")]
    UpdateFailed {
        revision: String,
        #[source]
        source: HgError,
    },

    /// A local Mercurial operation failed during stack resolution.
    #[error(transparent)]
    Hg(#[from] HgError),
}

impl ConduitError {
    pub(crate) fn update_failed(revision: &str) -> impl FnOnce(HgError) -> Self {
        move |source| ConduitError::UpdateFailed {
            revision: revision.to_string(),
            source,
        }
    }

    pub(crate) fn malformed(method: &str, message: impl ToString) -> Self {
        ConduitError::Malformed {
            method: method.to_string(),
            message: message.to_string(),
        }
    }
}
