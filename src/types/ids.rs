//! Newtype wrappers for domain identifiers.
//!
//! These types prevent accidental mixing of different ID types (e.g., using a
//! build target PHID where a diff PHID is expected) and make the code more
//! self-documenting.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A Phabricator object identifier (`PHID-DIFF-...`, `PHID-HMBT-...`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Phid(pub String);

impl Phid {
    pub fn new(s: impl Into<String>) -> Self {
        Phid(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Phid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Phid {
    fn from(s: String) -> Self {
        Phid(s)
    }
}

impl From<&str> for Phid {
    fn from(s: &str) -> Self {
        Phid(s.to_string())
    }
}

/// Error returned when a string is not a full Mercurial node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid node {0:?}: expected 40 hex characters")]
pub struct InvalidNode(pub String);

/// A Mercurial changeset node (40 hex characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Node(String);

impl Node {
    /// Parses a full 40-character hex node, normalizing to lowercase.
    pub fn parse(s: impl AsRef<str>) -> Result<Self, InvalidNode> {
        let s = s.as_ref().trim();
        if s.len() == 40 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Node(s.to_ascii_lowercase()))
        } else {
            Err(InvalidNode(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the 12-character short form used by `hg log`.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
