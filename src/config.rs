//! Environment-driven configuration.

use std::path::PathBuf;

use thiserror::Error;

use crate::worker::PipelineConfig;

pub const DEFAULT_REPO_URL: &str = "https://hg.mozilla.org/mozilla-unified";
pub const DEFAULT_TRY_URL: &str = "ssh://hg.mozilla.org/try";
pub const DEFAULT_BATCH_SIZE: u64 = 100_000;
pub const DEFAULT_REVISION: &str = "central";
pub const DEFAULT_BOT_USER: &str = "pulselistener";

/// Errors while reading configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{name} must be {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Runtime configuration of the try-push worker.
#[derive(Clone)]
pub struct Config {
    /// Phabricator instance, with or without the `/api/` suffix.
    pub phabricator_url: String,
    pub phabricator_token: String,
    pub ssh_user: String,
    /// Private key material, with literal `\n` sequences expanded.
    pub ssh_key: String,
    pub repo_url: String,
    pub repo_dir: PathBuf,
    pub try_url: String,
    pub batch_size: u64,
    /// Whether outcomes are published to Phabricator.
    pub publish: bool,
    pub default_revision: String,
    pub bot_user: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| var(name).ok_or(ConfigError::Missing(name));

        let batch_size = match var("BATCH_SIZE") {
            Some(value) => value.trim().parse::<u64>().map_err(|_| ConfigError::Invalid {
                name: "BATCH_SIZE",
                expected: "a non-negative integer",
                value,
            })?,
            None => DEFAULT_BATCH_SIZE,
        };

        let publish = match var("PUBLISH_PHABRICATOR") {
            Some(value) => parse_flag(&value).ok_or(ConfigError::Invalid {
                name: "PUBLISH_PHABRICATOR",
                expected: "a boolean",
                value,
            })?,
            None => false,
        };

        Ok(Config {
            phabricator_url: required("PHABRICATOR_URL")?,
            phabricator_token: required("PHABRICATOR_TOKEN")?,
            ssh_user: required("TRY_SSH_USER")?,
            ssh_key: required("TRY_SSH_KEY")?.replace("\\n", "\n"),
            repo_url: var("REPO_URL").unwrap_or_else(|| DEFAULT_REPO_URL.to_string()),
            repo_dir: required("REPO_DIR").map(PathBuf::from)?,
            try_url: var("TRY_URL").unwrap_or_else(|| DEFAULT_TRY_URL.to_string()),
            batch_size,
            publish,
            default_revision: var("DEFAULT_REVISION")
                .unwrap_or_else(|| DEFAULT_REVISION.to_string()),
            bot_user: var("BOT_USER").unwrap_or_else(|| DEFAULT_BOT_USER.to_string()),
        })
    }

    /// Settings the patch pipeline needs.
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            try_url: self.try_url.clone(),
            default_revision: self.default_revision.clone(),
            bot_user: self.bot_user.clone(),
            publish: self.publish,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("phabricator_url", &self.phabricator_url)
            .field("ssh_user", &self.ssh_user)
            .field("repo_url", &self.repo_url)
            .field("repo_dir", &self.repo_dir)
            .field("try_url", &self.try_url)
            .field("batch_size", &self.batch_size)
            .field("publish", &self.publish)
            .field("default_revision", &self.default_revision)
            .field("bot_user", &self.bot_user)
            .finish_non_exhaustive()
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
