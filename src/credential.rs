//! Ephemeral SSH credential used to push to try.
//!
//! The private key is written to a `0600` temporary file when the credential
//! is created and removed when it is dropped or explicitly cleaned up. The
//! only thing the rest of the crate sees is the `ssh` command line that
//! points at the key file.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{info, warn};

/// Errors while materializing the SSH key.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The key material is empty.
    #[error("ssh key is empty")]
    EmptyKey,

    /// Writing the key to disk failed.
    #[error("failed to write ssh key: {0}")]
    Io(#[from] std::io::Error),
}

/// An SSH private key on disk plus the `ssh` command that uses it.
pub struct SshCredential {
    key_file: Option<NamedTempFile>,
    key_path: PathBuf,
    ssh_command: String,
}

impl SshCredential {
    /// Writes `key` to a fresh temporary file in the system temp directory.
    pub fn new(user: &str, key: &str) -> Result<Self, CredentialError> {
        Self::new_in(std::env::temp_dir(), user, key)
    }

    /// Writes `key` to a fresh temporary file inside `dir`.
    pub fn new_in(dir: impl AsRef<Path>, user: &str, key: &str) -> Result<Self, CredentialError> {
        if key.trim().is_empty() {
            return Err(CredentialError::EmptyKey);
        }

        let mut key_file = tempfile::Builder::new()
            .prefix("try-push-")
            .suffix(".key")
            .tempfile_in(dir)?;
        key_file.write_all(key.as_bytes())?;
        // ssh refuses keys without a trailing newline
        if !key.ends_with('\n') {
            key_file.write_all(b"\n")?;
        }
        key_file.flush()?;

        let key_path = key_file.path().to_path_buf();
        let ssh_command = ssh_command(user, &key_path);

        Ok(SshCredential {
            key_file: Some(key_file),
            key_path,
            ssh_command,
        })
    }

    /// The `ssh` command line to pass to `hg push --ssh`.
    pub fn ssh_command(&self) -> &str {
        &self.ssh_command
    }

    /// Deletes the key file. Safe to call more than once.
    pub fn cleanup(&mut self) {
        let Some(key_file) = self.key_file.take() else {
            return;
        };
        match key_file.close() {
            Ok(()) => info!("Removed ssh key"),
            Err(e) => warn!(path = %self.key_path.display(), error = %e, "failed to remove ssh key"),
        }
    }

    /// Returns true while the key file is still on disk.
    pub fn is_active(&self) -> bool {
        self.key_file.is_some()
    }
}

impl Drop for SshCredential {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl std::fmt::Debug for SshCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshCredential")
            .field("key_path", &self.key_path)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// Builds `ssh -o StrictHostKeyChecking="no" -o User="..." -o IdentityFile="..."`.
fn ssh_command(user: &str, key_path: &Path) -> String {
    let options = [
        ("StrictHostKeyChecking", "no".to_string()),
        ("User", user.to_string()),
        ("IdentityFile", key_path.display().to_string()),
    ];
    let options: Vec<String> = options
        .iter()
        .map(|(k, v)| format!("-o {}=\"{}\"", k, v))
        .collect();
    format!("ssh {}", options.join(" "))
}
