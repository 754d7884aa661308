//! [`GitWorkspace`] backed by the `git` executable.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::contract::GitWorkspace;
use crate::error::{SyncError, SyncResult};

/// Runs `git -C <repo_root> ...` for each operation.
#[derive(Debug, Clone)]
pub struct CommandGit {
    repo_root: PathBuf,
}

impl CommandGit {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    fn run(&self, args: &[&str]) -> SyncResult<()> {
        let command = args.first().copied().unwrap_or_default().to_string();
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo_root)
            .args(args)
            .output()
            .map_err(|e| {
                tracing::error!(command = %command, error = %e, "Failed to launch git");
                SyncError::Git {
                    command: command.clone(),
                    message: e.to_string(),
                }
            })?;

        if output.status.success() {
            tracing::debug!(args = ?args, repo = %self.repo_root.display(), "git succeeded");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        tracing::error!(
            args = ?args,
            repo = %self.repo_root.display(),
            status = ?output.status,
            stderr = %stderr,
            stdout = %stdout,
            "Git exited with non-zero code"
        );
        // `git commit` reports a clean tree on stdout.
        let message = [stderr, stdout]
            .into_iter()
            .find(|text| !text.is_empty())
            .unwrap_or_else(|| output.status.to_string());
        Err(SyncError::Git { command, message })
    }

    /// `path` as git sees it from inside `repo_root`.
    ///
    /// Working-tree paths are built by joining onto `repo_root`, so with a
    /// relative root they would otherwise resolve twice under `git -C`.
    fn pathspec<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.repo_root).unwrap_or(path)
    }
}

impl GitWorkspace for CommandGit {
    fn add(&self, path: &Path) -> SyncResult<()> {
        let path = self.pathspec(path).to_string_lossy();
        self.run(&["add", "--", &path])
    }

    fn commit(&self, message: &str) -> SyncResult<()> {
        self.run(&["commit", "-m", message])
    }

    fn checkout_branch(&self, branch: &str) -> SyncResult<()> {
        self.run(&["checkout", "-B", branch])
    }

    fn force_push(&self, remote: &str, branch: &str) -> SyncResult<()> {
        self.run(&["push", "-u", remote, branch, "--force"])
    }
}
