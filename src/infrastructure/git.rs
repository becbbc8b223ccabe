//! Git command lines used by the checkout stage

use crate::executor::Invocation;
use std::path::{Path, PathBuf};

/// Builds git invocations for one working copy
#[derive(Debug, Clone)]
pub struct GitCli {
    workdir: PathBuf,
}

impl GitCli {
    /// Git operations on the working copy at `workdir`
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// True if `workdir` already holds a clone
    #[must_use]
    pub fn is_clone(&self) -> bool {
        self.workdir.join(".git").exists()
    }

    /// Working copy location
    #[must_use]
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Single-branch clone into the working copy
    #[must_use]
    pub fn clone_branch(&self, url: &str, branch: &str) -> Invocation {
        Invocation::new("git")
            .args(["clone", "--branch", branch, "--single-branch", url])
            .arg(self.workdir.to_string_lossy())
    }

    /// Fetches `branch` from origin
    #[must_use]
    pub fn fetch(&self, branch: &str) -> Invocation {
        self.in_workdir(["fetch", "origin", branch])
    }

    /// Resets the local branch to the fetched one
    #[must_use]
    pub fn checkout(&self, branch: &str) -> Invocation {
        let upstream = format!("origin/{branch}");
        self.in_workdir(["checkout", "-B", branch, upstream.as_str()])
    }

    /// Short hash of `HEAD`
    #[must_use]
    pub fn head_commit(&self) -> Invocation {
        self.in_workdir(["rev-parse", "--short", "HEAD"])
    }

    fn in_workdir<'a>(&self, args: impl IntoIterator<Item = &'a str>) -> Invocation {
        Invocation::new("git").args(args).cwd(&self.workdir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_clone_command() {
        let git = GitCli::new("workspace");
        assert_eq!(
            git.clone_branch("https://example.com/app.git", "develop")
                .command_line(),
            "git clone --branch develop --single-branch https://example.com/app.git workspace"
        );
    }

    #[test]
    fn test_update_commands_run_in_workdir() {
        let git = GitCli::new("/srv/ws");
        let checkout = git.checkout("staging");

        assert_eq!(checkout.command_line(), "git checkout -B staging origin/staging");
        assert_eq!(checkout.cwd.as_deref(), Some(Path::new("/srv/ws")));
        assert_eq!(git.fetch("staging").command_line(), "git fetch origin staging");
    }

    #[test]
    fn test_is_clone() {
        let dir = TempDir::new().unwrap();
        let git = GitCli::new(dir.path());
        assert!(!git.is_clone());

        std::fs::create_dir(dir.path().join(".git")).unwrap();
        assert!(git.is_clone());
    }
}
