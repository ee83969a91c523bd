//! Native git management using the `git2` crate.
//!
//! Wraps `libgit2` for the two ways a working copy is brought up to date:
//! a fresh (shallow when possible) clone of one branch, and a forced
//! fetch-and-reset of an existing checkout onto the remote branch tip.

use std::fs;
use std::path::{Path, PathBuf};

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{FetchOptions, RemoteCallbacks, Repository, ResetType};
use thiserror::Error;

const REMOTE: &str = "origin";

/// Errors that can occur during git operations
#[derive(Debug, Error)]
pub enum GitError {
    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Clone error: {0}")]
    Clone(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Checkout error: {0}")]
    Checkout(String),

    #[error("Reference not found: {0}")]
    RefNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Git2 error: {0}")]
    Git2(#[from] git2::Error),
}

/// Result type for git operations
pub type GitResult<T> = Result<T, GitError>;

/// Manages one working copy using native git bindings
pub struct GitManager {
    repo_path: PathBuf,
}

impl GitManager {
    /// Opens an existing working copy
    pub fn open(repo_path: impl AsRef<Path>) -> GitResult<Self> {
        let repo_path = repo_path.as_ref().to_path_buf();
        Repository::open(&repo_path).map_err(|e| {
            GitError::Repository(format!(
                "Failed to open repository at {}: {}",
                repo_path.display(),
                e
            ))
        })?;
        Ok(GitManager { repo_path })
    }

    /// Clones `branch` of `url` into `target_path`.
    ///
    /// Tries a shallow clone (depth=1) first and falls back to a full clone
    /// for transports that refuse shallow fetches.
    pub fn clone_branch(url: &str, branch: &str, target_path: impl AsRef<Path>) -> GitResult<Self> {
        let target_path = target_path.as_ref();
        if let Some(parent) = target_path.parent() {
            fs::create_dir_all(parent)?;
        }

        log::info!("[Git] [CLONE] {} ({}) -> {}", url, branch, target_path.display());

        if let Err(shallow_err) = Self::clone_with_depth(url, branch, target_path, Some(1)) {
            log::warn!("[Git] [CLONE] Shallow clone failed: {}", shallow_err);
            log::warn!("[Git] [CLONE] Falling back to standard (full) clone");
            // A failed clone may leave a partial directory behind
            if target_path.exists() {
                fs::remove_dir_all(target_path)?;
            }
            Self::clone_with_depth(url, branch, target_path, None)?;
        }

        log::info!("[Git] [CLONE] Clone completed");
        GitManager::open(target_path)
    }

    fn clone_with_depth(
        url: &str,
        branch: &str,
        target_path: &Path,
        depth: Option<i32>,
    ) -> GitResult<()> {
        let mut fetch_options = FetchOptions::new();
        if let Some(depth) = depth {
            fetch_options.depth(depth);
        }
        fetch_options.remote_callbacks(progress_callbacks());

        let mut builder = RepoBuilder::new();
        builder.branch(branch);
        builder.fetch_options(fetch_options);
        builder.clone(url, target_path).map_err(|e| {
            GitError::Clone(format!(
                "Failed to clone branch '{}' of {}: {}",
                branch, url, e
            ))
        })?;
        Ok(())
    }

    /// Forces the working copy to exactly match `origin/<branch>` of `url`.
    ///
    /// Fetches the branch, points the local branch at the remote tip, checks
    /// it out and hard-resets, deleting untracked and ignored files. Local
    /// commits and uncommitted changes are discarded. Returns the new HEAD id.
    pub fn sync_to_remote(&self, url: &str, branch: &str) -> GitResult<String> {
        let repo = self.repository()?;

        // Re-point origin if the configured repository changed
        match repo.find_remote(REMOTE) {
            Ok(remote) if remote.url() == Some(url) => {}
            Ok(_) => {
                log::info!("[Git] [SYNC] Re-pointing {} to {}", REMOTE, url);
                repo.remote_set_url(REMOTE, url)?;
            }
            Err(_) => {
                repo.remote(REMOTE, url)?;
            }
        }

        let refspec = format!("+refs/heads/{0}:refs/remotes/{1}/{0}", branch, REMOTE);
        {
            let mut remote = repo.find_remote(REMOTE)?;
            let mut fetch_options = FetchOptions::new();
            fetch_options.remote_callbacks(progress_callbacks());
            log::info!("[Git] [SYNC] Fetching {} from {}", branch, url);
            remote
                .fetch(&[refspec.as_str()], Some(&mut fetch_options), None)
                .map_err(|e| GitError::Fetch(format!("Fetch of '{}' failed: {}", branch, e)))?;
        }

        let tip = self.remote_tip_in(&repo, branch)?;
        let commit = repo.find_commit(tip)?;

        // Direct reference write: branch creation refuses to move a checked-out branch
        let local_ref = format!("refs/heads/{}", branch);
        repo.reference(&local_ref, tip, true, "provision: sync to remote tip")
            .map_err(|e| GitError::Checkout(format!("Failed to update {}: {}", local_ref, e)))?;
        repo.set_head(&local_ref)
            .map_err(|e| GitError::Checkout(format!("Failed to switch to {}: {}", branch, e)))?;

        let mut checkout = CheckoutBuilder::new();
        checkout.force().remove_untracked(true).remove_ignored(true);
        repo.reset(commit.as_object(), ResetType::Hard, Some(&mut checkout))
            .map_err(|e| GitError::Checkout(format!("Hard reset to {} failed: {}", tip, e)))?;

        if let Ok(mut local) = repo.find_branch(branch, git2::BranchType::Local) {
            if let Err(e) = local.set_upstream(Some(&format!("{}/{}", REMOTE, branch))) {
                log::warn!("[Git] [SYNC] Could not set upstream for {}: {}", branch, e);
            }
        }

        Ok(tip.to_string())
    }

    /// Commit id of `origin/<branch>` as last fetched
    pub fn remote_tip(&self, branch: &str) -> GitResult<String> {
        let repo = self.repository()?;
        Ok(self.remote_tip_in(&repo, branch)?.to_string())
    }

    fn remote_tip_in(&self, repo: &Repository, branch: &str) -> GitResult<git2::Oid> {
        let name = format!("refs/remotes/{}/{}", REMOTE, branch);
        let reference = repo
            .find_reference(&name)
            .map_err(|e| GitError::RefNotFound(format!("{}: {}", name, e)))?;
        let commit = reference
            .peel_to_commit()
            .map_err(|e| GitError::RefNotFound(format!("{} is not a commit: {}", name, e)))?;
        Ok(commit.id())
    }

    /// Gets the current HEAD commit hash
    pub fn get_head_commit(&self) -> GitResult<String> {
        let repo = self.repository()?;
        let head = repo
            .head()
            .map_err(|e| GitError::Repository(format!("Failed to read HEAD: {}", e)))?;
        let commit_id = head
            .target()
            .ok_or_else(|| GitError::Repository("HEAD is not a direct reference".to_string()))?;
        Ok(commit_id.to_string())
    }

    /// Name of the checked out branch, `None` when HEAD is detached
    pub fn current_branch(&self) -> GitResult<Option<String>> {
        let repo = self.repository()?;
        let head = repo
            .head()
            .map_err(|e| GitError::Repository(format!("Failed to read HEAD: {}", e)))?;
        if head.is_branch() {
            Ok(head.shorthand().map(str::to_string))
        } else {
            Ok(None)
        }
    }

    /// Returns the path to the repository
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    fn repository(&self) -> GitResult<Repository> {
        Repository::open(&self.repo_path)
            .map_err(|e| GitError::Repository(format!("Failed to open repository: {}", e)))
    }
}

fn progress_callbacks<'a>() -> RemoteCallbacks<'a> {
    let mut callbacks = RemoteCallbacks::new();
    let mut last_percent = u32::MAX;
    callbacks.transfer_progress(move |progress| {
        let total = progress.total_objects();
        if total > 0 {
            let percent = (progress.received_objects() as f32 / total as f32 * 100.0) as u32;
            // Log every 10% step only
            if percent / 10 != last_percent / 10 {
                last_percent = percent;
                log::debug!(
                    "[Git] [PROGRESS] {}/{} objects ({} indexed) - {}%",
                    progress.received_objects(),
                    total,
                    progress.indexed_objects(),
                    percent
                );
            }
        }
        true
    });
    callbacks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_nonexistent_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = GitManager::open(dir.path().join("missing"));
        assert!(matches!(result, Err(GitError::Repository(_))));
    }

    #[test]
    fn test_git_error_display() {
        let err = GitError::RefNotFound("refs/remotes/origin/main".to_string());
        assert_eq!(err.to_string(), "Reference not found: refs/remotes/origin/main");
    }
}
