//! Source Synchronizer
//!
//! Ensures the source directory holds a working copy of the configured branch
//! at the remote tip. A missing checkout is cloned; an existing one is fetched
//! and hard-reset, so **uncommitted local changes and untracked files in the
//! source directory are always discarded**. `--clean` removes the source and
//! build directories first.

pub mod git;

use std::fs;
use std::io;
use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::models::{short_id, Configuration, StageOutcome, WorkingCopyState};
use crate::system::probe::inspect_working_copy;
use git::GitManager;

/// Runs the blocking synchronization off the async executor.
pub async fn synchronize_source(
    config: &Configuration,
    state: &WorkingCopyState,
) -> Result<StageOutcome> {
    let config = config.clone();
    let state = state.clone();
    tokio::task::spawn_blocking(move || synchronize(&config, &state))
        .await
        .map_err(|e| PipelineError::source_sync(format!("synchronization task failed: {}", e), None))?
}

/// Clone or update-in-place, then check the postcondition.
pub fn synchronize(config: &Configuration, state: &WorkingCopyState) -> Result<StageOutcome> {
    let mut state = state.clone();

    if config.clean_build {
        for dir in [&config.source_dir, &config.build_dir] {
            remove_dir(dir)?;
        }
        state = WorkingCopyState::Absent;
    }

    let detail = match &state {
        WorkingCopyState::Absent => {
            GitManager::clone_branch(&config.repo_url, &config.branch, &config.source_dir)
                .map_err(|e| {
                    PipelineError::source_sync(
                        format!("clone of {} failed", config.repo_url),
                        Some(e.to_string()),
                    )
                })?;
            format!("cloned {} ({})", config.repo_url, config.branch)
        }
        WorkingCopyState::Foreign => {
            return Err(PipelineError::source_sync(
                format!(
                    "{} exists but is not a git working copy; re-run with --clean to replace it",
                    config.source_dir.display()
                ),
                None,
            ))
        }
        WorkingCopyState::Clean { .. } | WorkingCopyState::Dirty { .. } => {
            if let WorkingCopyState::Dirty { changes, .. } = &state {
                log::warn!(
                    "[Source] Discarding {} local change(s) in {}",
                    changes,
                    config.source_dir.display()
                );
            }
            let manager = GitManager::open(&config.source_dir)
                .map_err(|e| PipelineError::source_sync("cannot open working copy", Some(e.to_string())))?;
            manager
                .sync_to_remote(&config.repo_url, &config.branch)
                .map_err(|e| {
                    PipelineError::source_sync(
                        format!("update of {} to {} failed", config.source_dir.display(), config.branch),
                        Some(e.to_string()),
                    )
                })?;
            format!("fetched and reset to origin/{}", config.branch)
        }
    };

    let head = verify_checkout(config)?;
    log::info!("[Source] {} at {}", config.branch, short_id(&head));
    Ok(StageOutcome::succeeded(format!("{} at {}", detail, short_id(&head))))
}

/// Postcondition: on the requested branch, at the remote tip, nothing modified.
fn verify_checkout(config: &Configuration) -> Result<String> {
    let manager = GitManager::open(&config.source_dir)
        .map_err(|e| PipelineError::source_sync("working copy missing after sync", Some(e.to_string())))?;
    let tip = manager
        .remote_tip(&config.branch)
        .map_err(|e| PipelineError::source_sync("remote branch not found after sync", Some(e.to_string())))?;

    match inspect_working_copy(&config.source_dir)? {
        WorkingCopyState::Clean {
            branch: Some(branch),
            head,
        } if branch == config.branch && head == tip => Ok(head),
        other => Err(PipelineError::source_sync(
            format!(
                "working copy is not at origin/{} ({}) after sync: {}",
                config.branch,
                short_id(&tip),
                other
            ),
            None,
        )),
    }
}

fn remove_dir(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {
            log::warn!("[Source] Removed {} (--clean)", dir.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PipelineError::source_sync(
            format!("cannot remove {}: {}", dir.display(), e),
            None,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_dir_missing_is_ok() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(remove_dir(&dir.path().join("nope")).is_ok());
    }

    #[test]
    fn test_remove_dir_removes_tree() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("build/src");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("app"), "bin").unwrap();
        remove_dir(&dir.path().join("build")).unwrap();
        assert!(!dir.path().join("build").exists());
    }
}
