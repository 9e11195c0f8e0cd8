//! Worktree Manager: isolated working-copy lifecycle.
//!
//! Creates `orch/issue-<N>` from the configured base branch and adds a git
//! worktree at `<basePath>/<repo>-<N>`. A write-through JSON registry at
//! `<project>/.orch/worktrees.json` maps ticket id to (path, branch,
//! created_at) so the manager can recover its bookkeeping across restarts
//! without a database.
//!
//! Git serializes worktree mutations on the shared object store with a lock
//! file, so all git-mutating operations here go through an internal mutex.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error("not a git repository: {0}")]
    NotAGitRepo(PathBuf),

    #[error("git command failed: {message}")]
    GitCommand {
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git {command} failed (exit {code}): {stderr}")]
    GitExit {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("failed to read or write worktree registry: {0}")]
    Registry(#[from] std::io::Error),

    #[error("failed to parse worktree registry: {0}")]
    RegistryFormat(#[from] serde_json::Error),
}

/// A single registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktreeRecord {
    pub ticket_id: u64,
    pub path: PathBuf,
    pub branch: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Registry {
    entries: BTreeMap<u64, WorktreeRecord>,
}

/// Manages git worktrees for ticket isolation, write-through to a JSON
/// registry document.
#[derive(Clone)]
pub struct WorktreeManager {
    repo_path: PathBuf,
    base_path: PathBuf,
    registry_path: PathBuf,
    git_lock: Arc<Mutex<()>>,
}

impl WorktreeManager {
    pub fn new(
        repo_path: impl Into<PathBuf>,
        base_path: impl Into<PathBuf>,
        registry_path: impl Into<PathBuf>,
    ) -> Result<Self, WorktreeError> {
        let repo_path = repo_path.into();

        let output = Command::new("git")
            .arg("rev-parse")
            .arg("--git-dir")
            .current_dir(&repo_path)
            .output()
            .map_err(|e| WorktreeError::GitCommand {
                message: "failed to run git rev-parse".into(),
                source: e,
            })?;
        if !output.status.success() {
            return Err(WorktreeError::NotAGitRepo(repo_path));
        }

        Ok(Self {
            repo_path,
            base_path: base_path.into(),
            registry_path: registry_path.into(),
            git_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Branch convention: `orch/issue-<N>`.
    pub fn branch_name(ticket_id: u64) -> String {
        format!("orch/issue-{ticket_id}")
    }

    fn worktree_path(&self, ticket_id: u64) -> PathBuf {
        let repo_name = self
            .repo_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("repo");
        self.base_path.join(format!("{repo_name}-{ticket_id}"))
    }

    fn load_registry(&self) -> Result<Registry, WorktreeError> {
        if !self.registry_path.exists() {
            return Ok(Registry::default());
        }
        let bytes = std::fs::read(&self.registry_path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn save_registry(&self, registry: &Registry) -> Result<(), WorktreeError> {
        if let Some(parent) = self.registry_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(registry)?;
        std::fs::write(&self.registry_path, bytes)?;
        Ok(())
    }

    /// Create an isolated worktree for `ticket_id` off `base_branch`.
    /// Idempotent: if the registry already has an entry and the path still
    /// exists on disk, returns it unchanged.
    pub fn create_worktree(
        &self,
        ticket_id: u64,
        base_branch: &str,
    ) -> Result<WorktreeRecord, WorktreeError> {
        let _lock = self.git_lock.lock();

        let mut registry = self.load_registry()?;
        if let Some(existing) = registry.entries.get(&ticket_id) {
            if existing.path.exists() {
                return Ok(existing.clone());
            }
        }

        let branch = Self::branch_name(ticket_id);
        let path = self.worktree_path(ticket_id);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        self.run_git(&["fetch", "origin", base_branch])?;

        let branch_exists = self.branch_exists(&branch)?;
        if branch_exists {
            self.run_git_in_repo(&["worktree", "add", path.to_str().unwrap_or_default(), &branch])?;
        } else {
            self.run_git_in_repo(&[
                "worktree",
                "add",
                "-b",
                &branch,
                path.to_str().unwrap_or_default(),
                &format!("origin/{base_branch}"),
            ])?;
        }

        let record = WorktreeRecord {
            ticket_id,
            path,
            branch,
            created_at: Utc::now(),
        };
        registry.entries.insert(ticket_id, record.clone());
        self.save_registry(&registry)?;

        Ok(record)
    }

    /// Look up the registry entry for a ticket without touching git.
    pub fn get(&self, ticket_id: u64) -> Result<Option<WorktreeRecord>, WorktreeError> {
        Ok(self.load_registry()?.entries.get(&ticket_id).cloned())
    }

    /// Remove the worktree for `ticket_id`: `git worktree remove --force`,
    /// clear the registry entry, delete any residual directory.
    pub fn remove_worktree(&self, ticket_id: u64) -> Result<(), WorktreeError> {
        let _lock = self.git_lock.lock();

        let mut registry = self.load_registry()?;
        let Some(record) = registry.entries.remove(&ticket_id) else {
            return Ok(());
        };

        if record.path.exists() {
            let output = Command::new("git")
                .args(["worktree", "remove", "--force"])
                .arg(&record.path)
                .current_dir(&self.repo_path)
                .output()
                .map_err(|e| WorktreeError::GitCommand {
                    message: "failed to run git worktree remove".into(),
                    source: e,
                })?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                if !stderr.contains("is not a working tree") {
                    let _ = std::fs::remove_dir_all(&record.path);
                }
            }
        }
        let _ = std::fs::remove_dir_all(&record.path);

        self.save_registry(&registry)?;
        Ok(())
    }

    pub fn branch_exists(&self, branch_name: &str) -> Result<bool, WorktreeError> {
        let output = Command::new("git")
            .args(["rev-parse", "--verify"])
            .arg(format!("refs/heads/{branch_name}"))
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| WorktreeError::GitCommand {
                message: "failed to run git rev-parse --verify".into(),
                source: e,
            })?;
        Ok(output.status.success())
    }

    fn run_git(&self, args: &[&str]) -> Result<(), WorktreeError> {
        self.run_git_in(&self.repo_path, args)
    }

    fn run_git_in_repo(&self, args: &[&str]) -> Result<(), WorktreeError> {
        self.run_git_in(&self.repo_path, args)
    }

    fn run_git_in(&self, dir: &Path, args: &[&str]) -> Result<(), WorktreeError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .map_err(|e| WorktreeError::GitCommand {
                message: format!("failed to run git {}", args.join(" ")),
                source: e,
            })?;
        if !output.status.success() {
            return Err(WorktreeError::GitExit {
                command: args.join(" "),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;
    use tempfile::TempDir;

    fn create_temp_repo() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let repo_path = dir.path().to_path_buf();
        let run = |args: &[&str]| {
            let output = StdCommand::new("git")
                .args(args)
                .current_dir(&repo_path)
                .output()
                .unwrap_or_else(|e| panic!("git {} failed: {e}", args.join(" ")));
            assert!(output.status.success(), "git {} failed", args.join(" "));
        };
        run(&["init", "-b", "main"]);
        run(&["config", "user.email", "test@orch.dev"]);
        run(&["config", "user.name", "Orch Test"]);
        std::fs::write(repo_path.join("README.md"), "# test\n").unwrap();
        run(&["add", "."]);
        run(&["commit", "-m", "initial"]);
        (dir, repo_path)
    }

    #[test]
    fn branch_name_follows_convention() {
        assert_eq!(WorktreeManager::branch_name(42), "orch/issue-42");
    }

    #[test]
    fn create_and_remove_is_idempotent() {
        let (_dir, repo_path) = create_temp_repo();
        let base = TempDir::new().unwrap();
        let registry = base.path().join("worktrees.json");
        let mgr = WorktreeManager::new(&repo_path, base.path().to_path_buf(), registry).unwrap();

        let branch = WorktreeManager::branch_name(7);
        StdCommand::new("git")
            .args(["branch", &branch])
            .current_dir(&repo_path)
            .output()
            .unwrap();
        StdCommand::new("git")
            .args(["remote", "add", "origin", repo_path.to_str().unwrap()])
            .current_dir(&repo_path)
            .output()
            .unwrap();

        let record = mgr.create_worktree(7, "main").unwrap();
        assert!(record.path.exists());
        assert_eq!(record.branch, "orch/issue-7");

        let again = mgr.create_worktree(7, "main").unwrap();
        assert_eq!(again, record);

        mgr.remove_worktree(7).unwrap();
        assert!(!record.path.exists());
        assert!(mgr.get(7).unwrap().is_none());

        mgr.remove_worktree(7).unwrap();
    }
}
