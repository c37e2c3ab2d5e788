//! Git repository client: state and operations for one working copy.
//!
//! Everything shells out to the installed `git` client through the
//! process primitives. Discovery and status calls run with a short
//! timeout and degrade to empty results on failure; checkout/pull/push
//! stream their output to the log and report failures without raising,
//! so a broken remote never takes down a fleet pass.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::process;

/// Timeout for branch/remote listing and status queries.
const QUERY_TIMEOUT_MS: u64 = 3_000;

/// Timeout for checkout, pull, and push.
const SYNC_TIMEOUT_MS: u64 = 60_000;

/// Timeout for commit.
const COMMIT_TIMEOUT_MS: u64 = 30_000;

/// One uncommitted change as reported by the short status format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEntry {
    /// Single-character status code.
    pub code: char,
    /// Repository-relative path, quotes stripped.
    pub path: String,
}

/// Uncommitted changes in reported order, paths unique.
pub type ChangeSet = Vec<ChangeEntry>;

/// Client for one local working copy.
#[derive(Debug, Clone)]
pub struct GitRepo {
    pub name: String,
    pub path: PathBuf,
    /// Branch that was checked out when discovery ran.
    pub current_branch: Option<String>,
    /// Local branches, discovery order. Empty until discovered or pinned.
    pub branches: Vec<String>,
    /// Remote names, discovery order. Empty until discovered or pinned.
    pub remotes: Vec<String>,
}

impl GitRepo {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            current_branch: None,
            branches: Vec::new(),
            remotes: Vec::new(),
        }
    }

    fn dir(&self) -> Option<&Path> {
        Some(self.path.as_path())
    }

    /// List local branches and record the currently checked-out one.
    /// Command failure yields an empty list.
    pub async fn discover_branches(&mut self) -> Vec<String> {
        let output = process::capture("git", &["branch"], self.dir(), QUERY_TIMEOUT_MS)
            .await
            .unwrap_or_default();

        let (branches, current) = parse_branches(&output);
        self.branches = branches;
        if current.is_some() {
            self.current_branch = current;
        }
        self.branches.clone()
    }

    /// List remote names from the remote-branch listing. Command failure
    /// yields an empty list.
    pub async fn discover_remotes(&mut self) -> Vec<String> {
        let output = process::capture("git", &["branch", "-r"], self.dir(), QUERY_TIMEOUT_MS)
            .await
            .unwrap_or_default();

        self.remotes = parse_remotes(&output);
        self.remotes.clone()
    }

    /// Switch the working copy to `branch`. Failure is logged, not
    /// raised; callers proceed against whatever branch is checked out.
    pub async fn checkout(&self, branch: &str) -> i32 {
        let code = process::shell("git", &["checkout", branch], self.dir(), SYNC_TIMEOUT_MS).await;
        if code != 0 {
            warn!("[{}] checkout {branch} failed with code {code}", self.name);
        }
        code
    }

    /// Pull `branch` from `remote`. An empty branch pulls the remote's
    /// default upstream mapping.
    pub async fn pull(&self, remote: &str, branch: &str) -> i32 {
        let mut args = vec!["pull", "-v", remote];
        if !branch.is_empty() {
            args.push(branch);
        }
        process::shell("git", &args, self.dir(), SYNC_TIMEOUT_MS).await
    }

    /// Push `branch` to `remote`. An empty branch pushes the remote's
    /// default upstream mapping.
    pub async fn push(&self, remote: &str, branch: &str) -> i32 {
        let mut args = vec!["push", "-v", remote];
        if !branch.is_empty() {
            args.push(branch);
        }
        process::shell("git", &args, self.dir(), SYNC_TIMEOUT_MS).await
    }

    /// Pull `branch` from every known remote, or only from an override
    /// remote (against its default upstream mapping) when one is pinned.
    pub async fn pull_all(&mut self, branch: &str, override_remote: Option<&str>) {
        if let Some(remote) = override_remote {
            self.pull(remote, "").await;
            return;
        }

        if self.remotes.is_empty() {
            self.discover_remotes().await;
        }
        for remote in self.remotes.clone() {
            self.pull(&remote, branch).await;
        }
    }

    /// Push `branch` to every known remote, or only to the override
    /// remotes when a list is pinned.
    pub async fn push_all(&mut self, branch: &str, override_remotes: Option<&[String]>) {
        if let Some(remotes) = override_remotes {
            for remote in remotes {
                self.push(remote, "").await;
            }
            return;
        }

        if self.remotes.is_empty() {
            self.discover_remotes().await;
        }
        for remote in self.remotes.clone() {
            self.push(&remote, branch).await;
        }
    }

    /// Uncommitted changes per the short status format. Command failure
    /// yields an empty set.
    pub async fn status(&self) -> ChangeSet {
        let output = process::capture("git", &["status", "-s"], self.dir(), QUERY_TIMEOUT_MS)
            .await
            .unwrap_or_default();
        parse_status(&output)
    }

    /// Commit all tracked changes. Failure is logged only.
    pub async fn commit(&self, message: &str) -> i32 {
        let code = process::shell(
            "git",
            &["commit", "-a", "-m", message],
            self.dir(),
            COMMIT_TIMEOUT_MS,
        )
        .await;
        if code != 0 {
            warn!("[{}] commit failed with code {code}", self.name);
        }
        code
    }

    /// Delete a stale `.git/index.lock` left behind by a killed process.
    pub fn remove_stale_lock(&self) -> std::io::Result<()> {
        let lock = self.path.join(".git").join("index.lock");
        if lock.exists() {
            info!("[{}] removing stale {}", self.name, lock.display());
            std::fs::remove_file(&lock)?;
        }
        Ok(())
    }
}

/// Parse `git branch` output: one branch per line, `*` marking the
/// currently checked-out branch. Returns the distinct branch list in
/// first-occurrence order plus the current branch, if any.
pub fn parse_branches(output: &str) -> (Vec<String>, Option<String>) {
    let mut branches = Vec::new();
    let mut current = None;

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let name = match line.strip_prefix('*') {
            Some(rest) => {
                let name = rest.trim().to_string();
                current = Some(name.clone());
                name
            }
            None => line.to_string(),
        };

        if !branches.contains(&name) {
            branches.push(name);
        }
    }

    (branches, current)
}

/// Parse `git branch -r` output into the distinct set of remote names:
/// the substring before the first `/` on each line, first-occurrence
/// order preserved.
pub fn parse_remotes(output: &str) -> Vec<String> {
    let mut remotes = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if let Some(p) = line.find('/') {
            if p > 0 {
                let name = line[..p].trim().to_string();
                if !remotes.contains(&name) {
                    remotes.push(name);
                }
            }
        }
    }

    remotes
}

/// Parse `git status -s` output. Each non-blank line is
/// `<code><space><path>`; lines without a space separator are skipped,
/// quotes around the path are stripped, duplicate paths keep their first
/// entry.
pub fn parse_status(output: &str) -> ChangeSet {
    let mut changes: ChangeSet = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some(p) = line.find(' ') else {
            continue;
        };

        let Some(code) = line[..p].chars().next() else {
            continue;
        };
        let path = line[p + 1..].trim().trim_matches('"').to_string();
        if path.is_empty() {
            continue;
        }

        if !changes.iter().any(|c| c.path == path) {
            changes.push(ChangeEntry { code, path });
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    #[test]
    fn test_parse_branches_marks_current_once() {
        let output = "  dev\n* main\n  feature/x\n";
        let (branches, current) = parse_branches(output);
        assert_eq!(branches, vec!["dev", "main", "feature/x"]);
        assert_eq!(current.as_deref(), Some("main"));
    }

    #[test]
    fn test_parse_branches_dedupes() {
        let output = "  dev\n  dev\n* main\n";
        let (branches, _) = parse_branches(output);
        assert_eq!(branches, vec!["dev", "main"]);
    }

    #[test]
    fn test_parse_branches_empty_output() {
        let (branches, current) = parse_branches("");
        assert!(branches.is_empty());
        assert!(current.is_none());
    }

    #[test]
    fn test_parse_remotes_distinct_first_occurrence() {
        let output = "  origin/main\n  origin/dev\n  mirror/main\n  origin/HEAD -> origin/main\n";
        assert_eq!(parse_remotes(output), vec!["origin", "mirror"]);
    }

    #[test]
    fn test_parse_remotes_skips_lines_without_slash() {
        assert!(parse_remotes("no-slash-here\n\n").is_empty());
    }

    #[test]
    fn test_parse_status_codes_and_quoted_paths() {
        let output = " M src/lib.rs\n?? \"has space.txt\"\nA  new.rs\n";
        let changes = parse_status(output);
        assert_eq!(changes.len(), 3);
        assert_eq!(changes[0].code, 'M');
        assert_eq!(changes[0].path, "src/lib.rs");
        assert_eq!(changes[1].code, '?');
        assert_eq!(changes[1].path, "has space.txt");
        assert_eq!(changes[2].code, 'A');
        assert_eq!(changes[2].path, "new.rs");
    }

    #[test]
    fn test_parse_status_skips_malformed_lines() {
        let output = "nospace\n M ok.rs\n";
        let changes = parse_status(output);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "ok.rs");
    }

    #[test]
    fn test_parse_status_unique_paths() {
        let output = " M twice.rs\n?? twice.rs\n";
        let changes = parse_status(output);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].code, 'M');
    }

    fn run_git(repo_dir: &Path, args: &[&str]) {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn make_git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        run_git(dir.path(), &["commit", "--allow-empty", "-m", "initial"]);
        run_git(dir.path(), &["branch", "-M", "main"]);
        dir
    }

    #[tokio::test]
    async fn test_discover_branches_on_real_repo() {
        let dir = make_git_repo();
        let mut repo = GitRepo::new("fixture", dir.path());
        let branches = repo.discover_branches().await;
        assert_eq!(branches, vec!["main"]);
        assert_eq!(repo.current_branch.as_deref(), Some("main"));
    }

    #[tokio::test]
    async fn test_discover_branches_outside_repo_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = GitRepo::new("none", dir.path());
        assert!(repo.discover_branches().await.is_empty());
        assert!(repo.current_branch.is_none());
    }

    #[tokio::test]
    async fn test_status_reports_dirty_tree() {
        let dir = make_git_repo();
        std::fs::write(dir.path().join("new.txt"), "hello").unwrap();
        let repo = GitRepo::new("fixture", dir.path());
        let changes = repo.status().await;
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "new.txt");
        assert_eq!(changes[0].code, '?');
    }

    #[tokio::test]
    async fn test_remove_stale_lock() {
        let dir = make_git_repo();
        let lock = dir.path().join(".git").join("index.lock");
        std::fs::write(&lock, "").unwrap();
        let repo = GitRepo::new("fixture", dir.path());
        repo.remove_stale_lock().unwrap();
        assert!(!lock.exists());
        // idempotent when no lock exists
        repo.remove_stale_lock().unwrap();
    }
}
