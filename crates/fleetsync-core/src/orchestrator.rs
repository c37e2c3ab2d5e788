//! Fleet synchronization: per-repository sync cycle and the fleet-wide
//! pass the scheduler fires.
//!
//! Repositories are processed strictly sequentially. Git operations
//! against one working copy must never overlap, and no locking protects
//! working copies from each other, so sequential execution is the
//! safety mechanism.

use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::config::{SettingsStore, SyncSettings};
use crate::domain::{RepoDescriptor, Result};
use crate::events::EventLog;
use crate::gitrepo::GitRepo;
use crate::netwait;
use crate::power::PowerGuard;
use crate::project;
use crate::upgrade::{UpgradeOutcome, Upgrader};

/// What one repository pass did. Transient git failures do not fail the
/// pass; they are recorded here so callers and tests can observe them.
#[derive(Debug, Clone, PartialEq)]
pub struct RepoOutcome {
    pub name: String,

    /// Whether the cycle ran to completion (path resolved, branches
    /// processed). Transient command failures leave this true.
    pub synced: bool,

    /// Branches processed, in order.
    pub branches: Vec<String>,

    /// Branches whose checkout reported a non-zero exit. Processing
    /// continues against whatever is checked out; recorded as a risk.
    pub failed_checkouts: Vec<String>,

    /// Branches auto-committed because the tree was dirty after the
    /// maintenance/upgrade step.
    pub auto_commits: Vec<String>,

    /// Branch where processing stopped because the tree stayed dirty
    /// (dirty state must not leak across a checkout boundary).
    pub dirty_stop: Option<String>,

    /// Result of the dependency upgrade step.
    pub upgrade: UpgradeOutcome,
}

impl RepoOutcome {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            synced: false,
            branches: Vec::new(),
            failed_checkouts: Vec::new(),
            auto_commits: Vec::new(),
            dirty_stop: None,
            upgrade: UpgradeOutcome::Skipped,
        }
    }
}

/// Drives the full sync cycle for single repositories and for the fleet.
pub struct SyncService {
    settings: SettingsStore,
    upgrader: Upgrader,
    log: EventLog,
    probe_attempts: u32,
}

impl SyncService {
    pub fn new(settings: SettingsStore, log: EventLog) -> Self {
        Self {
            upgrader: Upgrader::new(log.clone()),
            settings,
            log,
            probe_attempts: netwait::DEFAULT_ATTEMPTS,
        }
    }

    /// Use a custom upgrader (tests substitute trivial tool commands).
    pub fn with_upgrader(settings: SettingsStore, upgrader: Upgrader, log: EventLog) -> Self {
        Self {
            settings,
            upgrader,
            log,
            probe_attempts: netwait::DEFAULT_ATTEMPTS,
        }
    }

    /// Run the whole enabled fleet through one sync pass.
    ///
    /// The pass is bracketed by sleep prevention (restored on every exit
    /// path) and preceded by a network wait. A host-level error on one
    /// repository ends the pass early; the remaining repositories wait
    /// for the next scheduled run.
    pub async fn sync_repos(&self) -> Vec<RepoOutcome> {
        let set = self.settings.get().await;
        let repos = set.enabled_repos();
        let mut outcomes = Vec::new();
        if repos.is_empty() {
            info!("no enabled repositories, nothing to sync");
            return outcomes;
        }

        self.log.write("sync", "sync pass starting, preventing system sleep");
        let mut guard = PowerGuard::prevent();

        netwait::wait_for_network(&set.probe_host, self.probe_attempts).await;

        for repo in &repos {
            match self.process_repo(&set, repo).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    self.log.write(
                        "sync",
                        &format!("pass error on {}: {e}, skipping remaining repositories", repo.name),
                    );
                    break;
                }
            }
        }

        self.log.write("sync", "sync pass finished, restoring system sleep");
        guard.restore();
        outcomes
    }

    /// Run one repository through the sync cycle.
    ///
    /// Returns `Err` only for host-level failures (I/O); ordinary git
    /// command failures are recorded in the outcome and do not abort.
    pub async fn process_repo(
        &self,
        set: &SyncSettings,
        repo: &RepoDescriptor,
    ) -> Result<RepoOutcome> {
        let mut outcome = RepoOutcome::new(&repo.name);

        let path = repo.work_dir(&set.base_directory);
        if path.as_os_str().is_empty() || !path.is_dir() {
            self.log.write(
                "sync",
                &format!("{}: path error, {} is not a directory", repo.name, path.display()),
            );
            return Ok(outcome);
        }

        self.log.write("sync", &format!("syncing {}", path.display()));

        let mut gr = GitRepo::new(&repo.name, &path);
        gr.remove_stale_lock()?;

        gr.discover_branches().await;
        let current = gr.current_branch.clone();

        let branches = resolve_branches(&repo.branches, &gr.branches, current.as_deref());
        if !repo.branch_list().is_empty() {
            gr.branches = branches.clone();
        }

        let pinned_remotes = repo.remote_list();
        if !pinned_remotes.is_empty() {
            gr.remotes = pinned_remotes;
        } else {
            gr.discover_remotes().await;
        }

        info!(
            "[{}] branches {} remotes {}",
            repo.name,
            serde_json::to_string(&branches).unwrap_or_default(),
            serde_json::to_string(&gr.remotes).unwrap_or_default(),
        );

        let push_overrides = repo.push_remote_list();

        if branches.is_empty() {
            // No branch to pin down: treat the repository as one unit
            // against each remote's default upstream mapping.
            gr.pull_all("", repo.pull_remote.as_deref()).await;

            project::update_copyright_years(&path, &self.log);
            if repo.update_mode.upgrades() {
                outcome.upgrade = self.upgrader.update(repo, &path, &set.excludes).await;
            }

            gr.push_all("", push_overrides.as_deref()).await;
            outcome.synced = true;
            return Ok(outcome);
        }

        // The branch checked out before the run is processed first so
        // local edits land where they were made, and it is restored at
        // the end.
        let original = current.unwrap_or_else(|| branches[0].clone());

        for branch in &branches {
            self.log.write("sync", &format!("[{}] branch {branch}", repo.name));
            outcome.branches.push(branch.clone());

            if gr.checkout(branch).await != 0 {
                outcome.failed_checkouts.push(branch.clone());
            }

            gr.pull_all(branch, repo.pull_remote.as_deref()).await;

            if *branch == original {
                project::update_copyright_years(&path, &self.log);
                if repo.update_mode.upgrades() {
                    outcome.upgrade = self.upgrader.update(repo, &path, &set.excludes).await;
                }

                let changes = gr.status().await;
                if !changes.is_empty() {
                    self.log.write(
                        "sync",
                        &format!(
                            "[{}] branch {branch} has {} uncommitted files, committing",
                            repo.name,
                            changes.len()
                        ),
                    );
                    gr.commit(&format!("[{}] {branch} auto-commit", repo.name))
                        .await;
                    outcome.auto_commits.push(branch.clone());
                }
            }

            gr.push_all(branch, push_overrides.as_deref()).await;

            if !gr.status().await.is_empty() {
                warn!("[{}] tree still dirty on {branch}, stopping", repo.name);
                outcome.dirty_stop = Some(branch.clone());
                break;
            }
        }

        gr.checkout(&original).await;

        outcome.synced = true;
        Ok(outcome)
    }

    /// Scan the immediate subdirectories of `scan_dir` for working
    /// copies and append any missing ones to the fleet configuration.
    /// Returns the number of repositories added.
    pub async fn add_all(&self, scan_dir: &Path) -> Result<usize> {
        if !scan_dir.is_dir() {
            warn!("{} is not a directory", scan_dir.display());
            return Ok(0);
        }

        let set = self.settings.get().await;

        let mut entries: Vec<_> = fs::read_dir(scan_dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().join(".git").is_dir())
            .collect();
        entries.sort_by_key(|e| e.file_name());

        let mut added = Vec::new();
        for entry in entries {
            let name = entry.file_name().to_string_lossy().to_string();
            if set.repos.iter().any(|r| r.name == name) {
                continue;
            }

            let mut repo = RepoDescriptor::new(&name);
            let full = entry.path();
            // Leave the path implicit when it is the conventional spot.
            if full != set.base_directory.join(&name) {
                repo.path = Some(full);
            }
            self.log.write("sync", &format!("adding repository {name}"));
            added.push(repo);
        }

        let count = added.len();
        if count > 0 {
            self.settings.update(|s| s.repos.extend(added)).await?;
        }
        info!("added {count} repositories from {}", scan_dir.display());
        Ok(count)
    }
}

/// Resolve the branch selector into the processing list.
///
/// - explicit comma list: used verbatim, with the current branch moved
///   to the front when it is a member;
/// - `*`: every discovered branch, current branch first;
/// - empty: the current branch only (empty when it is unknown).
pub fn resolve_branches(
    selector: &str,
    discovered: &[String],
    current: Option<&str>,
) -> Vec<String> {
    let pinned = crate::domain::split_selector(selector);
    if !pinned.is_empty() {
        return front_load(pinned, current);
    }

    if selector.trim() == "*" {
        return front_load(discovered.to_vec(), current);
    }

    match current {
        Some(c) => vec![c.to_string()],
        None => Vec::new(),
    }
}

/// Move `current` to the front of `branches` when present.
fn front_load(mut branches: Vec<String>, current: Option<&str>) -> Vec<String> {
    if let Some(current) = current {
        if let Some(pos) = branches.iter().position(|b| b == current) {
            if pos > 0 {
                let branch = branches.remove(pos);
                branches.insert(0, branch);
            }
        }
    }
    branches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_selector_resolves_to_current_only() {
        let discovered = v(&["dev", "main"]);
        assert_eq!(
            resolve_branches("", &discovered, Some("main")),
            v(&["main"])
        );
        assert!(resolve_branches("", &discovered, None).is_empty());
    }

    #[test]
    fn test_wildcard_selector_puts_current_first() {
        let discovered = v(&["dev", "main", "feature"]);
        assert_eq!(
            resolve_branches("*", &discovered, Some("main")),
            v(&["main", "dev", "feature"])
        );
    }

    #[test]
    fn test_pinned_selector_is_verbatim_with_current_front() {
        let discovered = v(&["dev", "main", "feature"]);
        assert_eq!(
            resolve_branches("dev,main", &discovered, Some("main")),
            v(&["main", "dev"])
        );
        // current branch not pinned: list untouched, no insertion
        assert_eq!(
            resolve_branches("dev,main", &discovered, Some("feature")),
            v(&["dev", "main"])
        );
    }

    #[test]
    fn test_pinned_selector_current_already_first() {
        let discovered = v(&["dev", "main"]);
        assert_eq!(
            resolve_branches("dev,main", &discovered, Some("dev")),
            v(&["dev", "main"])
        );
    }
}
