//! Dependency upgrades with a build-verify/rollback gate.
//!
//! The upgrader shells out to cargo-edit's `cargo upgrade` to bring a
//! working copy's dependencies up to date, then builds the crate. A
//! clean build commits the upgrade; a failing build hard-resets the
//! working copy so a broken upgrade can never reach a remote.

use std::path::Path;

use regex::{Regex, RegexBuilder};
use tokio::sync::OnceCell;
use tracing::warn;

use crate::domain::{RepoDescriptor, UpdateMode};
use crate::events::EventLog;
use crate::process;

/// Commands and timeouts used by the upgrader. Overridable so tests can
/// substitute trivial commands for the real tools.
#[derive(Debug, Clone)]
pub struct UpgradeTools {
    /// Dry-run listing of pending upgrades, stable versions only.
    pub list_outdated: Vec<String>,

    /// Non-interactive upgrade to latest stable versions.
    pub upgrade_stable: Vec<String>,

    /// Aggressive upgrade, pinned dependencies included.
    pub upgrade_full: Vec<String>,

    /// Flag that excludes one package from an upgrade run.
    pub exclude_flag: String,

    /// Build command used to verify the upgrade.
    pub build: Vec<String>,

    pub upgrade_timeout_ms: u64,
    pub build_timeout_ms: u64,

    /// Listing of globally installed tools, and the marker line that
    /// proves the upgrade tool is present.
    pub tool_check: Vec<String>,
    pub tool_marker: String,
    pub tool_install: Vec<String>,
}

impl Default for UpgradeTools {
    fn default() -> Self {
        let s = |v: &[&str]| v.iter().map(|s| s.to_string()).collect();
        Self {
            list_outdated: s(&["cargo", "upgrade", "--dry-run", "--incompatible"]),
            upgrade_stable: s(&["cargo", "upgrade", "--incompatible"]),
            upgrade_full: s(&["cargo", "upgrade", "--incompatible", "--pinned"]),
            exclude_flag: "--exclude".to_string(),
            build: s(&["cargo", "build"]),
            upgrade_timeout_ms: 120_000,
            build_timeout_ms: 300_000,
            tool_check: s(&["cargo", "install", "--list"]),
            tool_marker: "cargo-edit".to_string(),
            tool_install: s(&["cargo", "install", "cargo-edit"]),
        }
    }
}

/// What the upgrade pass did to the working copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// Upgrade mode is `none`; nothing ran.
    Skipped,
    /// Build verified, changes committed.
    Committed,
    /// Build failed, working copy hard-reset.
    RolledBack,
}

/// Dependency upgrader for the fleet. One instance per process; the
/// tool-presence check runs once, before the first upgrade.
pub struct Upgrader {
    tools: UpgradeTools,
    tool_checked: OnceCell<()>,
    log: EventLog,
}

impl Upgrader {
    pub fn new(log: EventLog) -> Self {
        Self::with_tools(UpgradeTools::default(), log)
    }

    pub fn with_tools(tools: UpgradeTools, log: EventLog) -> Self {
        Self {
            tools,
            tool_checked: OnceCell::new(),
            log,
        }
    }

    /// Upgrade `repo`'s dependencies at `path` according to its update
    /// mode, then build and commit-or-rollback.
    pub async fn update(
        &self,
        repo: &RepoDescriptor,
        path: &Path,
        excludes: &str,
    ) -> UpgradeOutcome {
        if !repo.update_mode.upgrades() {
            return UpgradeOutcome::Skipped;
        }

        self.ensure_tool().await;

        match repo.update_mode {
            UpdateMode::None => return UpgradeOutcome::Skipped,
            UpdateMode::Default => {
                self.shell(&self.tools.upgrade_stable, path, self.tools.upgrade_timeout_ms)
                    .await;
            }
            UpdateMode::Exclude => {
                let excluded = self.resolve_excluded(path, excludes).await;
                if excluded.is_empty() {
                    self.shell(&self.tools.upgrade_stable, path, self.tools.upgrade_timeout_ms)
                        .await;
                } else {
                    let mut cmd = self.tools.upgrade_stable.clone();
                    for pkg in excluded {
                        cmd.push(self.tools.exclude_flag.clone());
                        cmd.push(pkg);
                    }
                    self.shell(&cmd, path, self.tools.upgrade_timeout_ms).await;
                }
            }
            UpdateMode::Full => {
                self.shell(&self.tools.upgrade_full, path, self.tools.upgrade_timeout_ms)
                    .await;
            }
        }

        // Build regardless of how the upgrade went: only a verified tree
        // may be committed.
        let code = self
            .shell(&self.tools.build, path, self.tools.build_timeout_ms)
            .await;

        if code == 0 {
            self.log
                .write("upgrader", &format!("{} build passed, committing", repo.name));
            process::shell(
                "git",
                &["commit", "-a", "-m", "Upgrade dependencies"],
                Some(path),
                15_000,
            )
            .await;
            UpgradeOutcome::Committed
        } else {
            self.log.write(
                "upgrader",
                &format!("{} build error (exit {code}), rolling back", repo.name),
            );
            process::shell("git", &["reset", "--hard"], Some(path), 15_000).await;
            UpgradeOutcome::RolledBack
        }
    }

    /// Dry-run the upgrade listing and keep the package names matched by
    /// the configured exclude patterns.
    async fn resolve_excluded(&self, path: &Path, excludes: &str) -> Vec<String> {
        let patterns = compile_excludes(excludes);
        if patterns.is_empty() {
            return Vec::new();
        }

        let Some((cmd, rest)) = self.tools.list_outdated.split_first() else {
            return Vec::new();
        };
        let args: Vec<&str> = rest.iter().map(String::as_str).collect();
        let output = process::capture(cmd, &args, Some(path), self.tools.upgrade_timeout_ms)
            .await
            .unwrap_or_default();

        outdated_packages(&output)
            .into_iter()
            .filter(|name| patterns.iter().any(|re| re.is_match(name)))
            .collect()
    }

    /// Install the upgrade tool when the installed-tool listing does not
    /// mention it. Runs at most once per process lifetime.
    async fn ensure_tool(&self) {
        self.tool_checked
            .get_or_init(|| async {
                let Some((cmd, rest)) = self.tools.tool_check.split_first() else {
                    return;
                };
                let args: Vec<&str> = rest.iter().map(String::as_str).collect();
                let listing = process::capture(cmd, &args, None, 30_000)
                    .await
                    .unwrap_or_default();

                let present = listing
                    .lines()
                    .any(|l| l.trim_start().starts_with(&self.tools.tool_marker));
                if !present {
                    self.log.write(
                        "upgrader",
                        &format!("installing {}", self.tools.tool_marker),
                    );
                    self.shell(&self.tools.tool_install, Path::new("."), 300_000)
                        .await;
                }
            })
            .await;
    }

    async fn shell(&self, cmd: &[String], path: &Path, timeout_ms: u64) -> i32 {
        let Some((bin, args)) = cmd.split_first() else {
            warn!("empty upgrade command");
            return process::EXIT_HOST_FAILURE;
        };
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        process::shell(bin, &args, Some(path), timeout_ms).await
    }
}

/// Extract package names from an upgrade dry-run listing: every line
/// carrying an upgrade arrow contributes its leading token.
pub fn outdated_packages(output: &str) -> Vec<String> {
    let mut packages = Vec::new();

    for line in output.lines() {
        if !line.contains("->") {
            continue;
        }
        let line = line.trim();
        let Some(p) = line.find(' ') else {
            continue;
        };
        let name = line[..p].trim();
        if !name.is_empty() && !packages.iter().any(|n| n == name) {
            packages.push(name.to_string());
        }
    }

    packages
}

/// Compile a comma-separated exclude list into anchored,
/// case-insensitive matchers. `*` is a wildcard; everything else is
/// literal. Unparseable patterns are dropped with a warning.
pub fn compile_excludes(excludes: &str) -> Vec<Regex> {
    excludes
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|pattern| {
            let escaped = regex::escape(pattern).replace(r"\*", ".*");
            match RegexBuilder::new(&format!("^{escaped}$"))
                .case_insensitive(true)
                .build()
            {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("dropping exclude pattern {pattern:?}: {e}");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outdated_packages_requires_arrow() {
        let output = "\
name old req compatible latest new req\n\
serde 1.0.100 -> 1.0.200\n\
tokio 1.35.0 -> 1.40.0\n\
unchanged 2.0.0\n";
        assert_eq!(outdated_packages(output), vec!["serde", "tokio"]);
    }

    #[test]
    fn test_outdated_packages_skips_nameless_lines() {
        assert!(outdated_packages("->\n").is_empty());
        assert!(outdated_packages("").is_empty());
    }

    #[test]
    fn test_compile_excludes_wildcards_and_case() {
        let patterns = compile_excludes("serde*, Tokio");
        assert_eq!(patterns.len(), 2);
        assert!(patterns[0].is_match("serde_json"));
        assert!(patterns[0].is_match("serde"));
        assert!(!patterns[0].is_match("notserde"));
        assert!(patterns[1].is_match("tokio"));
        assert!(!patterns[1].is_match("tokio-util"));
    }

    #[test]
    fn test_compile_excludes_empty() {
        assert!(compile_excludes("").is_empty());
        assert!(compile_excludes(" , ").is_empty());
    }

    #[test]
    fn test_exclude_filtering() {
        let output = "serde 1.0 -> 1.1\ntokio 1.35 -> 1.40\nanyhow 1.0 -> 1.1\n";
        let patterns = compile_excludes("serde*,anyhow");
        let excluded: Vec<String> = outdated_packages(output)
            .into_iter()
            .filter(|name| patterns.iter().any(|re| re.is_match(name)))
            .collect();
        assert_eq!(excluded, vec!["serde", "anyhow"]);
    }
}
