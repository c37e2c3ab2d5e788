//! Repository descriptor: the configuration entity for one working copy.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Policy for auto-upgrading a repository's crate dependencies.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Leave dependencies alone.
    #[default]
    None,

    /// Upgrade to latest stable versions, honoring the configured
    /// exclude patterns.
    Default,

    /// Upgrade to latest stable versions, first resolving which packages
    /// the exclude patterns actually match via a dry run.
    Exclude,

    /// Upgrade everything, including pinned dependencies.
    Full,
}

impl UpdateMode {
    /// Whether this mode performs any upgrade at all.
    pub fn upgrades(&self) -> bool {
        !matches!(self, UpdateMode::None)
    }
}

/// One repository in the fleet configuration.
///
/// Selector fields follow a compact string convention: empty means
/// "the default scope", `*` means "everything", and a comma list pins an
/// explicit set. See [`RepoDescriptor::branch_list`] and
/// [`RepoDescriptor::remote_list`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepoDescriptor {
    /// Repository name; doubles as the directory name under the base
    /// directory when `path` is not set.
    pub name: String,

    /// Whether the scheduler should process this repository.
    #[serde(default)]
    pub enable: bool,

    /// Working copy path. Defaults to `<base_directory>/<name>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Branch selector: empty = current branch only, `*` = all local
    /// branches, comma list = explicit set.
    #[serde(default)]
    pub branches: String,

    /// Remote selector: empty or `*` = all remotes, comma list =
    /// explicit set.
    #[serde(default)]
    pub remotes: String,

    /// When set, pull only from this remote (default upstream mapping).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_remote: Option<String>,

    /// When set, push only to these remotes (comma list).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_remotes: Option<String>,

    /// Dependency upgrade policy.
    #[serde(default)]
    pub update_mode: UpdateMode,
}

impl RepoDescriptor {
    /// Create an enabled descriptor with default selectors.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enable: true,
            path: None,
            branches: String::new(),
            remotes: String::new(),
            pull_remote: None,
            push_remotes: None,
            update_mode: UpdateMode::None,
        }
    }

    /// Resolve the working copy path against the fleet base directory.
    pub fn work_dir(&self, base: &Path) -> PathBuf {
        match &self.path {
            Some(p) => p.clone(),
            None => base.join(&self.name),
        }
    }

    /// The pinned branch list, without wildcard handling. Empty for an
    /// empty or `*` selector.
    pub fn branch_list(&self) -> Vec<String> {
        split_selector(&self.branches)
    }

    /// The pinned remote list. Empty for an empty or `*` selector.
    pub fn remote_list(&self) -> Vec<String> {
        split_selector(&self.remotes)
    }

    /// The push-remote override list, if configured.
    pub fn push_remote_list(&self) -> Option<Vec<String>> {
        self.push_remotes.as_deref().map(split_selector)
    }
}

/// Split a comma selector into trimmed, non-empty entries. A lone `*`
/// (wildcard) yields an empty list, same as an empty selector.
pub fn split_selector(selector: &str) -> Vec<String> {
    let items: Vec<String> = selector
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if items.len() == 1 && items[0] == "*" {
        return Vec::new();
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_selector_variants() {
        assert!(split_selector("").is_empty());
        assert!(split_selector("*").is_empty());
        assert_eq!(split_selector("dev,main"), vec!["dev", "main"]);
        assert_eq!(split_selector(" dev , main ,"), vec!["dev", "main"]);
    }

    #[test]
    fn test_work_dir_defaults_to_base() {
        let repo = RepoDescriptor::new("lib");
        assert_eq!(
            repo.work_dir(Path::new("/repos")),
            PathBuf::from("/repos/lib")
        );

        let mut pinned = RepoDescriptor::new("lib");
        pinned.path = Some(PathBuf::from("/elsewhere/lib"));
        assert_eq!(
            pinned.work_dir(Path::new("/repos")),
            PathBuf::from("/elsewhere/lib")
        );
    }

    #[test]
    fn test_update_mode_serde_snake_case() {
        let json = serde_json::to_string(&UpdateMode::Exclude).expect("serialize");
        assert_eq!(json, "\"exclude\"");
        let mode: UpdateMode = serde_json::from_str("\"full\"").expect("deserialize");
        assert_eq!(mode, UpdateMode::Full);
    }

    #[test]
    fn test_update_mode_upgrades() {
        assert!(!UpdateMode::None.upgrades());
        assert!(UpdateMode::Default.upgrades());
        assert!(UpdateMode::Exclude.upgrades());
        assert!(UpdateMode::Full.upgrades());
    }
}
