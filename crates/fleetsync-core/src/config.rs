//! Fleet configuration: the settings entity, TOML persistence, and the
//! shared store with change notification.
//!
//! On disk the settings live in `config.toml` under the fleetsync config
//! home:
//!
//! Linux   :   $XDG_CONFIG_HOME/fleetsync or $HOME/.config/fleetsync
//! macOS   :   $HOME/Library/Application Support/fleetsync
//! Windows :   %AppData%\Roaming\fleetsync
//!
//! Override with the FLEETSYNC_CONFIG_HOME environment variable.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tracing::info;

use crate::domain::{RepoDescriptor, Result};

/// Fleet-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncSettings {
    /// Directory that holds working copies named after their repository.
    pub base_directory: PathBuf,

    /// Cron expressions controlling scheduled runs, semicolon-separated.
    /// Empty falls back to an hourly timer.
    pub crons: String,

    /// Timestamp of the last completed sync pass. Used at startup to
    /// detect fire times missed while the process was not running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Local>>,

    /// Package-name patterns excluded from dependency upgrades,
    /// comma-separated, `*` wildcards allowed.
    pub excludes: String,

    /// Host pinged while waiting for network reachability before a sync
    /// pass. Empty skips the wait.
    pub probe_host: String,

    /// The fleet.
    pub repos: Vec<RepoDescriptor>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            base_directory: PathBuf::new(),
            crons: "0 * * * *".to_string(),
            last_sync: None,
            excludes: String::new(),
            probe_host: "github.com".to_string(),
            repos: Vec::new(),
        }
    }
}

impl SyncSettings {
    /// Default on-disk location: `<config home>/config.toml`.
    pub fn default_path() -> PathBuf {
        Self::config_home().join("config.toml")
    }

    fn config_home() -> PathBuf {
        if let Ok(dir) = env::var("FLEETSYNC_CONFIG_HOME") {
            if !dir.is_empty() {
                return dir.into();
            }
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fleetsync")
    }

    /// Parse settings from a TOML file.
    pub fn load_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Serialize as TOML and write to `path`, creating parent
    /// directories as needed.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let text = toml::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Enabled repositories, in configured order.
    pub fn enabled_repos(&self) -> Vec<RepoDescriptor> {
        self.repos.iter().filter(|r| r.enable).cloned().collect()
    }
}

/// Shared settings store: the current settings value, its on-disk path,
/// and a change-notification channel.
///
/// Mutations go through [`SettingsStore::update`], which persists the new
/// value and notifies subscribers, so every consumer observes the same
/// sequence of configurations.
#[derive(Clone)]
pub struct SettingsStore {
    inner: Arc<RwLock<SyncSettings>>,
    path: PathBuf,
    tx: Arc<watch::Sender<u64>>,
}

impl SettingsStore {
    /// Load settings from `path`, creating and persisting the default
    /// configuration when the file does not exist yet. The second return
    /// value reports whether a fresh file was created.
    pub fn open(path: PathBuf) -> Result<(Self, bool)> {
        let (settings, created) = match SyncSettings::load_file(&path) {
            Ok(s) => (s, false),
            Err(_) if !path.exists() => {
                let s = SyncSettings::default();
                s.save_to_path(&path)?;
                info!("created default configuration at {}", path.display());
                (s, true)
            }
            Err(e) => return Err(e),
        };

        let (tx, _rx) = watch::channel(0);
        Ok((
            Self {
                inner: Arc::new(RwLock::new(settings)),
                path,
                tx: Arc::new(tx),
            },
            created,
        ))
    }

    /// In-memory store for tests; `update` still persists to `path`.
    pub fn with_settings(settings: SyncSettings, path: PathBuf) -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            inner: Arc::new(RwLock::new(settings)),
            path,
            tx: Arc::new(tx),
        }
    }

    /// Snapshot of the current settings.
    pub async fn get(&self) -> SyncSettings {
        self.inner.read().await.clone()
    }

    /// Mutate the settings, persist them, and notify subscribers.
    pub async fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut SyncSettings),
    {
        let snapshot = {
            let mut guard = self.inner.write().await;
            f(&mut guard);
            guard.clone()
        };
        snapshot.save_to_path(&self.path)?;
        self.tx.send_modify(|version| *version += 1);
        Ok(())
    }

    /// Re-read the settings file from disk and notify subscribers when
    /// the contents differ from the in-memory value.
    pub async fn reload(&self) -> Result<bool> {
        let fresh = SyncSettings::load_file(&self.path)?;
        let changed = {
            let mut guard = self.inner.write().await;
            if *guard == fresh {
                false
            } else {
                *guard = fresh;
                true
            }
        };
        if changed {
            self.tx.send_modify(|version| *version += 1);
        }
        Ok(changed)
    }

    /// Subscribe to change notifications. The payload is a version
    /// counter; receivers re-read via [`SettingsStore::get`].
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }
}
