//! fleetsync Core Library
//!
//! Keeps a fleet of local git working copies in sync with their remotes
//! on a cron schedule, with optional dependency upgrades gated by a
//! build-verify/rollback step.

pub mod config;
pub mod cron;
pub mod domain;
pub mod events;
pub mod gitrepo;
pub mod netwait;
pub mod orchestrator;
pub mod power;
pub mod process;
pub mod project;
pub mod scheduler;
pub mod telemetry;
pub mod upgrade;

pub use config::{SettingsStore, SyncSettings};
pub use cron::CronExpr;
pub use domain::{RepoDescriptor, Result, SyncError, UpdateMode};
pub use events::{EventLog, EventSink};
pub use gitrepo::{ChangeEntry, ChangeSet, GitRepo};
pub use orchestrator::{RepoOutcome, SyncService};
pub use power::PowerGuard;
pub use scheduler::Scheduler;
pub use telemetry::init_tracing;
pub use upgrade::{UpgradeOutcome, UpgradeTools, Upgrader};

/// fleetsync version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
