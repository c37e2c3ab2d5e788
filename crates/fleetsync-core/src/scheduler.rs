//! Cron-driven scheduling of fleet sync passes.
//!
//! The scheduler owns its timer state explicitly: the last-applied cron
//! string (so an unchanged configuration never rebuilds timers) and the
//! parsed schedules. It survives process restarts through the persisted
//! last-sync timestamp: a fire time that passed while the process was
//! down triggers an immediate catch-up run at startup.

use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::sync::watch;
use tracing::info;

use crate::config::SettingsStore;
use crate::cron::{self, CronExpr};
use crate::domain::Result;
use crate::events::EventLog;
use crate::orchestrator::SyncService;

/// Fallback cadence when no cron expression is configured: first fire
/// shortly after arming, then hourly.
const FALLBACK_FIRST_DELAY: Duration = Duration::from_secs(1);
const FALLBACK_INTERVAL: Duration = Duration::from_secs(3600);

/// Timer state owned by one [`Scheduler`] instance.
#[derive(Debug, Default)]
pub struct SchedulerState {
    /// Cron string the current timers were built from. `None` until the
    /// first build, which therefore always runs.
    last_crons: Option<String>,

    /// Active schedules; empty means the fallback interval timer.
    schedules: Vec<CronExpr>,

    /// Whether the fallback timer still owes its initial short fire.
    fallback_first_pending: bool,
}

/// Fires the fleet-wide sync pass on the configured schedule.
pub struct Scheduler {
    settings: SettingsStore,
    service: SyncService,
    log: EventLog,
    state: SchedulerState,
}

impl Scheduler {
    pub fn new(settings: SettingsStore, service: SyncService, log: EventLog) -> Self {
        Self {
            settings,
            service,
            log,
            state: SchedulerState::default(),
        }
    }

    /// Rebuild timers when the configured cron string differs from the
    /// last-applied one. Returns whether a rebuild happened.
    fn check_timers(&mut self, crons: &str) -> bool {
        if self.state.last_crons.as_deref() == Some(crons) {
            return false;
        }
        self.state.last_crons = Some(crons.to_string());

        match cron::parse_crons(crons) {
            Ok(schedules) if !schedules.is_empty() => {
                info!("arming {} timer(s): {crons}", schedules.len());
                self.state.schedules = schedules;
                self.state.fallback_first_pending = false;
            }
            Ok(_) => {
                info!("no cron configured, using hourly fallback timer");
                self.state.schedules = Vec::new();
                self.state.fallback_first_pending = true;
            }
            Err(e) => {
                self.log.write(
                    "scheduler",
                    &format!("cron error in {crons:?}: {e}, using hourly fallback timer"),
                );
                self.state.schedules = Vec::new();
                self.state.fallback_first_pending = true;
            }
        }

        if let Some(next) = cron::earliest_delay(&self.state.schedules, Local::now()) {
            info!("next fire in {}s", next.as_secs());
        }
        true
    }

    fn next_delay(&self, now: DateTime<Local>) -> Duration {
        if self.state.schedules.is_empty() {
            if self.state.fallback_first_pending {
                FALLBACK_FIRST_DELAY
            } else {
                FALLBACK_INTERVAL
            }
        } else {
            cron::earliest_delay(&self.state.schedules, now).unwrap_or(FALLBACK_INTERVAL)
        }
    }

    async fn fire(&mut self) {
        self.state.fallback_first_pending = false;

        self.service.sync_repos().await;

        if let Err(e) = self
            .settings
            .update(|s| s.last_sync = Some(Local::now()))
            .await
        {
            self.log
                .write("scheduler", &format!("error saving last sync time: {e}"));
        }
        self.log.write("scheduler", "sync pass complete");

        // The configuration may have been edited while the pass ran.
        let crons = self.settings.get().await.crons;
        self.check_timers(&crons);
    }

    /// Run until `shutdown` changes (or its sender drops).
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut changes = self.settings.subscribe();

        let set = self.settings.get().await;
        self.check_timers(&set.crons);

        // Missed-run catch-up: a fire time that fell inside the downtime
        // window runs now instead of waiting for its next occurrence.
        let mut fire_now = false;
        if let Some(last) = set.last_sync {
            if let Some(cron) = missed_schedule(&self.state.schedules, last, Local::now()) {
                self.log.write(
                    "scheduler",
                    &format!("missed fire time of [{cron}] since {last}, running now"),
                );
                fire_now = true;
            }
        }

        loop {
            let delay = if fire_now {
                Duration::ZERO
            } else {
                self.next_delay(Local::now())
            };
            fire_now = false;

            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    self.fire().await;
                    // Our own last-sync save also notifies; mark it seen
                    // so the next iteration sleeps instead of spinning.
                    let _ = changes.borrow_and_update();
                }
                res = changes.changed() => {
                    if res.is_err() {
                        break;
                    }
                    let crons = self.settings.get().await.crons;
                    self.check_timers(&crons);
                }
                _ = shutdown.changed() => {
                    info!("scheduler stopping");
                    break;
                }
            }
        }

        Ok(())
    }
}

/// The first schedule whose next fire time after `last_sync` already
/// lies in the past, i.e. was missed while the process was not running.
pub fn missed_schedule<'a>(
    schedules: &'a [CronExpr],
    last_sync: DateTime<Local>,
    now: DateTime<Local>,
) -> Option<&'a CronExpr> {
    schedules
        .iter()
        .find(|c| matches!(c.next_after(last_sync), Some(next) if next < now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .single()
            .expect("unambiguous local time")
    }

    #[test]
    fn test_missed_schedule_detects_overdue_fire() {
        let schedules = cron::parse_crons("0 * * * *").unwrap();
        let last = local(2026, 3, 5, 8, 30);

        // next fire after 08:30 is 09:00; at 10:30 that has been missed
        assert!(missed_schedule(&schedules, last, local(2026, 3, 5, 10, 30)).is_some());

        // at 08:45 the 09:00 fire is still ahead
        assert!(missed_schedule(&schedules, last, local(2026, 3, 5, 8, 45)).is_none());
    }

    #[test]
    fn test_missed_schedule_empty_list() {
        assert!(missed_schedule(&[], local(2026, 3, 5, 8, 0), local(2026, 3, 5, 12, 0)).is_none());
    }

    fn make_scheduler() -> Scheduler {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let store = SettingsStore::with_settings(Default::default(), path);
        let service = SyncService::new(store.clone(), EventLog::disabled());
        // leak the tempdir so the store path stays valid for the test
        std::mem::forget(dir);
        Scheduler::new(store, service, EventLog::disabled())
    }

    #[test]
    fn test_check_timers_rebuilds_only_on_change() {
        let mut scheduler = make_scheduler();

        assert!(scheduler.check_timers("0 2 * * *"));
        assert_eq!(scheduler.state.schedules.len(), 1);

        // unchanged string: no rebuild
        assert!(!scheduler.check_timers("0 2 * * *"));

        // two sub-expressions
        assert!(scheduler.check_timers("0 2 * * *;30 14 * * 1-5"));
        assert_eq!(scheduler.state.schedules.len(), 2);
    }

    #[test]
    fn test_check_timers_empty_uses_fallback() {
        let mut scheduler = make_scheduler();
        assert!(scheduler.check_timers(""));
        assert!(scheduler.state.schedules.is_empty());
        assert_eq!(scheduler.next_delay(Local::now()), FALLBACK_FIRST_DELAY);
    }

    #[test]
    fn test_check_timers_invalid_cron_falls_back() {
        let mut scheduler = make_scheduler();
        assert!(scheduler.check_timers("not a cron"));
        assert!(scheduler.state.schedules.is_empty());
        assert!(scheduler.state.fallback_first_pending);
    }

    #[test]
    fn test_next_delay_tracks_earliest_schedule() {
        let mut scheduler = make_scheduler();
        scheduler.check_timers("*/5 * * * *");
        let delay = scheduler.next_delay(local(2026, 3, 5, 10, 1));
        assert_eq!(delay, Duration::from_secs(4 * 60));
    }
}
