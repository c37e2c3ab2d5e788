//! Minute-resolution cron expressions for the scheduler.
//!
//! Supports the classic five fields (minute, hour, day-of-month, month,
//! day-of-week) with `*`, steps (`*/15`), ranges (`1-5`), range steps
//! (`0-30/10`), and comma lists. Day-of-week uses 0-6 with 0 = Sunday;
//! 7 is accepted as Sunday too. As in classic cron, when both the
//! day-of-month and day-of-week fields are restricted a day matches if
//! either field matches.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, TimeZone, Timelike};

use crate::domain::{Result, SyncError};

/// How many days ahead [`CronExpr::next_after`] will scan before giving
/// up. Covers leap-year expressions like `0 0 29 2 *`.
const SCAN_DAYS: i64 = 366 * 4 + 1;

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    source: String,
    minutes: BTreeSet<u32>,
    hours: BTreeSet<u32>,
    days_of_month: BTreeSet<u32>,
    months: BTreeSet<u32>,
    days_of_week: BTreeSet<u32>,
    dom_any: bool,
    dow_any: bool,
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for CronExpr {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(SyncError::Cron(format!(
                "expected 5 fields, got {} in {s:?}",
                fields.len()
            )));
        }

        let minutes = parse_field(fields[0], 0, 59)?;
        let hours = parse_field(fields[1], 0, 23)?;
        let days_of_month = parse_field(fields[2], 1, 31)?;
        let months = parse_field(fields[3], 1, 12)?;
        let mut days_of_week = parse_field(fields[4], 0, 7)?;
        if days_of_week.remove(&7) {
            days_of_week.insert(0);
        }

        Ok(Self {
            source: s.trim().to_string(),
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_any: fields[2] == "*",
            dow_any: fields[4] == "*",
        })
    }
}

impl CronExpr {
    /// The next fire time strictly after `after`, or `None` when the
    /// expression never matches within the scan horizon.
    pub fn next_after(&self, after: DateTime<Local>) -> Option<DateTime<Local>> {
        let mut day = after.date_naive();

        for _ in 0..SCAN_DAYS {
            if self.day_matches(day) {
                for &hour in &self.hours {
                    for &minute in &self.minutes {
                        let naive = day.and_hms_opt(hour, minute, 0)?;
                        // earliest() skips times that do not exist locally
                        // (spring-forward gap)
                        if let Some(t) = Local.from_local_datetime(&naive).earliest() {
                            if t > after {
                                return Some(t);
                            }
                        }
                    }
                }
            }
            day = day.succ_opt()?;
        }

        None
    }

    /// Whether `t` falls on a fire time (minute resolution).
    pub fn matches(&self, t: DateTime<Local>) -> bool {
        self.minutes.contains(&t.minute())
            && self.hours.contains(&t.hour())
            && self.day_matches(t.date_naive())
    }

    fn day_matches(&self, day: NaiveDate) -> bool {
        if !self.months.contains(&day.month()) {
            return false;
        }

        let dom_ok = self.days_of_month.contains(&day.day());
        let dow_ok = self
            .days_of_week
            .contains(&day.weekday().num_days_from_sunday());

        match (self.dom_any, self.dow_any) {
            // both restricted: match either, as classic cron does
            (false, false) => dom_ok || dow_ok,
            _ => dom_ok && dow_ok,
        }
    }
}

fn parse_field(spec: &str, min: u32, max: u32) -> Result<BTreeSet<u32>> {
    let mut values = BTreeSet::new();

    for part in spec.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| SyncError::Cron(format!("bad step in {part:?}")))?;
                if step == 0 {
                    return Err(SyncError::Cron(format!("zero step in {part:?}")));
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            let lo = parse_value(a, min, max)?;
            let hi = parse_value(b, min, max)?;
            if lo > hi {
                return Err(SyncError::Cron(format!("inverted range {range:?}")));
            }
            (lo, hi)
        } else {
            let v = parse_value(range, min, max)?;
            (v, v)
        };

        let mut v = lo;
        while v <= hi {
            values.insert(v);
            v += step;
        }
    }

    if values.is_empty() {
        return Err(SyncError::Cron(format!("empty field {spec:?}")));
    }
    Ok(values)
}

fn parse_value(s: &str, min: u32, max: u32) -> Result<u32> {
    let v: u32 = s
        .parse()
        .map_err(|_| SyncError::Cron(format!("bad value {s:?}")))?;
    if v < min || v > max {
        return Err(SyncError::Cron(format!(
            "value {v} out of range {min}-{max}"
        )));
    }
    Ok(v)
}

/// Parse a semicolon-separated cron string into its expressions. Empty
/// sub-expressions are skipped; an empty input yields an empty list.
pub fn parse_crons(crons: &str) -> Result<Vec<CronExpr>> {
    crons
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(CronExpr::from_str)
        .collect()
}

/// Delay until the earliest next fire across `schedules`, measured from
/// `now`. `None` when the list is empty or nothing matches ahead.
pub fn earliest_delay(
    schedules: &[CronExpr],
    now: DateTime<Local>,
) -> Option<std::time::Duration> {
    schedules
        .iter()
        .filter_map(|c| c.next_after(now))
        .min()
        .map(|next| (next - now).max(Duration::zero()).to_std().unwrap_or_default())
}
