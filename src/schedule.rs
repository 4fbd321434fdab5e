//! Escalation schedule — the ordered checkpoints a watch walks through.
//!
//! Two policies exist. *Relative* entries are offsets from the base deadline
//! (`activation + days`), e.g. `"+0m", "+1m", "+2m"` for rapid escalation
//! after the initial wait. *Wall-clock* entries are times-of-day, e.g.
//! `"09:00", "12:00", "20:00"`, evaluated from the base date onward. The
//! last entry is the final checkpoint; silence past it triggers the
//! fallback alert.

use chrono::offset::LocalResult;
use chrono::{DateTime, Local, NaiveDateTime, NaiveTime, TimeDelta, TimeZone};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

/// How schedule entries are interpreted.
#[derive(Debug, Default, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulePolicy {
    #[default]
    WallClock,
    Relative,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("schedule must contain at least one entry")]
    Empty,

    #[error("bad schedule entry '{0}': expected an offset like \"+1m\" (s/m/h/d)")]
    BadOffset(String),

    #[error("bad schedule entry '{0}': expected a time of day like \"09:00\"")]
    BadTimeOfDay(String),

    #[error("relative entries must be non-decreasing ('{0}' goes backwards)")]
    Decreasing(String),

    #[error("max_days must be at least 1")]
    BadMaxDays,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Steps {
    Relative(Vec<TimeDelta>),
    WallClock(Vec<NaiveTime>),
}

/// A validated, non-empty escalation schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationSchedule {
    steps: Steps,
    max_days: u32,
}

impl EscalationSchedule {
    /// Parse and validate configured entries under the given policy.
    pub fn from_entries(
        policy: SchedulePolicy,
        entries: &[String],
        max_days: u32,
    ) -> Result<Self, ScheduleError> {
        if entries.is_empty() {
            return Err(ScheduleError::Empty);
        }
        if max_days == 0 {
            return Err(ScheduleError::BadMaxDays);
        }

        let steps = match policy {
            SchedulePolicy::Relative => {
                let mut offsets = Vec::with_capacity(entries.len());
                for entry in entries {
                    let offset = parse_offset(entry)?;
                    if let Some(prev) = offsets.last()
                        && offset < *prev
                    {
                        return Err(ScheduleError::Decreasing(entry.clone()));
                    }
                    offsets.push(offset);
                }
                Steps::Relative(offsets)
            }
            SchedulePolicy::WallClock => {
                // Wrapping times ("20:00" then "09:00") are legal; the
                // checkpoint computation rolls the date forward instead.
                let times = entries
                    .iter()
                    .map(|entry| parse_time_of_day(entry))
                    .collect::<Result<Vec<_>, _>>()?;
                Steps::WallClock(times)
            }
        };

        Ok(Self { steps, max_days })
    }

    pub fn len(&self) -> usize {
        match &self.steps {
            Steps::Relative(offsets) => offsets.len(),
            Steps::WallClock(times) => times.len(),
        }
    }

    /// Whether `step` is the last checkpoint of the schedule.
    pub fn is_final(&self, step: usize) -> bool {
        step + 1 >= self.len()
    }

    pub fn max_days(&self) -> u32 {
        self.max_days
    }

    /// Absolute timestamp of escalation step `step` for a watch armed at
    /// `activation` for `days` days.
    ///
    /// Total and pure: recomputable from scratch for any step, no clock
    /// reads. `step` is clamped to the final entry.
    pub fn checkpoint(
        &self,
        activation: DateTime<Local>,
        days: u32,
        step: usize,
    ) -> DateTime<Local> {
        let step = step.min(self.len() - 1);
        match &self.steps {
            Steps::Relative(offsets) => {
                activation + TimeDelta::days(i64::from(days)) + offsets[step]
            }
            Steps::WallClock(times) => {
                // days = 1 means checkpoints start on the arming day; the
                // date rolls forward whenever a time-of-day is already past.
                let base = activation + TimeDelta::days(i64::from(days) - 1);
                let mut date = base.date_naive();
                let mut floor = activation;
                for time in times.iter().take(step + 1) {
                    let mut candidate = resolve_local(date.and_time(*time));
                    if candidate < floor {
                        date = date.succ_opt().unwrap_or(date);
                        candidate = resolve_local(date.and_time(*time));
                    }
                    floor = candidate;
                    date = candidate.date_naive();
                }
                floor
            }
        }
    }
}

/// Map a naive local datetime onto the local timezone.
///
/// Ambiguous times (fall-back) take the earlier instant; nonexistent times
/// (spring-forward gap) slide forward an hour until they resolve.
fn resolve_local(mut naive: NaiveDateTime) -> DateTime<Local> {
    loop {
        match Local.from_local_datetime(&naive) {
            LocalResult::Single(dt) => return dt,
            LocalResult::Ambiguous(earliest, _) => return earliest,
            LocalResult::None => naive += TimeDelta::hours(1),
        }
    }
}

fn parse_offset(entry: &str) -> Result<TimeDelta, ScheduleError> {
    let pattern = Regex::new(r"^\+(\d+)([smhd])$").unwrap();
    let caps = pattern
        .captures(entry)
        .ok_or_else(|| ScheduleError::BadOffset(entry.to_string()))?;
    let amount: i64 = caps[1]
        .parse()
        .map_err(|_| ScheduleError::BadOffset(entry.to_string()))?;

    let offset = match &caps[2] {
        "s" => TimeDelta::seconds(amount),
        "m" => TimeDelta::minutes(amount),
        "h" => TimeDelta::hours(amount),
        _ => TimeDelta::days(amount),
    };
    Ok(offset)
}

fn parse_time_of_day(entry: &str) -> Result<NaiveTime, ScheduleError> {
    NaiveTime::parse_from_str(entry, "%H:%M")
        .map_err(|_| ScheduleError::BadTimeOfDay(entry.to_string()))
}
