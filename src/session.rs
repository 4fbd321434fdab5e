//! Escalation state machine.
//!
//! A single `SessionState` tracks the watch. Arming starts a countdown of
//! `days` days; once checkpoints come due, `tick` emits at most one action
//! per call: a reminder to the user at intermediate checkpoints, and exactly
//! one fallback alert once the final checkpoint passes unacknowledged. The
//! clock is injected — transitions never read system time — so the machine
//! is testable without waiting.
//!
//! ```text
//!              arm(days)                    tick: checkpoint due
//!  Idle ─────────────────────► Armed ────────────────────────► Armed
//!   ▲                            │     (Remind, step += 1)
//!   │       acknowledge()        │
//!   └────────────────────────────┘     tick at final step:
//!                                      Alert once, stays Armed
//! ```

use chrono::{DateTime, Local};
use thiserror::Error;

use crate::schedule::EscalationSchedule;

pub const DEFAULT_DAYS: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Armed,
}

impl Mode {
    pub fn label(self) -> &'static str {
        match self {
            Mode::Idle => "idle",
            Mode::Armed => "armed",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("day count must be between 1 and {max_days}, got {days}")]
    DaysOutOfRange { days: u32, max_days: u32 },
}

/// What a due checkpoint asks the caller to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    /// Send a check-in reminder to the user.
    Remind,
    /// Send the fallback alert to the third-party contact.
    Alert,
}

/// Read-only snapshot for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSummary {
    pub mode: Mode,
    pub days_requested: u32,
    pub current_step: usize,
    pub next_checkpoint: Option<DateTime<Local>>,
    pub alert_sent: bool,
}

/// The single mutable record of the system.
///
/// Created once at startup (idle), then owned behind a lock shared by the
/// command interface and the watch loop. Only `arm`, `acknowledge`, and
/// `tick` mutate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    mode: Mode,
    activation_time: Option<DateTime<Local>>,
    days_requested: u32,
    current_step: usize,
    next_checkpoint: Option<DateTime<Local>>,
    alert_sent: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            mode: Mode::Idle,
            activation_time: None,
            days_requested: DEFAULT_DAYS,
            current_step: 0,
            next_checkpoint: None,
            alert_sent: false,
        }
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a session from persisted fields, recomputing the derived
    /// checkpoint from the current schedule.
    pub fn restore(
        armed: bool,
        activation_time: Option<DateTime<Local>>,
        days_requested: u32,
        current_step: usize,
        alert_sent: bool,
        schedule: &EscalationSchedule,
    ) -> Self {
        match (armed, activation_time) {
            (true, Some(activation)) => Self {
                mode: Mode::Armed,
                activation_time: Some(activation),
                days_requested,
                current_step,
                next_checkpoint: Some(schedule.checkpoint(
                    activation,
                    days_requested,
                    current_step,
                )),
                alert_sent,
            },
            // An armed record without an activation time is corrupt; start
            // over idle rather than guess.
            _ => Self::default(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn activation_time(&self) -> Option<DateTime<Local>> {
        self.activation_time
    }

    pub fn days_requested(&self) -> u32 {
        self.days_requested
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn alert_sent(&self) -> bool {
        self.alert_sent
    }

    /// Start (or restart) the watch for `days` days.
    ///
    /// Rejected day counts leave the state untouched. Re-arming an already
    /// armed watch resets the escalation from step 0.
    pub fn arm(
        &mut self,
        days: u32,
        now: DateTime<Local>,
        schedule: &EscalationSchedule,
    ) -> Result<DateTime<Local>, ValidationError> {
        if days == 0 || days > schedule.max_days() {
            return Err(ValidationError::DaysOutOfRange {
                days,
                max_days: schedule.max_days(),
            });
        }

        let first = schedule.checkpoint(now, days, 0);
        self.mode = Mode::Armed;
        self.activation_time = Some(now);
        self.days_requested = days;
        self.current_step = 0;
        self.next_checkpoint = Some(first);
        self.alert_sent = false;
        Ok(first)
    }

    /// Stand down: the user confirmed they are okay.
    ///
    /// Returns whether the watch was armed; acknowledging an idle watch is
    /// a no-op.
    pub fn acknowledge(&mut self) -> bool {
        let was_armed = self.mode == Mode::Armed;
        *self = Self::default();
        was_armed
    }

    /// Evaluate the schedule at `now`, emitting at most one action.
    ///
    /// Idle watches and not-yet-due checkpoints are no-ops. A due
    /// intermediate checkpoint advances the escalation; the final checkpoint
    /// fires the fallback alert once and then stays quiet — only an
    /// acknowledgment (or re-arm) exits that state.
    pub fn tick(
        &mut self,
        now: DateTime<Local>,
        schedule: &EscalationSchedule,
    ) -> Option<TickAction> {
        if self.mode != Mode::Armed {
            return None;
        }
        let (Some(activation), Some(due)) = (self.activation_time, self.next_checkpoint) else {
            return None;
        };
        if now < due {
            return None;
        }

        if schedule.is_final(self.current_step) {
            if self.alert_sent {
                return None;
            }
            self.alert_sent = true;
            return Some(TickAction::Alert);
        }

        self.current_step += 1;
        self.next_checkpoint =
            Some(schedule.checkpoint(activation, self.days_requested, self.current_step));
        Some(TickAction::Remind)
    }

    /// Consistent read-only summary; no side effects.
    pub fn describe(&self) -> StatusSummary {
        StatusSummary {
            mode: self.mode,
            days_requested: self.days_requested,
            current_step: self.current_step,
            next_checkpoint: self.next_checkpoint,
            alert_sent: self.alert_sent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::SchedulePolicy;
    use chrono::{TimeDelta, TimeZone};
    use proptest::prelude::*;

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn relative(entries: &[&str]) -> EscalationSchedule {
        let entries: Vec<String> = entries.iter().map(|s| s.to_string()).collect();
        EscalationSchedule::from_entries(SchedulePolicy::Relative, &entries, 10).unwrap()
    }

    fn wall_clock(entries: &[&str]) -> EscalationSchedule {
        let entries: Vec<String> = entries.iter().map(|s| s.to_string()).collect();
        EscalationSchedule::from_entries(SchedulePolicy::WallClock, &entries, 10).unwrap()
    }

    #[test]
    fn arm_sets_armed_at_step_zero() {
        let schedule = relative(&["+0m", "+1m"]);
        let now = local(2026, 3, 2, 9, 0);
        let mut state = SessionState::new();

        let first = state.arm(3, now, &schedule).unwrap();

        let summary = state.describe();
        assert_eq!(summary.mode, Mode::Armed);
        assert_eq!(summary.current_step, 0);
        assert_eq!(summary.days_requested, 3);
        assert_eq!(summary.next_checkpoint, Some(first));
        assert_eq!(first, schedule.checkpoint(now, 3, 0));
    }

    #[test]
    fn arm_rejects_out_of_range_days_without_mutation() {
        let schedule = relative(&["+0m"]);
        let now = local(2026, 3, 2, 9, 0);
        let mut state = SessionState::new();

        for days in [0, 11, 99] {
            let before = state.clone();
            let err = state.arm(days, now, &schedule).unwrap_err();
            assert_eq!(
                err,
                ValidationError::DaysOutOfRange { days, max_days: 10 }
            );
            assert_eq!(state, before);
        }
    }

    #[test]
    fn rearming_resets_escalation_and_alert_latch() {
        let schedule = relative(&["+0m", "+1m"]);
        let t0 = local(2026, 3, 2, 9, 0);
        let mut state = SessionState::new();
        state.arm(1, t0, &schedule).unwrap();

        // Walk to the final checkpoint and fire the alert.
        state.tick(t0 + TimeDelta::days(1), &schedule);
        state.tick(t0 + TimeDelta::days(2), &schedule);
        assert!(state.alert_sent());

        state.arm(2, t0 + TimeDelta::days(2), &schedule).unwrap();
        let summary = state.describe();
        assert_eq!(summary.current_step, 0);
        assert_eq!(summary.days_requested, 2);
        assert!(!summary.alert_sent);
    }

    #[test]
    fn acknowledge_from_armed_resets_defaults() {
        let schedule = relative(&["+0m", "+1m"]);
        let t0 = local(2026, 3, 2, 9, 0);
        let mut state = SessionState::new();
        state.arm(7, t0, &schedule).unwrap();
        state.tick(t0 + TimeDelta::days(7), &schedule);
        assert_eq!(state.current_step(), 1);

        assert!(state.acknowledge());

        let summary = state.describe();
        assert_eq!(summary.mode, Mode::Idle);
        assert_eq!(summary.current_step, 0);
        assert_eq!(summary.days_requested, DEFAULT_DAYS);
        assert_eq!(summary.next_checkpoint, None);
    }

    #[test]
    fn acknowledge_from_idle_is_noop() {
        let mut state = SessionState::new();
        let before = state.clone();
        assert!(!state.acknowledge());
        assert_eq!(state, before);
    }

    #[test]
    fn tick_before_checkpoint_is_noop() {
        let schedule = relative(&["+0m", "+1m"]);
        let t0 = local(2026, 3, 2, 9, 0);
        let mut state = SessionState::new();
        state.arm(1, t0, &schedule).unwrap();
        let before = state.clone();

        assert_eq!(state.tick(t0, &schedule), None);
        assert_eq!(
            state.tick(t0 + TimeDelta::hours(23), &schedule),
            None
        );
        assert_eq!(state, before);
    }

    #[test]
    fn tick_while_idle_is_noop() {
        let schedule = relative(&["+0m"]);
        let mut state = SessionState::new();
        assert_eq!(state.tick(local(2026, 3, 2, 9, 0), &schedule), None);
        assert_eq!(state, SessionState::new());
    }

    #[test]
    fn relative_escalation_walks_schedule_then_alerts_once() {
        // One day of quiet, then reminders a minute apart, then the alert.
        let schedule = relative(&["+0d", "+1m", "+2m"]);
        let t0 = local(2026, 3, 2, 14, 0);
        let mut state = SessionState::new();
        state.arm(1, t0, &schedule).unwrap();

        let day = t0 + TimeDelta::days(1);
        assert_eq!(state.tick(day, &schedule), Some(TickAction::Remind));
        assert_eq!(state.current_step(), 1);
        assert_eq!(
            state.describe().next_checkpoint,
            Some(day + TimeDelta::minutes(1))
        );

        assert_eq!(
            state.tick(day + TimeDelta::minutes(1), &schedule),
            Some(TickAction::Remind)
        );
        assert_eq!(state.current_step(), 2);

        assert_eq!(
            state.tick(day + TimeDelta::minutes(2), &schedule),
            Some(TickAction::Alert)
        );
        assert_eq!(state.current_step(), 2);
        assert_eq!(state.mode(), Mode::Armed);

        assert_eq!(state.tick(day + TimeDelta::minutes(3), &schedule), None);
    }

    #[test]
    fn alert_fires_at_most_once_across_repeated_ticks() {
        let schedule = relative(&["+0m"]);
        let t0 = local(2026, 3, 2, 9, 0);
        let mut state = SessionState::new();
        state.arm(1, t0, &schedule).unwrap();

        let mut alerts = 0;
        for extra in 0..5 {
            let now = t0 + TimeDelta::days(1) + TimeDelta::minutes(extra);
            if state.tick(now, &schedule) == Some(TickAction::Alert) {
                alerts += 1;
            }
        }
        assert_eq!(alerts, 1);
    }

    #[test]
    fn wall_clock_escalation_scenario() {
        // Armed at 08:00 with days=1: morning reminder, evening final.
        let schedule = wall_clock(&["09:00", "20:00"]);
        let armed_at = local(2026, 3, 2, 8, 0);
        let mut state = SessionState::new();
        let first = state.arm(1, armed_at, &schedule).unwrap();
        assert_eq!(first, local(2026, 3, 2, 9, 0));

        assert_eq!(
            state.tick(local(2026, 3, 2, 9, 0), &schedule),
            Some(TickAction::Remind)
        );
        assert_eq!(
            state.describe().next_checkpoint,
            Some(local(2026, 3, 2, 20, 0))
        );

        assert_eq!(
            state.tick(local(2026, 3, 2, 20, 0), &schedule),
            Some(TickAction::Alert)
        );
        assert_eq!(state.tick(local(2026, 3, 2, 20, 30), &schedule), None);
        assert_eq!(state.tick(local(2026, 3, 3, 8, 0), &schedule), None);
    }

    #[test]
    fn late_tick_past_several_checkpoints_advances_one_step_per_call() {
        // A stalled poll loop catches up one action per tick, in order.
        let schedule = relative(&["+0m", "+1m", "+2m"]);
        let t0 = local(2026, 3, 2, 9, 0);
        let mut state = SessionState::new();
        state.arm(1, t0, &schedule).unwrap();

        let late = t0 + TimeDelta::days(1) + TimeDelta::hours(1);
        assert_eq!(state.tick(late, &schedule), Some(TickAction::Remind));
        assert_eq!(state.tick(late, &schedule), Some(TickAction::Remind));
        assert_eq!(state.tick(late, &schedule), Some(TickAction::Alert));
        assert_eq!(state.tick(late, &schedule), None);
    }

    #[test]
    fn restore_recomputes_checkpoint_from_schedule() {
        let schedule = relative(&["+0m", "+1m"]);
        let activation = local(2026, 3, 2, 9, 0);

        let state = SessionState::restore(true, Some(activation), 2, 1, false, &schedule);
        assert_eq!(state.mode(), Mode::Armed);
        assert_eq!(
            state.describe().next_checkpoint,
            Some(schedule.checkpoint(activation, 2, 1))
        );
    }

    #[test]
    fn restore_without_activation_time_falls_back_to_idle() {
        let schedule = relative(&["+0m"]);
        let state = SessionState::restore(true, None, 3, 1, true, &schedule);
        assert_eq!(state, SessionState::new());
    }

    proptest! {
        #[test]
        fn arm_accepts_exactly_the_valid_day_range(days in 0u32..64) {
            let schedule = relative(&["+0m", "+1m"]);
            let now = local(2026, 3, 2, 9, 0);
            let mut state = SessionState::new();

            let result = state.arm(days, now, &schedule);
            if (1..=10).contains(&days) {
                prop_assert!(result.is_ok());
                prop_assert_eq!(state.describe().next_checkpoint,
                    Some(schedule.checkpoint(now, days, 0)));
            } else {
                prop_assert!(result.is_err());
                prop_assert_eq!(state.mode(), Mode::Idle);
            }
        }
    }
}
