//! The watch loop — periodic tick evaluation and action dispatch.
//!
//! A fixed-interval poll loop drives the escalation state machine. Each
//! iteration takes the session lock, evaluates `tick` against the current
//! wall clock, persists any mutation, releases the lock, and only then
//! performs notification I/O. A failing notifier is logged and the loop
//! keeps running; there is no retry queue — the next checkpoint on the
//! schedule is the only retry.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use crate::notify::Notifier;
use crate::schedule::EscalationSchedule;
use crate::session::{SessionState, TickAction};
use crate::store::StateStore;

pub const REMINDER_TEXT: &str = "Are you okay? Reply /ok if all is well.";
pub const ALERT_SUBJECT: &str = "No response received";
pub const ALERT_BODY: &str =
    "No response was received to the check-in reminders. Please check on them.";
pub const WELCOME_TEXT: &str = "Vigil is watching.\n\
    /arm <days> — start the watch\n\
    /ok — confirm you're okay\n\
    /status — show the current watch\n\
    /help — usage";

/// The session, its schedule, and the optional durable store, behind one
/// coordinator. Both the command loop and the watch loop go through
/// `mutate`, so every transition is serialized and persisted in one place.
pub struct SharedSession {
    session: Mutex<SessionState>,
    schedule: EscalationSchedule,
    store: Mutex<Option<StateStore>>,
}

impl SharedSession {
    pub fn new(
        session: SessionState,
        schedule: EscalationSchedule,
        store: Option<StateStore>,
    ) -> Self {
        Self {
            session: Mutex::new(session),
            schedule,
            store: Mutex::new(store),
        }
    }

    /// Run a transition under the lock, then persist the result.
    ///
    /// Persistence failures are logged and dropped — the watch keeps
    /// operating in memory.
    pub fn mutate<T>(&self, f: impl FnOnce(&mut SessionState, &EscalationSchedule) -> T) -> T {
        let mut session = self.session.lock().unwrap();
        let out = f(&mut session, &self.schedule);

        if let Some(store) = self.store.lock().unwrap().as_ref()
            && let Err(error) = store.save(&session)
        {
            warn!(%error, "failed to persist session state; continuing in memory");
        }
        out
    }
}

/// One iteration of the watch loop, with the clock injected for tests.
pub fn poll_once(
    shared: &SharedSession,
    notifier: &dyn Notifier,
    now: DateTime<Local>,
) -> Option<TickAction> {
    let action = shared.mutate(|session, schedule| session.tick(now, schedule));

    // Notification I/O happens outside the session lock so a slow transport
    // never stalls inbound commands.
    match action {
        Some(TickAction::Remind) => {
            info!("checkpoint reached — sending reminder");
            if let Err(error) = notifier.notify_user(REMINDER_TEXT) {
                warn!(%error, "reminder delivery failed; next checkpoint will still fire");
            }
        }
        Some(TickAction::Alert) => {
            warn!("final checkpoint passed without acknowledgment — alerting contact");
            if let Err(error) = notifier.notify_contact(ALERT_SUBJECT, ALERT_BODY) {
                warn!(%error, "fallback alert delivery failed");
            }
        }
        None => debug!("tick: nothing due"),
    }
    action
}

/// Run the watch loop until `stop` is set.
pub fn run(
    shared: &SharedSession,
    notifier: &dyn Notifier,
    poll_interval: Duration,
    stop: &AtomicBool,
) {
    info!(interval_secs = poll_interval.as_secs(), "watch loop starting");
    while !stop.load(Ordering::Relaxed) {
        poll_once(shared, notifier, Local::now());
        interruptible_sleep(poll_interval, stop);
    }
    info!("watch loop stopped");
}

/// Sleep in one-second slices so shutdown stays responsive even with long
/// poll intervals.
fn interruptible_sleep(total: Duration, stop: &AtomicBool) {
    let mut remaining = total;
    while !remaining.is_zero() && !stop.load(Ordering::Relaxed) {
        let slice = remaining.min(Duration::from_secs(1));
        std::thread::sleep(slice);
        remaining -= slice;
    }
}
