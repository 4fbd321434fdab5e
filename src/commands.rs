//! Command adapter — Telegram text in, state transitions and replies out.
//!
//! Unrecognized or malformed input is rejected here; the state machine only
//! ever sees well-formed events. Every command returns a human-readable
//! reply for the chat.

use chrono::{DateTime, Local};
use thiserror::Error;

use crate::schedule::EscalationSchedule;
use crate::session::{Mode, SessionState, StatusSummary};

/// Events the command interface can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Arm(u32),
    Acknowledge,
    Status,
    Help,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unknown command. Shortcuts: /arm <days> /ok /status /help")]
    Unknown,

    #[error("Please enter a valid number of days, e.g. /arm 3")]
    BadDayCount,
}

/// Parse a chat message into a command.
///
/// `/start` and `/stop` are kept as aliases of `/arm` and `/ok` for muscle
/// memory from the old bot.
pub fn parse(text: &str) -> Result<Command, ParseError> {
    let mut words = text.split_whitespace();
    let Some(head) = words.next() else {
        return Err(ParseError::Unknown);
    };

    match head {
        "/arm" | "/start" => match words.next() {
            None => Ok(Command::Arm(crate::session::DEFAULT_DAYS)),
            Some(raw) => raw
                .parse::<u32>()
                .map(Command::Arm)
                .map_err(|_| ParseError::BadDayCount),
        },
        "/ok" | "/stop" => Ok(Command::Acknowledge),
        "/status" | "/info" => Ok(Command::Status),
        "/help" => Ok(Command::Help),
        _ => Err(ParseError::Unknown),
    }
}

pub const HELP_TEXT: &str = "I check in on you and escalate if you go quiet.\n\
    /arm <days> — start the watch (reminders begin after <days> days)\n\
    /ok — confirm you're okay and stand down\n\
    /status — show the current watch\n\
    /help — this message";

/// Run a command against the session and render the reply.
pub fn apply(
    state: &mut SessionState,
    command: Command,
    now: DateTime<Local>,
    schedule: &EscalationSchedule,
) -> String {
    match command {
        Command::Arm(days) => match state.arm(days, now, schedule) {
            Ok(first) => format!(
                "Watch armed for *{days}* day(s).\nFirst check-in: *{}*.",
                format_checkpoint(first)
            ),
            Err(err) => format!("{err}."),
        },
        Command::Acknowledge => {
            if state.acknowledge() {
                "Glad you're okay. Watch stopped — no more reminders.".to_string()
            } else {
                "Nothing to stop; the watch is idle. Arm it with /arm <days>.".to_string()
            }
        }
        Command::Status => render_status(&state.describe()),
        Command::Help => HELP_TEXT.to_string(),
    }
}

/// Render a status summary; shared by the `/status` chat command and the
/// `vigil status` CLI.
pub fn render_status(summary: &StatusSummary) -> String {
    let marker = match summary.mode {
        Mode::Idle => "🛑",
        Mode::Armed => "✅",
    };
    let next = match summary.next_checkpoint {
        Some(at) if summary.alert_sent => {
            format!("{} (fallback alert already sent)", format_checkpoint(at))
        }
        Some(at) => format_checkpoint(at),
        None => "(none)".to_string(),
    };
    format!(
        "Mode: *{}* {marker}\nDays requested: *{}*\nEscalation step: *{}*\nNext check-in: *{next}*",
        summary.mode.label(),
        summary.days_requested,
        summary.current_step,
    )
}

fn format_checkpoint(at: DateTime<Local>) -> String {
    at.format("%A %d %B %H:%M").to_string()
}
