//! Durable session state — a single-row SQLite table.
//!
//! Persistence is best-effort: the watch keeps running in memory when the
//! store is unavailable, and a restart without durable state simply comes
//! back idle. `next_checkpoint` is derived and deliberately not stored; it
//! is recomputed from the configured schedule on load, so schedule edits
//! take effect across restarts.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;
use tracing::debug;

use crate::schedule::EscalationSchedule;
use crate::session::{Mode, SessionState};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to create state directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt activation timestamp '{0}'")]
    BadTimestamp(String),
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS session (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    armed INTEGER NOT NULL,
    activation_time TEXT,
    days INTEGER NOT NULL,
    current_step INTEGER NOT NULL,
    alert_sent INTEGER NOT NULL,
    updated_at TEXT NOT NULL
)";

pub struct StateStore {
    conn: Connection,
    path: PathBuf,
}

impl StateStore {
    /// Open (creating if needed) the state database at `path`.
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute(SCHEMA, [])?;
        debug!(path = %path.display(), "state store opened");
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the stored session with the current state.
    pub fn save(&self, state: &SessionState) -> Result<(), PersistenceError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO session
                (id, armed, activation_time, days, current_step, alert_sent, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                state.mode() == Mode::Armed,
                state.activation_time().map(|at| at.to_rfc3339()),
                state.days_requested(),
                state.current_step() as i64,
                state.alert_sent(),
                Local::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Load the stored session, if any, recomputing the next checkpoint
    /// from `schedule`.
    pub fn load(
        &self,
        schedule: &EscalationSchedule,
    ) -> Result<Option<SessionState>, PersistenceError> {
        let row = self
            .conn
            .query_row(
                "SELECT armed, activation_time, days, current_step, alert_sent
                 FROM session WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, bool>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, u32>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, bool>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((armed, activation_raw, days, step, alert_sent)) = row else {
            return Ok(None);
        };

        let activation = activation_raw
            .map(|raw| parse_timestamp(&raw))
            .transpose()?;

        Ok(Some(SessionState::restore(
            armed,
            activation,
            days,
            step.max(0) as usize,
            alert_sent,
            schedule,
        )))
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Local>, PersistenceError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Local))
        .map_err(|_| PersistenceError::BadTimestamp(raw.to_string()))
}
