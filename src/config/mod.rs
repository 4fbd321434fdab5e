use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::schedule::{EscalationSchedule, ScheduleError, SchedulePolicy};

const CONFIG_FILENAME: &str = "config.toml";
const CONFIG_DIR: &str = ".vigil";
const STATE_DB_FILENAME: &str = "state.db";

fn default_entries() -> Vec<String> {
    ["09:00", "10:00", "12:00", "19:00", "20:00"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_max_days() -> u32 {
    10
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_notify_timeout_secs() -> u64 {
    10
}

fn default_telegram_poll_timeout_secs() -> u64 {
    25
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

/// Escalation schedule section.
///
/// ```toml
/// [schedule]
/// policy = "relative"
/// entries = ["+0m", "+5m", "+10m"]
/// max_days = 10
/// ```
#[derive(Debug, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub policy: SchedulePolicy,
    #[serde(default = "default_entries")]
    pub entries: Vec<String>,
    #[serde(default = "default_max_days")]
    pub max_days: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            policy: SchedulePolicy::default(),
            entries: default_entries(),
            max_days: default_max_days(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WatchSettings {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_notify_timeout_secs")]
    pub notify_timeout_secs: u64,
    #[serde(default = "default_telegram_poll_timeout_secs")]
    pub telegram_poll_timeout_secs: u64,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            notify_timeout_secs: default_notify_timeout_secs(),
            telegram_poll_timeout_secs: default_telegram_poll_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EmailConfig {
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct VigilConfig {
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub watch: WatchSettings,
    #[serde(default)]
    pub email: EmailConfig,
}

impl VigilConfig {
    /// Search upward from `start` for a `.vigil/config.toml` file and load it.
    /// Returns the default config if no file is found.
    pub fn load(start: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = Self::find_config_file(start) {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: VigilConfig = toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok((config, Some(path)))
        } else {
            Ok((VigilConfig::default(), None))
        }
    }

    fn find_config_file(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILENAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }

    /// Build the validated escalation schedule from the `[schedule]` section.
    pub fn escalation_schedule(&self) -> Result<EscalationSchedule, ScheduleError> {
        EscalationSchedule::from_entries(
            self.schedule.policy,
            &self.schedule.entries,
            self.schedule.max_days,
        )
    }
}

/// Where the session database lives: next to the config file when one was
/// found, otherwise under `.vigil/` in the working directory.
pub fn state_db_path(config_path: Option<&Path>, cwd: &Path) -> PathBuf {
    match config_path.and_then(Path::parent) {
        Some(dir) => dir.join(STATE_DB_FILENAME),
        None => cwd.join(CONFIG_DIR).join(STATE_DB_FILENAME),
    }
}

/// Credentials and recipient identity, read from the environment (or a
/// `.env` file loaded at startup). Variable names match the original bot
/// deployment.
#[derive(Debug, Clone)]
pub struct Secrets {
    pub telegram_token: String,
    pub chat_id: i64,
    pub sender_email: String,
    pub sender_password: String,
    pub receiver_email: String,
}

impl Secrets {
    pub fn from_env() -> Result<Self> {
        let chat_id_raw = require_var("YOUR_CHAT_ID")?;
        Ok(Self {
            telegram_token: require_var("TELEGRAM_TOKEN")?,
            chat_id: chat_id_raw
                .parse()
                .with_context(|| format!("YOUR_CHAT_ID is not a number: '{chat_id_raw}'"))?,
            sender_email: require_var("SENDER_EMAIL_ADDRESS")?,
            sender_password: require_var("SENDER_EMAIL_PASSWORD")?,
            receiver_email: require_var("RECEIVER_EMAIL_ADDRESS")?,
        })
    }
}

fn require_var(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("environment variable {name} is not set"))
}
