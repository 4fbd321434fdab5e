mod cli;
mod commands;
mod config;
mod monitor;
mod notify;
mod schedule;
mod session;
mod shell_completion;
mod store;
mod telegram;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use cli::{Cli, Command};
use config::{Secrets, VigilConfig};
use monitor::SharedSession;
use notify::{ChannelNotifier, EmailTransport, Notifier};
use schedule::SchedulePolicy;
use session::{Mode, SessionState};
use store::StateStore;
use telegram::TelegramClient;

fn policy_label(policy: SchedulePolicy) -> &'static str {
    match policy {
        SchedulePolicy::WallClock => "wall-clock",
        SchedulePolicy::Relative => "relative",
    }
}

fn config_source_label(config_path: Option<&Path>) -> String {
    config_path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults — no .vigil/config.toml found)".to_string())
}

fn push_kv(output: &mut String, key: &str, value: impl std::fmt::Display) {
    output.push_str(&format!("  {key:<24} {value}\n"));
}

fn render_config_human(config: &VigilConfig, config_path: Option<&Path>) -> String {
    let mut output = String::new();
    output.push_str("Schedule\n");
    push_kv(&mut output, "policy", policy_label(config.schedule.policy));
    push_kv(&mut output, "entries", config.schedule.entries.join(", "));
    push_kv(&mut output, "max_days", config.schedule.max_days);
    output.push('\n');

    output.push_str("Watch\n");
    push_kv(
        &mut output,
        "poll_interval",
        format!("{}s", config.watch.poll_interval_secs),
    );
    push_kv(
        &mut output,
        "notify_timeout",
        format!("{}s", config.watch.notify_timeout_secs),
    );
    push_kv(
        &mut output,
        "telegram_poll_timeout",
        format!("{}s", config.watch.telegram_poll_timeout_secs),
    );
    output.push('\n');

    output.push_str("Email\n");
    push_kv(&mut output, "smtp_host", &config.email.smtp_host);
    push_kv(&mut output, "smtp_port", config.email.smtp_port);
    output.push('\n');

    output.push_str("Source Path\n");
    push_kv(&mut output, "path", config_source_label(config_path));

    output
}

fn render_config_json(config: &VigilConfig, config_path: Option<&Path>) -> Result<String> {
    let payload = serde_json::json!({
        "schedule": {
            "policy": policy_label(config.schedule.policy),
            "entries": &config.schedule.entries,
            "max_days": config.schedule.max_days
        },
        "watch": {
            "poll_interval_secs": config.watch.poll_interval_secs,
            "notify_timeout_secs": config.watch.notify_timeout_secs,
            "telegram_poll_timeout_secs": config.watch.telegram_poll_timeout_secs
        },
        "email": {
            "smtp_host": &config.email.smtp_host,
            "smtp_port": config.email.smtp_port
        },
        "source_path": config_source_label(config_path)
    });

    serde_json::to_string_pretty(&payload).context("failed to serialize config to JSON")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let is_quiet_command = matches!(
        &cli.command,
        Command::Config { .. } | Command::Completions { .. }
    );
    let filter = match cli.verbose {
        0 if is_quiet_command => "vigil=warn",
        0 => "vigil=info",
        1 => "vigil=debug",
        _ => "vigil=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cwd = std::env::current_dir().context("failed to get current directory")?;
    let (config, config_path) = VigilConfig::load(&cwd)?;

    if !is_quiet_command {
        match config_path {
            Some(ref p) => info!("loaded config from {}", p.display()),
            None => info!("no .vigil/config.toml found, using defaults"),
        }
    }

    match cli.command {
        Command::Run => run_daemon(&config, config_path.as_deref(), &cwd),
        Command::Status => show_status(&config, config_path.as_deref(), &cwd),
        Command::Config { json } => {
            if json {
                println!("{}", render_config_json(&config, config_path.as_deref())?);
            } else {
                print!("{}", render_config_human(&config, config_path.as_deref()));
            }
            Ok(())
        }
        Command::Completions { shell } => shell_completion::print(shell),
    }
}

fn show_status(config: &VigilConfig, config_path: Option<&Path>, cwd: &Path) -> Result<()> {
    let schedule = config
        .escalation_schedule()
        .context("invalid [schedule] configuration")?;
    let db_path = config::state_db_path(config_path, cwd);
    if !db_path.is_file() {
        println!("No saved session — the watch is idle.");
        return Ok(());
    }

    let store = StateStore::open(&db_path)?;
    let state = store.load(&schedule)?.unwrap_or_default();
    println!("{}", commands::render_status(&state.describe()));
    Ok(())
}

fn run_daemon(config: &VigilConfig, config_path: Option<&Path>, cwd: &Path) -> Result<()> {
    let schedule = config
        .escalation_schedule()
        .context("invalid [schedule] configuration")?;
    let secrets = Secrets::from_env()
        .context("missing credentials (set them in the environment or a .env file)")?;

    let notify_timeout = Duration::from_secs(config.watch.notify_timeout_secs);
    let client = TelegramClient::new(&secrets.telegram_token, secrets.chat_id, notify_timeout);
    let email = EmailTransport::new(&config.email, &secrets, notify_timeout)
        .context("invalid email configuration")?;
    let notifier = ChannelNotifier::new(client.clone(), email);

    let db_path = config::state_db_path(config_path, cwd);
    let store = match StateStore::open(&db_path) {
        Ok(store) => Some(store),
        Err(error) => {
            warn!(%error, path = %db_path.display(), "state store unavailable; running in memory");
            None
        }
    };

    let session = match store.as_ref().map(|s| s.load(&schedule)) {
        Some(Ok(Some(session))) => {
            if session.mode() == Mode::Armed {
                info!(
                    days = session.days_requested(),
                    step = session.current_step(),
                    "resuming armed watch from saved state"
                );
            }
            session
        }
        Some(Ok(None)) | None => SessionState::new(),
        Some(Err(error)) => {
            warn!(%error, "failed to load saved session; starting idle");
            SessionState::new()
        }
    };

    let shared = Arc::new(SharedSession::new(session, schedule, store));
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::Relaxed);
        })
        .context("failed to install signal handler")?;
    }

    if let Err(error) = notifier.notify_user(monitor::WELCOME_TEXT) {
        warn!(%error, "failed to send welcome message");
    }

    let command_loop = {
        let client = client.clone();
        let shared = shared.clone();
        let stop = stop.clone();
        let poll_timeout = config.watch.telegram_poll_timeout_secs;
        std::thread::spawn(move || {
            telegram::run_command_loop(&client, &shared, &stop, poll_timeout);
        })
    };

    monitor::run(
        &shared,
        &notifier,
        Duration::from_secs(config.watch.poll_interval_secs),
        &stop,
    );

    // Shutdown may wait out the remainder of one Telegram long poll.
    command_loop
        .join()
        .map_err(|_| anyhow::anyhow!("command loop panicked"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_human_render_lists_all_sections() {
        let config = VigilConfig::default();
        let rendered = render_config_human(&config, None);
        assert!(rendered.contains("Schedule"));
        assert!(rendered.contains("wall-clock"));
        assert!(rendered.contains("09:00"));
        assert!(rendered.contains("Watch"));
        assert!(rendered.contains("30s"));
        assert!(rendered.contains("Email"));
        assert!(rendered.contains("smtp.gmail.com"));
        assert!(rendered.contains("(defaults — no .vigil/config.toml found)"));
    }

    #[test]
    fn config_json_render_round_trips() {
        let config = VigilConfig::default();
        let rendered = render_config_json(&config, None).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["schedule"]["max_days"], 10);
        assert_eq!(value["watch"]["poll_interval_secs"], 30);
        assert_eq!(value["email"]["smtp_port"], 587);
    }

    #[test]
    fn config_render_shows_source_path_when_present() {
        let config = VigilConfig::default();
        let path = Path::new("/home/me/.vigil/config.toml");
        let rendered = render_config_human(&config, Some(path));
        assert!(rendered.contains("/home/me/.vigil/config.toml"));
    }
}
