//! Telegram Bot API transport and the inbound command loop.
//!
//! A thin blocking client over `ureq`: `sendMessage` for outbound text and
//! `getUpdates` long polling for inbound commands. The command loop runs in
//! its own thread, filters updates down to the configured chat, and applies
//! parsed commands to the shared session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Local;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::commands;
use crate::monitor::SharedSession;
use crate::notify::NotifyError;

const API_BASE: &str = "https://api.telegram.org";

/// Extra slack on top of the long-poll timeout so the HTTP request does not
/// abort before the server responds.
const POLL_TIMEOUT_SLACK_SECS: u64 = 5;

#[derive(Debug, Deserialize, PartialEq)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
}

/// Blocking Telegram Bot API client bound to a single chat.
#[derive(Clone)]
pub struct TelegramClient {
    agent: ureq::Agent,
    token: String,
    chat_id: i64,
}

impl TelegramClient {
    pub fn new(token: &str, chat_id: i64, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            token: token.to_string(),
            chat_id,
        }
    }

    pub fn chat_id(&self) -> i64 {
        self.chat_id
    }

    fn method_url(&self, method: &str) -> String {
        format!("{API_BASE}/bot{}/{method}", self.token)
    }

    /// Send a Markdown message to the bound chat.
    pub fn send_message(&self, text: &str) -> Result<(), NotifyError> {
        debug!(chars = text.len(), "sending telegram message");
        self.agent
            .post(&self.method_url("sendMessage"))
            .send_json(serde_json::json!({
                "chat_id": self.chat_id,
                "text": text,
                "parse_mode": "Markdown",
            }))?;
        Ok(())
    }

    /// Long-poll for new updates past `offset`.
    pub fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>, NotifyError> {
        let response = self
            .agent
            .get(&self.method_url("getUpdates"))
            .timeout(Duration::from_secs(timeout_secs + POLL_TIMEOUT_SLACK_SECS))
            .query("offset", &offset.to_string())
            .query("timeout", &timeout_secs.to_string())
            .call()?;

        let parsed: UpdatesResponse = response.into_json()?;
        if !parsed.ok {
            warn!("telegram getUpdates replied ok=false");
            return Ok(vec![]);
        }
        Ok(parsed.result)
    }
}

/// Confirmed updates are acknowledged by polling past their id.
fn advance_offset(offset: i64, updates: &[Update]) -> i64 {
    updates
        .iter()
        .map(|u| u.update_id + 1)
        .fold(offset, i64::max)
}

/// Inbound command loop — runs until `stop` is set.
///
/// Each update is parsed and applied to the session under the shared lock,
/// so a command landing between two watch ticks takes effect before the
/// next tick. Transport errors back off briefly and keep polling.
pub fn run_command_loop(
    client: &TelegramClient,
    shared: &SharedSession,
    stop: &AtomicBool,
    poll_timeout_secs: u64,
) {
    let mut offset = 0i64;

    while !stop.load(Ordering::Relaxed) {
        let updates = match client.get_updates(offset, poll_timeout_secs) {
            Ok(updates) => updates,
            Err(error) => {
                warn!(%error, "telegram poll failed; backing off");
                std::thread::sleep(Duration::from_secs(2));
                continue;
            }
        };
        offset = advance_offset(offset, &updates);

        for update in updates {
            let Some(message) = update.message else {
                continue;
            };
            if message.chat.id != client.chat_id() {
                debug!(chat = message.chat.id, "ignoring message from foreign chat");
                continue;
            }
            let Some(text) = message.text else {
                continue;
            };

            let reply = match commands::parse(&text) {
                Ok(command) => {
                    shared.mutate(|session, schedule| {
                        commands::apply(session, command, Local::now(), schedule)
                    })
                }
                Err(error) => error.to_string(),
            };

            if let Err(error) = client.send_message(&reply) {
                warn!(%error, "failed to send command reply");
            }
        }
    }
    debug!("command loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_update_batch() {
        let raw = r#"{
            "ok": true,
            "result": [
                {"update_id": 7, "message": {"chat": {"id": 42}, "text": "/status"}},
                {"update_id": 8, "message": {"chat": {"id": 42}, "text": "/ok"}}
            ]
        }"#;
        let parsed: UpdatesResponse = serde_json::from_str(raw).unwrap();
        assert!(parsed.ok);
        assert_eq!(parsed.result.len(), 2);
        assert_eq!(parsed.result[0].update_id, 7);
        assert_eq!(
            parsed.result[1].message.as_ref().unwrap().text.as_deref(),
            Some("/ok")
        );
    }

    #[test]
    fn parses_update_without_message_or_text() {
        // Edited messages, joins, etc. come through with fields missing.
        let raw = r#"{"ok": true, "result": [
            {"update_id": 9},
            {"update_id": 10, "message": {"chat": {"id": 1}}}
        ]}"#;
        let parsed: UpdatesResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.result[0].message, None);
        assert_eq!(parsed.result[1].message.as_ref().unwrap().text, None);
    }

    #[test]
    fn offset_advances_past_highest_update_id() {
        let updates = vec![
            Update {
                update_id: 3,
                message: None,
            },
            Update {
                update_id: 11,
                message: None,
            },
            Update {
                update_id: 7,
                message: None,
            },
        ];
        assert_eq!(advance_offset(0, &updates), 12);
    }

    #[test]
    fn offset_unchanged_for_empty_batch() {
        assert_eq!(advance_offset(5, &[]), 5);
    }

    #[test]
    fn method_url_embeds_token() {
        let client = TelegramClient::new("abc:123", 42, Duration::from_secs(5));
        assert_eq!(
            client.method_url("sendMessage"),
            "https://api.telegram.org/botabc:123/sendMessage"
        );
    }
}
