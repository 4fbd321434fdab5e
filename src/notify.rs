//! Notification channels — reminders to the user, the fallback alert to the
//! third-party contact.
//!
//! The watch loop treats notification as fire-and-forget: every send has a
//! bounded timeout, and failures are returned for the caller to log, never
//! to propagate out of a tick.

use std::time::Duration;

use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use thiserror::Error;

use crate::config::{EmailConfig, Secrets};
use crate::telegram::TelegramClient;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("telegram api: {0}")]
    Telegram(#[source] Box<ureq::Error>),

    #[error("telegram response: {0}")]
    TelegramResponse(#[from] std::io::Error),

    #[error("smtp transport: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("email compose: {0}")]
    Compose(#[from] lettre::error::Error),

    #[error("bad email address: {0}")]
    Address(#[from] lettre::address::AddressError),
}

impl From<ureq::Error> for NotifyError {
    fn from(err: ureq::Error) -> Self {
        NotifyError::Telegram(Box::new(err))
    }
}

/// Outbound message sink for the two channels the watch knows about.
pub trait Notifier: Send + Sync {
    /// Send a chat message to the watched user.
    fn notify_user(&self, text: &str) -> Result<(), NotifyError>;

    /// Send the out-of-band alert to the third-party contact.
    fn notify_contact(&self, subject: &str, body: &str) -> Result<(), NotifyError>;
}

/// SMTP transport for the fallback alert email.
pub struct EmailTransport {
    mailer: SmtpTransport,
    sender: Mailbox,
    receiver: Mailbox,
}

impl EmailTransport {
    pub fn new(
        config: &EmailConfig,
        secrets: &Secrets,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let sender: Mailbox = secrets.sender_email.parse()?;
        let receiver: Mailbox = secrets.receiver_email.parse()?;

        let mailer = SmtpTransport::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(Credentials::new(
                secrets.sender_email.clone(),
                secrets.sender_password.clone(),
            ))
            .timeout(Some(timeout))
            .build();

        Ok(Self {
            mailer,
            sender,
            receiver,
        })
    }

    pub fn send(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        let email = Message::builder()
            .from(self.sender.clone())
            .to(self.receiver.clone())
            .subject(subject)
            .body(body.to_string())?;
        self.mailer.send(&email)?;
        Ok(())
    }
}

/// Production notifier: Telegram for the user, email for the contact.
pub struct ChannelNotifier {
    telegram: TelegramClient,
    email: EmailTransport,
}

impl ChannelNotifier {
    pub fn new(telegram: TelegramClient, email: EmailTransport) -> Self {
        Self { telegram, email }
    }
}

impl Notifier for ChannelNotifier {
    fn notify_user(&self, text: &str) -> Result<(), NotifyError> {
        self.telegram.send_message(text)
    }

    fn notify_contact(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        self.email.send(subject, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets(sender: &str, receiver: &str) -> Secrets {
        Secrets {
            telegram_token: "token".to_string(),
            chat_id: 42,
            sender_email: sender.to_string(),
            sender_password: "hunter2".to_string(),
            receiver_email: receiver.to_string(),
        }
    }

    #[test]
    fn builds_transport_for_valid_addresses() {
        let config = EmailConfig::default();
        let transport = EmailTransport::new(
            &config,
            &secrets("vigil@example.com", "contact@example.com"),
            Duration::from_secs(5),
        );
        assert!(transport.is_ok());
    }

    #[test]
    fn rejects_malformed_sender_address() {
        let config = EmailConfig::default();
        let err = EmailTransport::new(
            &config,
            &secrets("not-an-address", "contact@example.com"),
            Duration::from_secs(5),
        )
        .err()
        .unwrap();
        assert!(matches!(err, NotifyError::Address(_)));
    }

    #[test]
    fn rejects_malformed_receiver_address() {
        let config = EmailConfig::default();
        let err = EmailTransport::new(
            &config,
            &secrets("vigil@example.com", ""),
            Duration::from_secs(5),
        )
        .err()
        .unwrap();
        assert!(matches!(err, NotifyError::Address(_)));
    }
}
