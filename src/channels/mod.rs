//! Mail gateway abstraction.
//!
//! The orchestration loop only sees `MailGateway`. Authentication, sessions
//! and wire formats live behind it.

pub mod email;

pub use email::{EmailConfig, ImapSmtpGateway};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::message::Mailbox;

use crate::error::ChannelError;

/// Opaque reference to an unread message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHandle {
    /// Provider-specific identifier (IMAP UID for the shipped gateway).
    pub id: String,
    pub received_at: Option<DateTime<Utc>>,
}

impl MessageHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            received_at: None,
        }
    }

    pub fn received_at(mut self, at: DateTime<Utc>) -> Self {
        self.received_at = Some(at);
        self
    }
}

/// Headers of a fetched message that the loop needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    pub handle: MessageHandle,
    /// Bare, normalised sender address. `None` when the From header is
    /// missing or unparsable.
    pub sender: Option<String>,
    pub subject: Option<String>,
}

/// Inbox operations used by the daemon.
#[async_trait]
pub trait MailGateway: Send + Sync {
    /// Check credentials once at startup. Failure is fatal.
    async fn verify(&self) -> Result<(), ChannelError>;

    /// Unread messages received strictly after `after`.
    async fn list_unread(&self, after: DateTime<Utc>) -> Result<Vec<MessageHandle>, ChannelError>;

    /// Resolve sender and subject for one message.
    async fn fetch(&self, handle: &MessageHandle) -> Result<FetchedMessage, ChannelError>;

    /// Send a plain-text message.
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), ChannelError>;

    /// The daemon's own mailbox address.
    fn self_address(&self) -> &str;
}

/// Reduce `Name <addr>`, `<addr>` or `addr` to the lowercased bare address.
pub fn normalize_address(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Ok(mailbox) = raw.parse::<Mailbox>() {
        return Some(mailbox.email.to_string().to_lowercase());
    }

    let bare = match raw.rfind('<') {
        Some(open) => raw[open + 1..].split('>').next().unwrap_or_default(),
        None => raw,
    }
    .trim();
    if bare.is_empty() || !bare.contains('@') || bare.contains(char::is_whitespace) {
        return None;
    }
    Some(bare.to_lowercase())
}
