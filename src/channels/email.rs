//! IMAP + SMTP mail gateway.
//!
//! Inbound: raw IMAP over rustls. Listing and header fetches use `UID`
//! commands and `BODY.PEEK`, so the gateway never flips `\Seen`.
//! Outbound: SMTP via lettre.

use std::io::Write as IoWrite;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use mail_parser::MessageParser;
use tracing::{debug, info};

use crate::channels::{FetchedMessage, MailGateway, MessageHandle, normalize_address};
use crate::error::{ChannelError, ConfigError};

const CHANNEL: &str = "email";

// ── Configuration ───────────────────────────────────────────────────

/// Mailbox configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
}

impl EmailConfig {
    /// Build config from environment variables. `EMAIL_IMAP_HOST` is required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let imap_host = std::env::var("EMAIL_IMAP_HOST")
            .map_err(|_| ConfigError::MissingEnvVar("EMAIL_IMAP_HOST".into()))?;

        let imap_port = parse_port("EMAIL_IMAP_PORT", 993)?;

        let smtp_host =
            std::env::var("EMAIL_SMTP_HOST").unwrap_or_else(|_| imap_host.replace("imap", "smtp"));

        let smtp_port = parse_port("EMAIL_SMTP_PORT", 587)?;

        let username = std::env::var("EMAIL_USERNAME").unwrap_or_default();
        let password = std::env::var("EMAIL_PASSWORD").unwrap_or_default();
        let from_address = std::env::var("EMAIL_FROM_ADDRESS").unwrap_or_else(|_| username.clone());

        Ok(Self {
            imap_host,
            imap_port,
            smtp_host,
            smtp_port,
            username,
            password,
            from_address,
        })
    }
}

fn parse_port(key: &str, default: u16) -> Result<u16, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{e}"),
        }),
        Err(_) => Ok(default),
    }
}

// ── Gateway ─────────────────────────────────────────────────────────

/// Mail gateway backed by an IMAP inbox and an SMTP relay.
pub struct ImapSmtpGateway {
    config: EmailConfig,
    self_address: String,
}

impl ImapSmtpGateway {
    pub fn new(config: EmailConfig) -> Self {
        let self_address = normalize_address(&config.from_address)
            .unwrap_or_else(|| config.from_address.trim().to_lowercase());
        Self {
            config,
            self_address,
        }
    }

    fn send_blocking(config: &EmailConfig, to: &str, subject: &str, body: &str) -> Result<(), ChannelError> {
        let send_failed = |reason: String| ChannelError::SendFailed {
            name: CHANNEL.into(),
            reason,
        };

        let creds = Credentials::new(config.username.clone(), config.password.clone());

        let builder = if config.smtp_port == 465 {
            SmtpTransport::relay(&config.smtp_host)
        } else {
            SmtpTransport::starttls_relay(&config.smtp_host)
        };
        let transport = builder
            .map_err(|e| send_failed(format!("SMTP relay error: {e}")))?
            .port(config.smtp_port)
            .credentials(creds)
            .build();

        let email = Message::builder()
            .from(
                config
                    .from_address
                    .parse()
                    .map_err(|e| send_failed(format!("Invalid from address: {e}")))?,
            )
            .to(to
                .parse()
                .map_err(|e| send_failed(format!("Invalid to address: {e}")))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| send_failed(format!("Failed to build email: {e}")))?;

        transport
            .send(&email)
            .map_err(|e| send_failed(format!("SMTP send failed: {e}")))?;

        info!("Email sent to {to}");
        Ok(())
    }
}

#[async_trait]
impl MailGateway for ImapSmtpGateway {
    async fn verify(&self) -> Result<(), ChannelError> {
        let cfg = self.config.clone();
        tokio::task::spawn_blocking(move || -> Result<(), ImapError> {
            let mut session = ImapSession::connect(&cfg)?;
            session.login(&cfg)?;
            session.logout();
            Ok(())
        })
        .await
        .map_err(|e| join_error("verify", e))?
        .map_err(|e| ChannelError::AuthFailed {
            name: CHANNEL.into(),
            reason: e.to_string(),
        })?;

        info!(host = %self.config.imap_host, user = %self.config.username, "IMAP login verified");
        Ok(())
    }

    async fn list_unread(&self, after: DateTime<Utc>) -> Result<Vec<MessageHandle>, ChannelError> {
        let cfg = self.config.clone();
        let handles = tokio::task::spawn_blocking(move || list_unread_imap(&cfg, after))
            .await
            .map_err(|e| join_error("list", e))?
            .map_err(|e| ChannelError::ListFailed {
                name: CHANNEL.into(),
                reason: e.to_string(),
            })?;

        debug!(count = handles.len(), "Checked for unread emails");
        Ok(handles)
    }

    async fn fetch(&self, handle: &MessageHandle) -> Result<FetchedMessage, ChannelError> {
        let cfg = self.config.clone();
        let uid = handle.id.clone();
        let raw = tokio::task::spawn_blocking(move || fetch_headers_imap(&cfg, &uid))
            .await
            .map_err(|e| join_error("fetch", e))?
            .map_err(|e| ChannelError::FetchFailed {
                name: CHANNEL.into(),
                id: handle.id.clone(),
                reason: e.to_string(),
            })?;

        let headers = parse_headers(&raw);
        debug!(uid = %handle.id, message_id = ?headers.message_id, "Fetched message headers");
        Ok(FetchedMessage {
            handle: handle.clone(),
            sender: headers.sender,
            subject: headers.subject,
        })
    }

    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), ChannelError> {
        let cfg = self.config.clone();
        let (to, subject, body) = (to.to_string(), subject.to_string(), body.to_string());
        tokio::task::spawn_blocking(move || Self::send_blocking(&cfg, &to, &subject, &body))
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: CHANNEL.into(),
                reason: format!("send task panicked: {e}"),
            })?
    }

    fn self_address(&self) -> &str {
        &self.self_address
    }
}

fn join_error(op: &str, e: tokio::task::JoinError) -> ChannelError {
    ChannelError::InvalidMessage(format!("IMAP {op} task panicked: {e}"))
}

// ── IMAP session ────────────────────────────────────────────────────

/// Error type for blocking IMAP operations.
type ImapError = Box<dyn std::error::Error + Send + Sync>;

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// One tagged IMAP conversation over TLS.
struct ImapSession {
    tls: TlsStream,
    tag_counter: u32,
}

impl ImapSession {
    fn connect(config: &EmailConfig) -> Result<Self, ImapError> {
        let tcp = TcpStream::connect((&*config.imap_host, config.imap_port))?;
        tcp.set_read_timeout(Some(Duration::from_secs(30)))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name: rustls::pki_types::ServerName<'static> =
            rustls::pki_types::ServerName::try_from(config.imap_host.clone())?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)?;

        let mut session = Self {
            tls: rustls::StreamOwned::new(conn, tcp),
            tag_counter: 1,
        };
        let _greeting = session.read_line()?;
        Ok(session)
    }

    fn read_line(&mut self) -> Result<String, ImapError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match std::io::Read::read(&mut self.tls, &mut byte) {
                Ok(0) => return Err("IMAP connection closed".into()),
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).to_string());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Send a command and collect every line up to and including the tagged
    /// completion. Fails unless the completion is `OK`.
    fn command(&mut self, cmd: &str) -> Result<Vec<String>, ImapError> {
        let tag = format!("A{}", self.tag_counter);
        self.tag_counter += 1;

        IoWrite::write_all(&mut self.tls, format!("{tag} {cmd}\r\n").as_bytes())?;
        IoWrite::flush(&mut self.tls)?;

        let prefix = format!("{tag} ");
        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            let done = line.starts_with(&prefix);
            lines.push(line);
            if done {
                break;
            }
        }

        let status = lines.last().map(|l| l[prefix.len()..].trim_start()).unwrap_or("");
        if !status.starts_with("OK") {
            let verb = cmd.split_whitespace().next().unwrap_or(cmd);
            return Err(format!("IMAP {verb} failed: {}", status.trim_end()).into());
        }
        Ok(lines)
    }

    fn login(&mut self, config: &EmailConfig) -> Result<(), ImapError> {
        self.command(&format!(
            "LOGIN {} {}",
            quote_imap(&config.username),
            quote_imap(&config.password)
        ))
        .map(|_| ())
        .map_err(|_| "IMAP login rejected".into())
    }

    fn logout(&mut self) {
        let _ = self.command("LOGOUT");
    }
}

/// List unread INBOX messages with INTERNALDATE strictly after `after`.
fn list_unread_imap(config: &EmailConfig, after: DateTime<Utc>) -> Result<Vec<MessageHandle>, ImapError> {
    let mut session = ImapSession::connect(config)?;
    session.login(config)?;
    session.command("EXAMINE \"INBOX\"")?;

    let search = session.command(&format!("UID SEARCH UNSEEN SINCE {}", imap_since_date(after)))?;
    let uids = parse_search_response(&search);
    if uids.is_empty() {
        session.logout();
        return Ok(Vec::new());
    }

    let fetch = session.command(&format!("UID FETCH {} (UID INTERNALDATE)", uids.join(",")))?;
    session.logout();

    let mut handles: Vec<MessageHandle> = fetch
        .iter()
        .filter_map(|line| parse_fetch_meta(line))
        .filter(|(_, at)| *at > after)
        .map(|(uid, at)| MessageHandle::new(uid).received_at(at))
        .collect();
    handles.sort_by_key(|h| h.received_at);
    Ok(handles)
}

/// Fetch the header block for one UID without marking it seen.
fn fetch_headers_imap(config: &EmailConfig, uid: &str) -> Result<String, ImapError> {
    let mut session = ImapSession::connect(config)?;
    session.login(config)?;
    session.command("EXAMINE \"INBOX\"")?;
    let resp = session.command(&format!(
        "UID FETCH {uid} (BODY.PEEK[HEADER.FIELDS (FROM SUBJECT DATE MESSAGE-ID)])"
    ))?;
    session.logout();

    let raw = literal_body(&resp);
    if raw.trim().is_empty() {
        return Err(format!("no message with UID {uid}").into());
    }
    Ok(raw)
}

// ── Helpers (public for testing) ────────────────────────────────────

/// IMAP quoted string.
pub fn quote_imap(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// `SINCE` compares dates in the server's timezone and ignores the time, so
/// search from the day before `after` and filter on INTERNALDATE afterwards.
pub fn imap_since_date(after: DateTime<Utc>) -> String {
    (after - chrono::Duration::days(1)).format("%d-%b-%Y").to_string()
}

/// Collect UIDs from `* SEARCH` lines.
pub fn parse_search_response(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter(|l| l.starts_with("* SEARCH"))
        .flat_map(|l| l.split_whitespace().skip(2))
        .map(str::to_string)
        .collect()
}

/// Extract `(uid, internaldate)` from a `* n FETCH (UID .. INTERNALDATE "..")` line.
pub fn parse_fetch_meta(line: &str) -> Option<(String, DateTime<Utc>)> {
    if !line.starts_with("* ") || !line.contains(" FETCH ") {
        return None;
    }

    let uid_pos = line.find("UID ")? + 4;
    let uid: String = line[uid_pos..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    if uid.is_empty() {
        return None;
    }

    let date_pos = line.find("INTERNALDATE \"")? + "INTERNALDATE \"".len();
    let date_end = line[date_pos..].find('"')? + date_pos;
    let at = DateTime::parse_from_str(line[date_pos..date_end].trim(), "%d-%b-%Y %H:%M:%S %z")
        .ok()?
        .with_timezone(&Utc);

    Some((uid, at))
}

/// The literal payload of a single-message FETCH response: the `{size}`
/// bytes following the `* n FETCH (... {size}` opener line.
pub fn literal_body(lines: &[String]) -> String {
    let Some(start) = lines.iter().position(|l| l.starts_with("* ") && l.contains("FETCH")) else {
        return String::new();
    };
    let Some(size) = literal_size(&lines[start]) else {
        return String::new();
    };

    let joined: String = lines[start + 1..].concat();
    let bytes = joined.as_bytes();
    String::from_utf8_lossy(&bytes[..size.min(bytes.len())]).to_string()
}

fn literal_size(opener: &str) -> Option<usize> {
    let trimmed = opener.trim_end();
    let inner = trimmed.strip_suffix('}')?;
    let open = inner.rfind('{')?;
    inner[open + 1..].parse().ok()
}

/// Sender/subject pulled from a header block.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ParsedHeaders {
    pub sender: Option<String>,
    pub subject: Option<String>,
    pub message_id: Option<String>,
}

/// Parse raw RFC 5322 headers.
pub fn parse_headers(raw: &str) -> ParsedHeaders {
    let mut bytes = raw.as_bytes().to_vec();
    if !raw.ends_with("\r\n\r\n") {
        bytes.extend_from_slice(b"\r\n");
    }

    let Some(parsed) = MessageParser::default().parse(bytes.as_slice()) else {
        return ParsedHeaders::default();
    };

    ParsedHeaders {
        sender: parsed
            .from()
            .and_then(|addr| addr.first())
            .and_then(|a| a.address())
            .and_then(normalize_address),
        subject: parsed
            .subject()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        message_id: parsed.message_id().map(str::to_string),
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[path = "email_tests.rs"]
mod tests;
