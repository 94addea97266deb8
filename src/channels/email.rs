//! Email transport — IMAP polling for inbound, SMTP via lettre for
//! outbound.
//!
//! The IMAP side is a small hand-rolled client over rustls: connect,
//! LOGIN, SELECT INBOX, SEARCH UNSEEN, FETCH, mark seen. Blocking I/O
//! throughout, so every fetch runs inside `spawn_blocking`.

use std::collections::HashSet;
use std::io::Write as IoWrite;
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use mail_parser::{MessageParser, MimeHeaders};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channels::{ChannelTransport, DeliveryId};
use crate::error::TransportError;
use crate::normalizer::RawMessage;

// ── Configuration ───────────────────────────────────────────────────

/// Email transport configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
    pub allowed_senders: Vec<String>,
}

impl EmailConfig {
    /// Returns `None` if `EMAIL_IMAP_HOST` is not set (channel disabled).
    pub fn from_env() -> Option<Self> {
        let imap_host = std::env::var("EMAIL_IMAP_HOST").ok()?;

        let imap_port: u16 = std::env::var("EMAIL_IMAP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(993);

        let smtp_host =
            std::env::var("EMAIL_SMTP_HOST").unwrap_or_else(|_| imap_host.replace("imap", "smtp"));

        let smtp_port: u16 = std::env::var("EMAIL_SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = std::env::var("EMAIL_USERNAME").unwrap_or_default();
        let password = std::env::var("EMAIL_PASSWORD").unwrap_or_default();
        let from_address = std::env::var("EMAIL_FROM_ADDRESS").unwrap_or_else(|_| username.clone());

        let allowed_senders: Vec<String> = std::env::var("EMAIL_ALLOWED_SENDERS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Some(Self {
            imap_host,
            imap_port,
            smtp_host,
            smtp_port,
            username,
            password,
            from_address,
            allowed_senders,
        })
    }
}

// ── Transport ───────────────────────────────────────────────────────

pub struct EmailTransport {
    config: EmailConfig,
    seen_messages: Arc<Mutex<HashSet<String>>>,
}

impl EmailTransport {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config,
            seen_messages: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn config(&self) -> &EmailConfig {
        &self.config
    }

    /// Blocking SMTP send.
    fn send_blocking(
        config: &EmailConfig,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), TransportError> {
        let send_err = |reason: String| TransportError::SendFailed {
            channel: "email".into(),
            reason,
        };

        let creds = Credentials::new(config.username.clone(), config.password.clone());
        let transport = SmtpTransport::relay(&config.smtp_host)
            .map_err(|e| send_err(format!("SMTP relay error: {e}")))?
            .port(config.smtp_port)
            .credentials(creds)
            .build();

        let email = Message::builder()
            .from(
                config
                    .from_address
                    .parse()
                    .map_err(|e| send_err(format!("Invalid from address: {e}")))?,
            )
            .to(to
                .parse()
                .map_err(|e| send_err(format!("Invalid to address: {e}")))?)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| send_err(format!("Failed to build email: {e}")))?;

        transport
            .send(&email)
            .map_err(|e| send_err(format!("SMTP send failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl ChannelTransport for EmailTransport {
    fn name(&self) -> &str {
        "email"
    }

    async fn fetch_new(&self) -> Result<Vec<RawMessage>, TransportError> {
        let config = self.config.clone();
        let fetched = tokio::task::spawn_blocking(move || fetch_unseen_imap(&config))
            .await
            .map_err(|e| TransportError::FetchFailed {
                channel: "email".into(),
                reason: format!("fetch task panicked: {e}"),
            })?
            .map_err(|e| TransportError::FetchFailed {
                channel: "email".into(),
                reason: e.to_string(),
            })?;

        let mut messages = Vec::new();
        for mail in fetched {
            {
                let mut guard = self
                    .seen_messages
                    .lock()
                    .map_err(|_| TransportError::FetchFailed {
                        channel: "email".into(),
                        reason: "seen-message set poisoned".into(),
                    })?;
                if !guard.insert(mail.message_id.clone()) {
                    continue;
                }
            }
            // Replies we sent ourselves come back on the next poll.
            if mail.sender.eq_ignore_ascii_case(&self.config.from_address) {
                debug!(sender = %mail.sender, "Skipping our own outbound mail");
                continue;
            }
            if !is_sender_allowed(&self.config.allowed_senders, &mail.sender) {
                warn!(sender = %mail.sender, "Blocked email from unlisted sender");
                continue;
            }

            messages.push(RawMessage {
                external_id: mail.message_id,
                sender: mail.sender,
                sender_name: mail.sender_name,
                thread_hint: Some(mail.subject.clone()),
                subject: Some(mail.subject),
                content: mail.body,
                received_at: mail.received_at,
            });
        }
        Ok(messages)
    }

    async fn send(
        &self,
        recipient: &str,
        subject: Option<&str>,
        body: &str,
    ) -> Result<DeliveryId, TransportError> {
        let config = self.config.clone();
        let to = recipient.to_string();
        let subject = subject.unwrap_or("Re: your message").to_string();
        let body = body.to_string();

        tokio::task::spawn_blocking(move || Self::send_blocking(&config, &to, &subject, &body))
            .await
            .map_err(|e| TransportError::SendFailed {
                channel: "email".into(),
                reason: format!("send task panicked: {e}"),
            })??;

        let delivery_id = format!("smtp-{}", Uuid::new_v4());
        info!(recipient, delivery_id, "Email sent");
        Ok(delivery_id)
    }

    async fn health_check(&self) -> Result<(), TransportError> {
        let host = self.config.imap_host.clone();
        let port = self.config.imap_port;
        let reachable = tokio::task::spawn_blocking(move || {
            TcpStream::connect((&*host, port)).is_ok()
        })
        .await
        .unwrap_or(false);

        if reachable {
            Ok(())
        } else {
            Err(TransportError::FetchFailed {
                channel: "email".into(),
                reason: format!("IMAP host {} unreachable", self.config.imap_host),
            })
        }
    }
}

// ── Helpers (public for testing) ────────────────────────────────────

/// Check if a sender email is in the allowlist.
///
/// - Empty list → deny all
/// - `*` in list → allow all
/// - `@domain.com` or `domain.com` → domain match
/// - `user@domain.com` → exact email match
pub fn is_sender_allowed(allowed: &[String], email: &str) -> bool {
    if allowed.is_empty() {
        return false;
    }
    if allowed.iter().any(|a| a == "*") {
        return true;
    }
    let email_lower = email.to_lowercase();
    allowed.iter().any(|a| {
        if a.starts_with('@') {
            email_lower.ends_with(&a.to_lowercase())
        } else if a.contains('@') {
            a.eq_ignore_ascii_case(email)
        } else {
            email_lower.ends_with(&format!("@{}", a.to_lowercase()))
        }
    })
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_sender(parsed: &mail_parser::Message) -> (String, Option<String>) {
    let address = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".into());
    let name = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.name())
        .map(|s| s.to_string());
    (address, name)
}

fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    for part in parsed.attachments() {
        let part: &mail_parser::MessagePart = part;
        if let Some(ct) = MimeHeaders::content_type(part)
            && ct.ctype() == "text"
            && let Ok(text) = std::str::from_utf8(part.contents())
        {
            let name = MimeHeaders::attachment_name(part).unwrap_or("file");
            return format!("[Attachment: {name}]\n{text}");
        }
    }
    "(no readable content)".to_string()
}

struct FetchedEmail {
    message_id: String,
    sender: String,
    sender_name: Option<String>,
    subject: String,
    body: String,
    received_at: chrono::DateTime<Utc>,
}

type ImapError = Box<dyn std::error::Error + Send + Sync>;

/// Fetch unseen emails via raw IMAP over TLS (blocking).
fn fetch_unseen_imap(config: &EmailConfig) -> Result<Vec<FetchedEmail>, ImapError> {
    let tcp = TcpStream::connect((&*config.imap_host, config.imap_port))?;
    tcp.set_read_timeout(Some(Duration::from_secs(30)))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name: rustls::pki_types::ServerName<'_> =
        rustls::pki_types::ServerName::try_from(config.imap_host.clone())?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)?;
    let mut tls = rustls::StreamOwned::new(conn, tcp);

    type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

    let read_line = |tls: &mut TlsStream| -> Result<String, ImapError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match std::io::Read::read(tls, &mut byte) {
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
    };

    let send_cmd = |tls: &mut TlsStream, tag: &str, cmd: &str| -> Result<Vec<String>, ImapError> {
        let full = format!("{tag} {cmd}\r\n");
        IoWrite::write_all(tls, full.as_bytes())?;
        IoWrite::flush(tls)?;
        let mut lines = Vec::new();
        loop {
            let line = read_line(tls)?;
            let done = line.starts_with(tag);
            lines.push(line);
            if done {
                break;
            }
        }
        Ok(lines)
    };

    let _greeting = read_line(&mut tls)?;

    let login_resp = send_cmd(
        &mut tls,
        "A1",
        &format!("LOGIN \"{}\" \"{}\"", config.username, config.password),
    )?;
    if !login_resp.last().is_some_and(|l| l.contains("OK")) {
        return Err("IMAP login failed".into());
    }

    let _select = send_cmd(&mut tls, "A2", "SELECT \"INBOX\"")?;

    let search_resp = send_cmd(&mut tls, "A3", "SEARCH UNSEEN")?;
    let mut uids: Vec<&str> = Vec::new();
    for line in &search_resp {
        if line.starts_with("* SEARCH") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() > 2 {
                uids.extend_from_slice(&parts[2..]);
            }
        }
    }

    let mut results = Vec::new();
    let mut tag_counter = 4_u32;

    for uid in &uids {
        let fetch_tag = format!("A{tag_counter}");
        tag_counter += 1;
        let fetch_resp = send_cmd(&mut tls, &fetch_tag, &format!("FETCH {uid} RFC822"))?;

        let raw: String = fetch_resp
            .iter()
            .skip(1)
            .take(fetch_resp.len().saturating_sub(2))
            .cloned()
            .collect();

        if let Some(parsed) = MessageParser::default().parse(raw.as_bytes()) {
            let (sender, sender_name) = extract_sender(&parsed);
            let subject = parsed.subject().unwrap_or("(no subject)").to_string();
            let body = extract_text(&parsed);
            let message_id = parsed
                .message_id()
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("gen-{}", Uuid::new_v4()));

            let received_at = parsed
                .date()
                .and_then(|d| {
                    chrono::NaiveDate::from_ymd_opt(d.year as i32, u32::from(d.month), u32::from(d.day))
                        .and_then(|date| {
                            date.and_hms_opt(
                                u32::from(d.hour),
                                u32::from(d.minute),
                                u32::from(d.second),
                            )
                        })
                        .map(|naive| naive.and_utc())
                })
                .unwrap_or_else(Utc::now);

            results.push(FetchedEmail {
                message_id,
                sender,
                sender_name,
                subject,
                body,
                received_at,
            });
        }

        // Mark as seen so the next poll skips it.
        let store_tag = format!("A{tag_counter}");
        tag_counter += 1;
        let _ = send_cmd(&mut tls, &store_tag, &format!("STORE {uid} +FLAGS (\\Seen)"));
    }

    let logout_tag = format!("A{tag_counter}");
    let _ = send_cmd(&mut tls, &logout_tag, "LOGOUT");

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(entries: &[&str]) -> Vec<String> {
        entries.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn allowlist_empty_denies_all() {
        assert!(!is_sender_allowed(&[], "anyone@example.com"));
    }

    #[test]
    fn allowlist_wildcard_allows_all() {
        let allowed = list(&["*"]);
        assert!(is_sender_allowed(&allowed, "anyone@example.com"));
    }

    #[test]
    fn allowlist_exact_email_match() {
        let allowed = list(&["alex@agency.com"]);
        assert!(is_sender_allowed(&allowed, "alex@agency.com"));
        assert!(is_sender_allowed(&allowed, "ALEX@AGENCY.COM"));
        assert!(!is_sender_allowed(&allowed, "other@agency.com"));
    }

    #[test]
    fn allowlist_domain_with_at_prefix() {
        let allowed = list(&["@agency.com"]);
        assert!(is_sender_allowed(&allowed, "anyone@agency.com"));
        assert!(!is_sender_allowed(&allowed, "anyone@evil.com"));
    }

    #[test]
    fn allowlist_domain_without_at_prefix() {
        let allowed = list(&["agency.com"]);
        assert!(is_sender_allowed(&allowed, "recruiter@agency.com"));
        assert!(!is_sender_allowed(&allowed, "recruiter@notagency.org"));
    }

    #[test]
    fn allowlist_mixed_entries() {
        let allowed = list(&["@txt.att.net", "alex@agency.com"]);
        assert!(is_sender_allowed(&allowed, "4045551234@txt.att.net"));
        assert!(is_sender_allowed(&allowed, "alex@agency.com"));
        assert!(!is_sender_allowed(&allowed, "random@evil.com"));
    }

    #[test]
    fn strip_html_basic() {
        assert_eq!(strip_html("<p>Hello <b>world</b></p>"), "Hello world");
    }

    #[test]
    fn strip_html_with_attributes() {
        assert_eq!(
            strip_html(r#"<a href="https://x.example">link</a> text"#),
            "link text"
        );
    }

    #[test]
    fn strip_html_plain_text_passthrough() {
        assert_eq!(strip_html("just plain text"), "just plain text");
    }

    #[test]
    fn config_from_env_returns_none_without_host() {
        // Serialized by cargo's per-process test env; key must be unset.
        unsafe { std::env::remove_var("EMAIL_IMAP_HOST") };
        assert!(EmailConfig::from_env().is_none());
    }
}
