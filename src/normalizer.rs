//! Message normalizer — channel-specific events in, uniform events out.
//!
//! Email and SMS arrive as [`RawMessage`]s from the channel transports;
//! interview prompts arrive as [`InterviewPrompt`]s from the session
//! controller. Everything downstream of here sees only [`InboundEvent`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::Channel;

/// A channel-native inbound message, produced by a transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    /// Channel-native message ID (IMAP Message-ID, etc.).
    pub external_id: String,
    /// Sender address (email address or SMS gateway address).
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub content: String,
    pub received_at: DateTime<Utc>,
    /// Channel-stable thread hint (e.g. normalized subject) if the
    /// transport has one; falls back to the sender address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_hint: Option<String>,
}

/// A prompt surfaced by an active interview session that needs to flow
/// through the same pipeline as other inbound traffic (e.g. for
/// escalation review).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewPrompt {
    pub session_id: Uuid,
    pub thread_id: String,
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_snippet: Option<String>,
    pub observed_at: DateTime<Utc>,
}

/// Uniform inbound event consumed by the orchestrator pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Unique event ID (channel-native or generated).
    pub event_id: String,
    /// Conversation identity — opaque and channel-stable.
    pub thread_id: String,
    pub channel: Channel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub content: String,
    pub received_at: DateTime<Utc>,
    /// Set when this event originated from an interview session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
}

/// Converts channel-specific events into [`InboundEvent`]s.
pub struct Normalizer {
    /// Email domains that are SMS gateways ("txt.att.net", "vtext.com", …).
    sms_gateways: Vec<String>,
}

impl Normalizer {
    pub fn new(sms_gateways: Vec<String>) -> Self {
        Self { sms_gateways }
    }

    /// Default gateway list, extendable via `SMS_EMAIL_GATEWAY`.
    pub fn from_env() -> Self {
        let mut gateways = vec![
            "txt.att.net".to_string(),
            "vtext.com".to_string(),
            "tmomail.net".to_string(),
            "messaging.sprintpcs.com".to_string(),
        ];
        if let Ok(extra) = std::env::var("SMS_EMAIL_GATEWAY") {
            let domain = extra.trim_start_matches('@').to_string();
            if !domain.is_empty() && !gateways.contains(&domain) {
                gateways.push(domain);
            }
        }
        Self::new(gateways)
    }

    /// Normalize a message fetched from the email transport.
    ///
    /// Messages from SMS gateway domains are treated as SMS: the thread
    /// identity becomes `sms_<phone>` so replies ride the same gateway.
    pub fn normalize_email(&self, raw: RawMessage) -> InboundEvent {
        if let Some(phone) = self.sms_phone_from_sender(&raw.sender) {
            return InboundEvent {
                event_id: raw.external_id,
                thread_id: format!("sms_{phone}"),
                channel: Channel::Sms,
                sender: Some(raw.sender),
                subject: None,
                content: raw.content,
                received_at: raw.received_at,
                session_id: None,
            };
        }

        let hint = raw
            .thread_hint
            .clone()
            .unwrap_or_else(|| raw.sender.clone());
        InboundEvent {
            event_id: raw.external_id,
            thread_id: format!("email_{}", thread_key(&hint)),
            channel: Channel::Email,
            sender: Some(raw.sender),
            subject: raw.subject,
            content: raw.content,
            received_at: raw.received_at,
            session_id: None,
        }
    }

    /// Normalize an interview prompt into an inbound event.
    pub fn normalize_interview(&self, prompt: InterviewPrompt) -> InboundEvent {
        let content = match &prompt.code_snippet {
            Some(code) => format!("{}\n\n```\n{}\n```", prompt.question, code),
            None => prompt.question.clone(),
        };
        InboundEvent {
            event_id: format!("interview-{}-{}", prompt.session_id, Uuid::new_v4()),
            thread_id: prompt.thread_id,
            channel: Channel::Interview,
            sender: None,
            subject: None,
            content,
            received_at: prompt.observed_at,
            session_id: Some(prompt.session_id),
        }
    }

    /// Extract a phone number if the sender is an SMS gateway address.
    fn sms_phone_from_sender(&self, sender: &str) -> Option<String> {
        let (local, domain) = sender.split_once('@')?;
        if !self
            .sms_gateways
            .iter()
            .any(|g| domain.eq_ignore_ascii_case(g))
        {
            return None;
        }
        let digits: String = local.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() >= 10 { Some(digits) } else { None }
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Reduce a thread hint to a stable key: lowercase, "re:"/"fwd:" prefixes
/// stripped, non-alphanumerics collapsed to single underscores.
fn thread_key(hint: &str) -> String {
    let mut s = hint.trim().to_lowercase();
    loop {
        let stripped = s
            .trim_start_matches("re:")
            .trim_start_matches("fwd:")
            .trim_start_matches("fw:")
            .trim_start();
        if stripped == s {
            break;
        }
        s = stripped.to_string();
    }
    let mut key = String::with_capacity(s.len());
    let mut last_underscore = false;
    for ch in s.chars() {
        if ch.is_ascii_alphanumeric() {
            key.push(ch);
            last_underscore = false;
        } else if !last_underscore && !key.is_empty() {
            key.push('_');
            last_underscore = true;
        }
    }
    key.trim_end_matches('_').to_string()
}
