//! SMS transport over an email-to-SMS gateway.
//!
//! Inbound SMS arrives through the email transport (gateway messages
//! are re-threaded as `sms_<phone>` by the normalizer), so this
//! transport is outbound-only: it maps a phone number to
//! `<phone>@<gateway>` and rides the same SMTP path.

use async_trait::async_trait;

use crate::channels::email::EmailTransport;
use crate::channels::{ChannelTransport, DeliveryId};
use crate::error::TransportError;
use crate::normalizer::RawMessage;

/// Hard ceiling on one outbound SMS; carriers split beyond 160 but
/// gateways drop very long bodies.
const MAX_SMS_LEN: usize = 480;

pub struct SmsTransport {
    email: std::sync::Arc<EmailTransport>,
    gateway_domain: String,
}

impl SmsTransport {
    pub fn new(email: std::sync::Arc<EmailTransport>, gateway_domain: impl Into<String>) -> Self {
        Self {
            email,
            gateway_domain: gateway_domain.into(),
        }
    }

    /// Default gateway, overridable via `SMS_EMAIL_GATEWAY`.
    pub fn from_env(email: std::sync::Arc<EmailTransport>) -> Self {
        let domain = std::env::var("SMS_EMAIL_GATEWAY")
            .map(|v| v.trim_start_matches('@').to_string())
            .unwrap_or_else(|_| "txt.att.net".to_string());
        Self::new(email, domain)
    }

    /// Turn a phone number (or `sms_<phone>` thread id) into a gateway
    /// address.
    pub fn gateway_address(&self, phone: &str) -> Result<String, TransportError> {
        let digits: String = phone
            .trim_start_matches("sms_")
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();
        if digits.len() < 10 {
            return Err(TransportError::InvalidMessage(format!(
                "'{phone}' is not a usable phone number"
            )));
        }
        Ok(format!("{digits}@{}", self.gateway_domain))
    }
}

/// Clip a body to the SMS ceiling on a char boundary.
fn clip(body: &str) -> String {
    if body.chars().count() <= MAX_SMS_LEN {
        body.to_string()
    } else {
        body.chars().take(MAX_SMS_LEN - 1).collect::<String>() + "…"
    }
}

#[async_trait]
impl ChannelTransport for SmsTransport {
    fn name(&self) -> &str {
        "sms"
    }

    /// Inbound SMS rides the email transport; nothing to poll here.
    async fn fetch_new(&self) -> Result<Vec<RawMessage>, TransportError> {
        Ok(Vec::new())
    }

    async fn send(
        &self,
        recipient: &str,
        _subject: Option<&str>,
        body: &str,
    ) -> Result<DeliveryId, TransportError> {
        let address = self.gateway_address(recipient)?;
        // Gateways treat the subject as message text; keep it empty.
        self.email.send(&address, Some(""), &clip(body)).await
    }

    async fn health_check(&self) -> Result<(), TransportError> {
        self.email.health_check().await
    }
}
