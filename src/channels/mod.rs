//! Channel transports — how messages physically arrive and leave.

pub mod email;
pub mod sms;

pub use email::{EmailConfig, EmailTransport};
pub use sms::SmsTransport;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::normalizer::RawMessage;

/// Identifier returned by a successful send.
pub type DeliveryId = String;

/// A polled inbound/outbound message channel.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch messages that arrived since the last poll. Transports
    /// handle their own dedupe; callers may still see replays across
    /// restarts and must dedupe by event ID.
    async fn fetch_new(&self) -> Result<Vec<RawMessage>, TransportError>;

    /// Send `body` to `recipient`. `subject` applies where the medium
    /// has one.
    async fn send(
        &self,
        recipient: &str,
        subject: Option<&str>,
        body: &str,
    ) -> Result<DeliveryId, TransportError>;

    /// Cheap reachability probe.
    async fn health_check(&self) -> Result<(), TransportError>;
}
