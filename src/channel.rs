//! Messaging channel adapters
//!
//! An adapter turns a provider's webhook payload into channel-agnostic
//! [`InboundMessage`]s and implements [`crate::ports::MessagingPort`] for
//! replies. WhatsApp Cloud API is the only channel today.

mod whatsapp;

pub use whatsapp::{parse_webhook, WebhookPayload, WhatsAppClient};

use crate::flow::Message;
use crate::state::ChannelIdentity;

/// One user message pulled out of a webhook delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub identity: ChannelIdentity,
    pub message: Message,
    /// Provider message id, for log correlation
    pub message_id: Option<String>,
}
