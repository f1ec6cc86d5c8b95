//! WhatsApp Cloud API: webhook parsing and the outbound client

use super::InboundMessage;
use crate::flow::Message;
use crate::ports::{InteractiveAction, InteractiveMessage, MessagingError, MessagingPort};
use crate::state::ChannelIdentity;
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

// ============================================================================
// Webhook payload
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
struct Change {
    value: ChangeValue,
}

/// Status callbacks carry `statuses` and no `messages`
#[derive(Debug, Deserialize)]
struct ChangeValue {
    #[serde(default)]
    messages: Vec<WaMessage>,
}

#[derive(Debug, Deserialize)]
struct WaMessage {
    from: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<WaText>,
    #[serde(default)]
    interactive: Option<WaInteractive>,
    #[serde(default)]
    button: Option<WaTemplateButton>,
}

#[derive(Debug, Deserialize)]
struct WaText {
    body: String,
}

#[derive(Debug, Deserialize)]
struct WaInteractive {
    #[serde(default)]
    button_reply: Option<WaReply>,
    #[serde(default)]
    list_reply: Option<WaReply>,
}

#[derive(Debug, Deserialize)]
struct WaReply {
    id: String,
    #[serde(default)]
    title: String,
}

/// Quick-reply button on a template message
#[derive(Debug, Deserialize)]
struct WaTemplateButton {
    #[serde(default)]
    payload: Option<String>,
    text: String,
}

impl WaMessage {
    fn to_message(&self) -> Option<Message> {
        match self.kind.as_str() {
            "text" => self.text.as_ref().map(|t| Message::text(&t.body)),
            "interactive" => {
                let interactive = self.interactive.as_ref()?;
                if let Some(reply) = &interactive.button_reply {
                    Some(Message::button(&reply.id, &reply.title))
                } else {
                    interactive
                        .list_reply
                        .as_ref()
                        .map(|reply| Message::list_selection(&reply.id, &reply.title))
                }
            }
            "button" => self.button.as_ref().map(|b| {
                Message::button(b.payload.as_deref().unwrap_or(&b.text), &b.text)
            }),
            _ => None,
        }
    }
}

/// Every user message in a delivery, in payload order.
///
/// Status callbacks and unsupported message types (media, location) yield
/// nothing.
pub fn parse_webhook(payload: &WebhookPayload) -> Vec<InboundMessage> {
    payload
        .entry
        .iter()
        .flat_map(|entry| &entry.changes)
        .flat_map(|change| &change.value.messages)
        .filter_map(|wa| {
            let Some(message) = wa.to_message() else {
                tracing::debug!(from = %wa.from, kind = %wa.kind, "Ignoring unsupported message type");
                return None;
            };
            Some(InboundMessage {
                identity: ChannelIdentity::whatsapp(&wa.from),
                message,
                message_id: wa.id.clone(),
            })
        })
        .collect()
}

// ============================================================================
// Outbound client
// ============================================================================

pub struct WhatsAppClient {
    client: Client,
    messages_url: String,
    access_token: String,
}

impl WhatsAppClient {
    pub fn new(
        api_base: &str,
        phone_number_id: &str,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            messages_url: format!(
                "{}/{}/messages",
                api_base.trim_end_matches('/'),
                phone_number_id
            ),
            access_token: access_token.into(),
        })
    }

    async fn post(&self, recipient: &str, payload: Value) -> Result<(), MessagingError> {
        let response = self
            .client
            .post(&self.messages_url)
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| MessagingError::network(format!("Request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(to = %recipient, "Message delivered to WhatsApp");
            return Ok(());
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();
        Err(classify_error(status, retry_after, &body))
    }
}

fn classify_error(status: StatusCode, retry_after: Option<Duration>, body: &str) -> MessagingError {
    match status.as_u16() {
        401 | 403 => MessagingError::auth(format!("Authentication failed: {body}")),
        429 => {
            let err = MessagingError::rate_limit(format!("Rate limited: {body}"));
            match retry_after {
                Some(duration) => err.with_retry_after(duration),
                None => err,
            }
        }
        500..=599 => MessagingError::network(format!("Server error: {body}")),
        _ => MessagingError::rejected(format!("HTTP {status}: {body}")),
    }
}

fn text_payload(recipient: &str, text: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": recipient,
        "type": "text",
        "text": { "body": text },
    })
}

fn interactive_payload(recipient: &str, message: &InteractiveMessage) -> Value {
    let interactive = match &message.action {
        InteractiveAction::Buttons { buttons } => json!({
            "type": "button",
            "body": { "text": message.body },
            "action": {
                "buttons": buttons
                    .iter()
                    .map(|b| json!({ "type": "reply", "reply": { "id": b.id, "title": b.title } }))
                    .collect::<Vec<_>>(),
            },
        }),
        InteractiveAction::List { button, sections } => json!({
            "type": "list",
            "body": { "text": message.body },
            "action": { "button": button, "sections": sections },
        }),
    };

    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": recipient,
        "type": "interactive",
        "interactive": interactive,
    })
}

#[async_trait]
impl MessagingPort for WhatsAppClient {
    async fn send_text(&self, recipient: &str, text: &str) -> Result<(), MessagingError> {
        self.post(recipient, text_payload(recipient, text)).await
    }

    async fn send_interactive(
        &self,
        recipient: &str,
        message: &InteractiveMessage,
    ) -> Result<(), MessagingError> {
        self.post(recipient, interactive_payload(recipient, message))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{ListRow, ListSection, MessagingErrorKind, ReplyButton};

    fn payload(value: Value) -> WebhookPayload {
        serde_json::from_value(value).unwrap()
    }

    fn delivery(messages: Value) -> WebhookPayload {
        payload(json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "waba-1",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messaging_product": "whatsapp",
                        "metadata": { "phone_number_id": "123" },
                        "messages": messages,
                    },
                }],
            }],
        }))
    }

    #[test]
    fn test_text_message() {
        let inbound = parse_webhook(&delivery(json!([{
            "from": "263770000001",
            "id": "wamid.1",
            "timestamp": "1700000000",
            "type": "text",
            "text": { "body": "hi" },
        }])));

        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].identity, ChannelIdentity::whatsapp("263770000001"));
        assert_eq!(inbound[0].message, Message::text("hi"));
        assert_eq!(inbound[0].message_id.as_deref(), Some("wamid.1"));
    }

    #[test]
    fn test_button_and_list_replies() {
        let inbound = parse_webhook(&delivery(json!([
            {
                "from": "1",
                "type": "interactive",
                "interactive": { "type": "button_reply", "button_reply": { "id": "confirm", "title": "Yes" } },
            },
            {
                "from": "2",
                "type": "interactive",
                "interactive": { "type": "list_reply", "list_reply": { "id": "view_ledger", "title": "View ledger" } },
            },
        ])));

        assert_eq!(inbound[0].message, Message::button("confirm", "Yes"));
        assert_eq!(
            inbound[1].message,
            Message::list_selection("view_ledger", "View ledger")
        );
    }

    #[test]
    fn test_status_callback_has_no_messages() {
        let status = payload(json!({
            "entry": [{ "changes": [{ "value": { "statuses": [{ "id": "wamid.1", "status": "read" }] } }] }],
        }));
        assert!(parse_webhook(&status).is_empty());
        assert!(parse_webhook(&payload(json!({}))).is_empty());
    }

    #[test]
    fn test_unsupported_types_are_skipped() {
        let inbound = parse_webhook(&delivery(json!([
            { "from": "1", "type": "image", "image": { "id": "media-1" } },
            { "from": "1", "type": "text", "text": { "body": "menu" } },
        ])));
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].message, Message::text("menu"));
    }

    #[test]
    fn test_interactive_payload_shapes() {
        let buttons = interactive_payload(
            "1",
            &InteractiveMessage::buttons("Sure?", vec![ReplyButton::new("confirm", "Yes")]),
        );
        assert_eq!(buttons["interactive"]["type"], "button");
        assert_eq!(buttons["interactive"]["action"]["buttons"][0]["reply"]["id"], "confirm");

        let list = interactive_payload(
            "1",
            &InteractiveMessage::list(
                "Menu",
                "Options",
                vec![ListSection {
                    title: "Choose".into(),
                    rows: vec![ListRow::new("make_offer", "Make offer")],
                }],
            ),
        );
        assert_eq!(list["interactive"]["type"], "list");
        assert_eq!(list["interactive"]["action"]["button"], "Options");
        assert_eq!(
            list["interactive"]["action"]["sections"][0]["rows"][0]["id"],
            "make_offer"
        );
        assert!(list["interactive"]["action"]["sections"][0]["rows"][0]
            .get("description")
            .is_none());
    }

    #[test]
    fn test_error_classification() {
        let err = classify_error(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(9)), "");
        assert_eq!(err.kind, MessagingErrorKind::RateLimit);
        assert_eq!(err.retry_after, Some(Duration::from_secs(9)));
        assert_eq!(
            classify_error(StatusCode::UNAUTHORIZED, None, "").kind,
            MessagingErrorKind::Auth
        );
        assert_eq!(
            classify_error(StatusCode::BAD_REQUEST, None, "bad number").kind,
            MessagingErrorKind::Rejected
        );
    }
}
