//! Messaging port: outbound text and interactive messages

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplyButton {
    pub id: String,
    pub title: String,
}

impl ReplyButton {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListRow {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ListRow {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListSection {
    pub title: String,
    pub rows: Vec<ListRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InteractiveAction {
    Buttons {
        buttons: Vec<ReplyButton>,
    },
    List {
        button: String,
        sections: Vec<ListSection>,
    },
}

/// A message with reply buttons or a selection list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InteractiveMessage {
    pub body: String,
    pub action: InteractiveAction,
}

impl InteractiveMessage {
    pub fn buttons(body: impl Into<String>, buttons: Vec<ReplyButton>) -> Self {
        Self {
            body: body.into(),
            action: InteractiveAction::Buttons { buttons },
        }
    }

    pub fn list(
        body: impl Into<String>,
        button: impl Into<String>,
        sections: Vec<ListSection>,
    ) -> Self {
        Self {
            body: body.into(),
            action: InteractiveAction::List {
                button: button.into(),
                sections,
            },
        }
    }
}

/// Record of one message a request produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Text {
        to: String,
        body: String,
    },
    Interactive {
        to: String,
        message: InteractiveMessage,
    },
}

impl OutboundMessage {
    pub fn body(&self) -> &str {
        match self {
            OutboundMessage::Text { body, .. } => body,
            OutboundMessage::Interactive { message, .. } => &message.body,
        }
    }
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct MessagingError {
    pub kind: MessagingErrorKind,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl MessagingError {
    pub fn new(kind: MessagingErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, duration: Duration) -> Self {
        self.retry_after = Some(duration);
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(MessagingErrorKind::Network, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(MessagingErrorKind::RateLimit, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(MessagingErrorKind::Auth, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(MessagingErrorKind::Rejected, message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessagingErrorKind {
    /// Transport failure or timeout
    Network,
    /// Provider throttled the sender (429)
    RateLimit,
    /// Credentials rejected (401, 403)
    Auth,
    /// Provider refused the message itself
    Rejected,
}

#[async_trait]
pub trait MessagingPort: Send + Sync {
    async fn send_text(&self, recipient: &str, text: &str) -> Result<(), MessagingError>;

    async fn send_interactive(
        &self,
        recipient: &str,
        message: &InteractiveMessage,
    ) -> Result<(), MessagingError>;
}

#[async_trait]
impl<T: MessagingPort + ?Sized> MessagingPort for Arc<T> {
    async fn send_text(&self, recipient: &str, text: &str) -> Result<(), MessagingError> {
        (**self).send_text(recipient, text).await
    }

    async fn send_interactive(
        &self,
        recipient: &str,
        message: &InteractiveMessage,
    ) -> Result<(), MessagingError> {
        (**self).send_interactive(recipient, message).await
    }
}
