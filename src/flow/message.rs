//! Channel-agnostic inbound messages

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextBody {
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyKind {
    ButtonReply,
    ListReply,
}

/// A tapped button or a picked list row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractiveReply {
    pub kind: ReplyKind,
    pub id: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Text { text: TextBody },
    Interactive { interactive: InteractiveReply },
}

impl Message {
    pub fn text(body: impl Into<String>) -> Self {
        Message::Text {
            text: TextBody { body: body.into() },
        }
    }

    pub fn button(id: impl Into<String>, title: impl Into<String>) -> Self {
        Message::Interactive {
            interactive: InteractiveReply {
                kind: ReplyKind::ButtonReply,
                id: id.into(),
                title: title.into(),
            },
        }
    }

    pub fn list_selection(id: impl Into<String>, title: impl Into<String>) -> Self {
        Message::Interactive {
            interactive: InteractiveReply {
                kind: ReplyKind::ListReply,
                id: id.into(),
                title: title.into(),
            },
        }
    }

    /// Typed text, or the id of the selected button/row, trimmed
    pub fn reply_value(&self) -> &str {
        match self {
            Message::Text { text } => text.body.trim(),
            Message::Interactive { interactive } => interactive.id.trim(),
        }
    }
}

/// Words that restart a conversation from any step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Starts a conversation; the only thing accepted with no state
    Greeting,
    /// Drops the current flow and starts over
    Reset,
}

const GREETINGS: [&str; 4] = ["hi", "hello", "hey", "start"];
const RESETS: [&str; 4] = ["menu", "restart", "reset", "home"];

impl Command {
    pub fn parse(message: &Message) -> Option<Command> {
        let Message::Text { text } = message else {
            return None;
        };
        let word = text.body.trim().to_lowercase();
        if GREETINGS.contains(&word.as_str()) {
            Some(Command::Greeting)
        } else if RESETS.contains(&word.as_str()) {
            Some(Command::Reset)
        } else {
            None
        }
    }
}
