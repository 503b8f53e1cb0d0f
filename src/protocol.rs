use crate::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Ask for simulated chat on this connection only
    Join { channel: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    ChatMessage {
        message: ChatPayload,
    },
    ChannelChanged {
        channel: ChannelName,
    },
    /// A comment was stored by the API layer
    NewComment {
        comment: Comment,
    },
    /// A reaction was stored by the API layer
    NewReaction {
        reaction: Reaction,
    },
    Error {
        code: String,
        msg: String,
    },
}

/// Chat line as sent to viewers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatPayload {
    pub username: String,
    pub message: String,
    pub channel: ChannelName,
    pub timestamp: DateTime<Utc>,
}

impl From<ChatEvent> for ChatPayload {
    fn from(event: ChatEvent) -> Self {
        Self {
            username: event.username,
            message: event.message,
            channel: event.channel,
            timestamp: event.timestamp,
        }
    }
}

impl From<ChatEvent> for ServerMessage {
    fn from(event: ChatEvent) -> Self {
        ServerMessage::ChatMessage {
            message: event.into(),
        }
    }
}
