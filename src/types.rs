use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque ID types for type safety
pub type SubscriberId = String;

/// Where a chat event came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ChatSource {
    Live,
    Simulated,
}

/// A single chat line, either read from the upstream feed or generated locally
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    pub username: String,
    pub message: String,
    pub channel: ChannelName,
    pub timestamp: DateTime<Utc>,
    pub source: ChatSource,
}

impl ChatEvent {
    pub fn live(username: String, message: String, channel: ChannelName) -> Self {
        Self {
            username,
            message,
            channel,
            timestamp: Utc::now(),
            source: ChatSource::Live,
        }
    }

    pub fn simulated(username: String, message: String, channel: ChannelName) -> Self {
        Self {
            username,
            message,
            channel,
            timestamp: Utc::now(),
            source: ChatSource::Simulated,
        }
    }
}

/// Lower-cased channel name without the leading `#`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelName(String);

impl ChannelName {
    /// Normalize a user supplied channel name.
    ///
    /// Returns `None` when nothing is left after trimming whitespace and a
    /// leading `#`, or when the name contains whitespace.
    pub fn parse(raw: &str) -> Option<Self> {
        let name = raw.trim();
        let name = name.strip_prefix('#').unwrap_or(name);
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return None;
        }
        Some(Self(name.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Upstream connection lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// A comment that was persisted elsewhere and is being announced to viewers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub username: String,
    pub message: String,
    pub tx_hash: String,
    pub timestamp: DateTime<Utc>,
}

/// A reaction that was persisted elsewhere and is being announced to viewers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub emoji_type: String,
    pub tx_hash: String,
    pub timestamp: DateTime<Utc>,
}
