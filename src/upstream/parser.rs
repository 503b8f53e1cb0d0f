//! Upstream chat protocol line parser
//!
//! Frames are CRLF delimited and a single websocket message may carry several
//! of them. Anything that is not a keep-alive or a chat message is ignored.

use crate::types::{ChannelName, ChatEvent};

/// Host used in the pong reply when the server's ping carries no payload
pub const DEFAULT_PONG_HOST: &str = "tmi.twitch.tv";

/// Command keywords that carry a chat message
const CHAT_COMMANDS: &[&str] = &["PRIVMSG", "CHATMSG"];

/// Keep-alive request from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ping {
    pub payload: String,
}

impl Ping {
    /// Line to send back on the same connection
    pub fn reply(&self) -> String {
        let host = if self.payload.is_empty() {
            DEFAULT_PONG_HOST
        } else {
            self.payload.as_str()
        };
        format!("PONG :{}", host)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Ping(Ping),
    Chat(ChatEvent),
    Unrecognized,
}

/// Split a raw websocket payload into lines and parse each one.
///
/// Blank lines and unrecognized frames are dropped.
pub fn parse_payload(payload: &str) -> Vec<Frame> {
    payload
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(parse_line)
        .filter(|frame| *frame != Frame::Unrecognized)
        .collect()
}

/// Parse a single protocol line. Never fails; malformed input is `Unrecognized`.
pub fn parse_line(line: &str) -> Frame {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Frame::Unrecognized;
    }

    let ping = line
        .strip_prefix("PING")
        .filter(|rest| rest.is_empty() || rest.starts_with(' '));
    if let Some(rest) = ping {
        let payload = rest.trim_start();
        let payload = payload.strip_prefix(':').unwrap_or(payload);
        return Frame::Ping(Ping {
            payload: payload.trim().to_string(),
        });
    }

    parse_chat(line).map_or(Frame::Unrecognized, Frame::Chat)
}

/// `[@tags ]:<nick>!<ident>@<host> PRIVMSG #<channel> :<text>`
fn parse_chat(line: &str) -> Option<ChatEvent> {
    // Tags requested during capability negotiation precede the prefix
    let line = match line.strip_prefix('@') {
        Some(tagged) => tagged.split_once(' ')?.1,
        None => line,
    };

    let rest = line.strip_prefix(':')?;
    let (prefix, rest) = rest.split_once(' ')?;
    let (nick, user_host) = prefix.split_once('!')?;
    let (ident, host) = user_host.split_once('@')?;
    if !is_word(nick) || !is_word(ident) || host.is_empty() {
        return None;
    }

    let (command, rest) = rest.split_once(' ')?;
    if !CHAT_COMMANDS.contains(&command) {
        return None;
    }

    let rest = rest.strip_prefix('#')?;
    let (channel, text) = rest.split_once(' ')?;
    if !is_word(channel) {
        return None;
    }
    // Only the first colon after the channel token delimits the message
    let text = text.strip_prefix(':')?;
    if text.is_empty() {
        return None;
    }

    let channel = ChannelName::parse(channel)?;
    Some(ChatEvent::live(nick.to_string(), text.to_string(), channel))
}

fn is_word(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}
