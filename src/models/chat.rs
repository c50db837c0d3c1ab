//! Chat message and response types.

use super::{MessageId, StoreItem};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// A human participant.
    #[default]
    User,
    /// A model or bot reply.
    Assistant,
    /// System-injected content.
    System,
}

impl ChatRole {
    /// Returns the role as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    /// Parses a role name (case-insensitive).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "user" => Some(Self::User),
            "assistant" | "bot" => Some(Self::Assistant),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatRole {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| crate::Error::InvalidInput(format!("unknown chat role: {s}")))
    }
}

/// A stored chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Unique identifier.
    pub id: MessageId,
    /// Session (connection) the message belongs to.
    pub session_id: String,
    /// Message text.
    pub content: String,
    /// Author role.
    pub role: ChatRole,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
}

impl StoreItem for ChatMessage {
    type Id = MessageId;

    const KIND: &'static str = "chat_message";

    fn id(&self) -> &MessageId {
        &self.id
    }
}

/// Discriminates normal replies from error replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    /// The message was accepted.
    Response,
    /// The message could not be processed.
    Error,
}

/// Reply sent back to a chat connection for every inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    /// Response kind, serialized as `type`.
    #[serde(rename = "type")]
    pub kind: ResponseKind,
    /// Human-readable reply.
    pub content: String,
    /// Number of messages received on this session so far.
    pub message_count: u64,
    /// Session the reply belongs to.
    pub session_id: String,
    /// Unix epoch milliseconds.
    pub timestamp: u64,
    /// Whether the inbound message carried audio.
    pub has_audio: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("user", Some(ChatRole::User))]
    #[test_case("ASSISTANT", Some(ChatRole::Assistant))]
    #[test_case(" system ", Some(ChatRole::System))]
    #[test_case("bot", Some(ChatRole::Assistant))]
    #[test_case("narrator", None)]
    fn test_role_parse(input: &str, expected: Option<ChatRole>) {
        assert_eq!(ChatRole::parse(input), expected);
    }

    #[test]
    fn test_role_from_str_error() {
        let err = "narrator".parse::<ChatRole>().unwrap_err();
        assert!(err.to_string().contains("unknown chat role"));
    }

    #[test]
    fn test_response_serializes_camel_case() {
        let response = ChatResponse {
            kind: ResponseKind::Response,
            content: "Message received: \"hi\"".to_string(),
            message_count: 3,
            session_id: "s1".to_string(),
            timestamp: 42,
            has_audio: false,
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["type"], "response");
        assert_eq!(json["messageCount"], 3);
        assert_eq!(json["sessionId"], "s1");
        assert_eq!(json["hasAudio"], false);
    }
}
