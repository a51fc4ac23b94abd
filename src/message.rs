//! Message protocol definitions
//!
//! JSON-based bidirectional message protocol using Serde's tagged enum
//! for type-safe serialization/deserialization, plus the chat message model
//! shared by the socket and HTTP paths.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::types::{DedupKey, MessageId, ProvisionalId, RoomId, UserId};

/// Message body: plain text or a shared file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Shared file metadata (the bytes live elsewhere)
    File {
        file_name: String,
        file_link: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_size: Option<u64>,
    },
    /// Plain text
    Text(String),
}

impl MessageContent {
    /// Short human-readable form for logs and terminal output
    pub fn preview(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::File { file_name, .. } => format!("[file] {}", file_name),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.trim().is_empty(),
            Self::File { file_link, .. } => file_link.is_empty(),
        }
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// Chat message as delivered by the server or rendered locally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Server-assigned id (absent on the optimistic local copy)
    #[serde(default)]
    pub id: Option<MessageId>,
    pub sender_id: UserId,
    pub room: RoomId,
    pub content: MessageContent,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Provisional id of the send this message acknowledges, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<ProvisionalId>,
}

impl ChatMessage {
    /// Ledger key: server id if present, else `sender|timestamp`
    ///
    /// Returns `MalformedPayload` when neither is available.
    pub fn dedup_key(&self) -> Result<DedupKey, SessionError> {
        if let Some(id) = &self.id {
            return Ok(DedupKey::Server(id.clone()));
        }
        match &self.timestamp {
            Some(ts) => Ok(DedupKey::synthesized(self.sender_id, ts)),
            None => Err(SessionError::MalformedPayload(format!(
                "message from {} in {} has neither id nor timestamp",
                self.sender_id, self.room
            ))),
        }
    }

    /// Check required fields
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.content.is_empty() {
            return Err(SessionError::MalformedPayload(format!(
                "empty content from {} in {}",
                self.sender_id, self.room
            )));
        }
        self.dedup_key().map(|_| ())
    }
}

/// Outbound message submitted through the request path
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingMessage {
    pub client_ref: ProvisionalId,
    pub room: RoomId,
    pub sender_id: UserId,
    pub content: MessageContent,
    pub timestamp: DateTime<Utc>,
}

impl OutgoingMessage {
    /// The optimistic local copy rendered before acknowledgment
    pub fn local_echo(&self) -> ChatMessage {
        ChatMessage {
            id: None,
            sender_id: self.sender_id,
            room: self.room,
            content: self.content.clone(),
            timestamp: Some(self.timestamp),
            client_ref: Some(self.client_ref),
        }
    }
}

/// Client → Server signal
///
/// Fire-and-forget events. Uses tagged enum with snake_case naming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientSignal {
    /// Subscribe to a room's broadcasts
    Join { room: RoomId },
    /// Unsubscribe from a room's broadcasts
    Leave { room: RoomId },
    /// Local user started typing
    Typing { room: RoomId, user_id: UserId },
    /// Local user stopped typing
    StopTyping { room: RoomId, user_id: UserId },
}

impl ClientSignal {
    /// Wire name of the signal
    pub fn name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Leave { .. } => "leave",
            Self::Typing { .. } => "typing",
            Self::StopTyping { .. } => "stop_typing",
        }
    }
}

/// Server → Client event
///
/// Every event names its room so listeners can be routed per room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Live message pushed to the room
    NewMessage { message: ChatMessage },
    /// History replay pushed over the socket
    MessageHistory {
        room: RoomId,
        messages: Vec<ChatMessage>,
    },
    /// Another participant is typing
    UserTyping { room: RoomId, user_id: UserId },
    /// Another participant stopped typing
    UserStopTyping { room: RoomId, user_id: UserId },
    /// Room view was cleared by an admin
    ClearChat { room: RoomId },
    /// Member/online counters changed
    RoomStats {
        room: RoomId,
        member_count: u32,
        online_count: u32,
    },
}

impl ServerEvent {
    /// Room this event is addressed to
    pub fn room(&self) -> RoomId {
        match self {
            Self::NewMessage { message } => message.room,
            Self::MessageHistory { room, .. }
            | Self::UserTyping { room, .. }
            | Self::UserStopTyping { room, .. }
            | Self::ClearChat { room }
            | Self::RoomStats { room, .. } => *room,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CommunityId;

    #[test]
    fn test_client_signal_serialize() {
        let msg = ClientSignal::Join {
            room: RoomId::direct(UserId(3), UserId(7)),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"join\""));
        assert!(json.contains("\"room\":\"chat_3_7\""));

        let msg = ClientSignal::StopTyping {
            room: RoomId::community(CommunityId(2)),
            user_id: UserId(3),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"stop_typing\""));
        assert!(json.contains("\"user_id\":3"));
    }

    #[test]
    fn test_new_message_deserialize() {
        let json = r#"{
            "type": "new_message",
            "message": {"id": 12, "sender_id": 3, "room": "chat_3_7",
                        "content": "hi", "timestamp": "2024-05-01T12:00:00Z"}
        }"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.room(), RoomId::direct(UserId(3), UserId(7)));
        match event {
            ServerEvent::NewMessage { message } => {
                assert_eq!(message.id, Some(MessageId::new("12")));
                assert_eq!(message.content, MessageContent::Text("hi".into()));
                assert!(message.client_ref.is_none());
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_file_content_deserialize() {
        let json = r#"{"file_name": "a.pdf", "file_link": "https://x/a.pdf", "file_size": 10}"#;
        let content: MessageContent = serde_json::from_str(json).unwrap();
        assert_eq!(content.preview(), "[file] a.pdf");
    }

    #[test]
    fn test_event_with_bad_room_rejected() {
        let json = r#"{"type": "clear_chat", "room": "lobby"}"#;
        assert!(serde_json::from_str::<ServerEvent>(json).is_err());
    }

    #[test]
    fn test_dedup_key_prefers_server_id() {
        let msg = ChatMessage {
            id: Some(MessageId::new("m1")),
            sender_id: UserId(3),
            room: RoomId::direct(UserId(3), UserId(7)),
            content: "hi".into(),
            timestamp: Some(Utc::now()),
            client_ref: None,
        };
        assert_eq!(msg.dedup_key().unwrap(), DedupKey::Server(MessageId::new("m1")));
    }

    #[test]
    fn test_validate_rejects_unkeyable_and_empty() {
        let mut msg = ChatMessage {
            id: None,
            sender_id: UserId(3),
            room: RoomId::direct(UserId(3), UserId(7)),
            content: "hi".into(),
            timestamp: None,
            client_ref: None,
        };
        assert!(matches!(msg.validate(), Err(SessionError::MalformedPayload(_))));

        msg.timestamp = Some(Utc::now());
        assert!(msg.validate().is_ok());

        msg.content = "   ".into();
        assert!(matches!(msg.validate(), Err(SessionError::MalformedPayload(_))));
    }
}
