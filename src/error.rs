//! Error types for the chat client
//!
//! Defines session-level errors and transport errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Session-level errors
///
/// Only user-initiated operations surface these. Background work (typing
/// signals, history fetches, join/leave emits) logs and degrades instead.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Operation requires a joined room
    #[error("No active room")]
    NoActiveRoom,

    /// Room id is not `chat_<lo>_<hi>` or `community_<id>`
    #[error("Invalid room id: {0}")]
    InvalidRoomId(String),

    /// Inbound message missing required fields
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Network/socket call rejected or timed out
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The session driver has shut down
    #[error("Session closed")]
    Closed,
}

impl SessionError {
    /// Whether the caller can offer a retry affordance
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retriable(),
            _ => false,
        }
    }
}

/// Transport errors
///
/// Covers both the socket channel and the HTTP request path.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The outbound channel has been closed (connection task gone)
    #[error("Channel closed")]
    ChannelClosed,

    /// The outbound channel is full
    #[error("Outbound queue full")]
    Backpressure,

    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// HTTP request error (connect, timeout, body)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("Rejected by server ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TransportError {
    /// Whether retrying the same request may succeed
    ///
    /// Client errors (4xx) and encoding errors will fail again unchanged.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Rejected { status, .. } => *status >= 500 || *status == 429,
            Self::Json(_) => false,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        assert!(TransportError::ChannelClosed.is_retriable());
        assert!(TransportError::Backpressure.is_retriable());
        assert!(TransportError::Rejected {
            status: 503,
            message: "busy".into()
        }
        .is_retriable());
        assert!(!TransportError::Rejected {
            status: 400,
            message: "bad".into()
        }
        .is_retriable());
    }

    #[test]
    fn test_session_error_retriable() {
        assert!(!SessionError::NoActiveRoom.is_retriable());
        assert!(SessionError::from(TransportError::ChannelClosed).is_retriable());
    }
}
