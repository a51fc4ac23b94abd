//! Basic type definitions for the chat client
//!
//! Provides newtype wrappers for type safety:
//! - `UserId` / `CommunityId`: numeric backend identifiers
//! - `RoomId`: deterministic room name (`chat_<lo>_<hi>` or `community_<id>`)
//! - `MessageId`: server-assigned message identifier
//! - `ProvisionalId`: client-generated key for an optimistic send
//! - `DedupKey`: entry in the de-duplication ledger

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::SessionError;

/// Participant identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Community (group room) identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommunityId(pub u64);

impl fmt::Display for CommunityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Room identifier
///
/// Direct rooms are named from the ordered participant pair so both sides
/// derive the same name without a negotiation round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RoomId {
    /// 1:1 chat between two users (`lo <= hi`)
    Direct { lo: UserId, hi: UserId },
    /// Community group room
    Community(CommunityId),
}

impl RoomId {
    /// Room for a direct chat between `a` and `b`, in either order
    pub fn direct(a: UserId, b: UserId) -> Self {
        Self::Direct {
            lo: a.min(b),
            hi: a.max(b),
        }
    }

    /// Room for a community
    pub fn community(id: CommunityId) -> Self {
        Self::Community(id)
    }

    /// Check if a user is a participant of this direct room
    ///
    /// Always false for community rooms; membership there is server-side.
    pub fn is_direct_participant(&self, user: UserId) -> bool {
        match self {
            Self::Direct { lo, hi } => *lo == user || *hi == user,
            Self::Community(_) => false,
        }
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct { lo, hi } => write!(f, "chat_{}_{}", lo, hi),
            Self::Community(id) => write!(f, "community_{}", id),
        }
    }
}

impl FromStr for RoomId {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SessionError::InvalidRoomId(s.to_string());

        if let Some(rest) = s.strip_prefix("chat_") {
            let (lo, hi) = rest.split_once('_').ok_or_else(invalid)?;
            let lo: u64 = lo.parse().map_err(|_| invalid())?;
            let hi: u64 = hi.parse().map_err(|_| invalid())?;
            if lo > hi {
                return Err(invalid());
            }
            return Ok(Self::Direct {
                lo: UserId(lo),
                hi: UserId(hi),
            });
        }

        if let Some(rest) = s.strip_prefix("community_") {
            let id: u64 = rest.parse().map_err(|_| invalid())?;
            return Ok(Self::Community(CommunityId(id)));
        }

        Err(invalid())
    }
}

impl TryFrom<String> for RoomId {
    type Error = SessionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RoomId> for String {
    fn from(room: RoomId) -> Self {
        room.to_string()
    }
}

/// Server-assigned message identifier
///
/// The backend sends either strings or integers; both are kept as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Self(s),
            Raw::Number(n) => Self(n.to_string()),
        })
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-generated key of an optimistically rendered message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProvisionalId(pub Uuid);

impl ProvisionalId {
    /// Create a new random provisional ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProvisionalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProvisionalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// De-duplication ledger key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    /// Server-assigned id
    Server(MessageId),
    /// `sender|timestamp` for messages that arrive without an id
    Synthesized(String),
    /// Optimistic local copy awaiting acknowledgment
    Provisional(ProvisionalId),
}

impl DedupKey {
    /// Synthesize a key from sender and timestamp
    pub fn synthesized(sender: UserId, timestamp: &DateTime<Utc>) -> Self {
        Self::Synthesized(format!(
            "{}|{}",
            sender,
            timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
        ))
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server(id) => write!(f, "{}", id),
            Self::Synthesized(key) => write!(f, "{}", key),
            Self::Provisional(id) => write!(f, "local:{}", id),
        }
    }
}
