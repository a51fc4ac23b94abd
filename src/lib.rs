//! Room-scoped real-time chat client library
//!
//! Client side of a room-based chat service: one open room at a time,
//! each inbound message rendered exactly once however it arrives, optimistic
//! sends reconciled against server echoes, and debounced typing indicators.
//!
//! # Features
//! - Deterministic room names for direct chats and communities
//! - Join/leave with listener hygiene (one live listener per session)
//! - De-duplication across history replay, live push and local echo
//! - Optimistic sends with retraction on failure
//! - Typing indicators with debounce and silence expiry
//! - Rejoin on reconnect
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `RoomSession` is the synchronous core; it owns all session state
//! - `SessionDriver` is the actor task that feeds it commands, transport
//!   events, request completions and timer ticks
//! - `WsTransport` carries fire-and-forget signals, `HttpBackend` carries
//!   requests that need an answer
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//! use chat_room_client::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SessionConfig::default();
//!     let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_buffer);
//!     let registry = ListenerRegistry::new(inbound_tx);
//!     let transport = WsTransport::spawn("ws://127.0.0.1:8080/ws".into(), registry,
//!         std::time::Duration::from_secs(1), config.command_buffer);
//!     let backend = Arc::new(HttpBackend::new("http://127.0.0.1:8080",
//!         std::time::Duration::from_secs(10)).unwrap());
//!     let (observer, _updates) = ChannelObserver::new();
//!
//!     let session = RoomSession::new(UserId(3), transport, observer, &config);
//!     let (driver, handle) = SessionDriver::new(session, backend, inbound_rx, &config);
//!     tokio::spawn(driver.run());
//!
//!     handle.join_room(RoomId::direct(UserId(3), UserId(7))).await.unwrap();
//!     handle.send_message("hi").await.unwrap();
//! }
//! ```

pub mod backend;
pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod message;
pub mod observer;
pub mod room;
pub mod session;
pub mod transport;
pub mod types;
pub mod typing;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use backend::{Backend, HttpBackend};
pub use config::{ClientConfig, SessionConfig};
pub use connection::WsTransport;
pub use driver::{SessionCommand, SessionDriver, SessionHandle};
pub use error::{SessionError, TransportError};
pub use message::{ChatMessage, ClientSignal, MessageContent, OutgoingMessage, ServerEvent};
pub use observer::{ChannelObserver, SessionObserver, SessionUpdate};
pub use room::{ActiveRoom, RoomPhase};
pub use session::{Delivery, HistoryRequest, RoomSession, SessionState};
pub use transport::{InboundEvent, ListenerRegistry, Subscription, SubscriptionId, Transport};
pub use types::{CommunityId, DedupKey, MessageId, ProvisionalId, RoomId, UserId};
