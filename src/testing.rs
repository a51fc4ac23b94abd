//! Test doubles shared by the unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::backend::Backend;
use crate::error::TransportError;
use crate::message::{ChatMessage, ClientSignal, OutgoingMessage};
use crate::transport::{InboundEvent, ListenerRegistry, Subscription, Transport};
use crate::types::{MessageId, RoomId, UserId};

/// Transport that records emitted signals
#[derive(Debug, Clone)]
pub struct RecordingTransport {
    pub registry: ListenerRegistry,
    emitted: Arc<Mutex<Vec<ClientSignal>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingTransport {
    pub fn new() -> (Self, mpsc::Receiver<InboundEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let transport = Self {
            registry: ListenerRegistry::new(tx),
            emitted: Arc::new(Mutex::new(Vec::new())),
            failing: Arc::new(AtomicBool::new(false)),
        };
        (transport, rx)
    }

    pub fn emitted(&self) -> Vec<ClientSignal> {
        self.emitted.lock().unwrap().clone()
    }

    /// Emitted signal names, in order
    pub fn names(&self) -> Vec<&'static str> {
        self.emitted().iter().map(ClientSignal::name).collect()
    }

    pub fn clear(&self) {
        self.emitted.lock().unwrap().clear();
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Transport for RecordingTransport {
    fn emit(&self, signal: ClientSignal) -> Result<(), TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed);
        }
        self.emitted.lock().unwrap().push(signal);
        Ok(())
    }

    fn subscribe(&self, room: RoomId) -> Subscription {
        self.registry.subscribe(room)
    }
}

/// Backend with canned history and configurable send outcome
#[derive(Debug, Clone, Default)]
pub struct StubBackend {
    history: Arc<Mutex<HashMap<RoomId, Vec<ChatMessage>>>>,
    failing_sends: Arc<AtomicBool>,
    next_id: Arc<AtomicU64>,
    sent: Arc<Mutex<Vec<OutgoingMessage>>>,
}

impl StubBackend {
    pub fn set_history(&self, room: RoomId, messages: Vec<ChatMessage>) {
        self.history.lock().unwrap().insert(room, messages);
    }

    pub fn set_failing_sends(&self, failing: bool) {
        self.failing_sends.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Backend for StubBackend {
    async fn fetch_history(&self, room: &RoomId) -> Result<Vec<ChatMessage>, TransportError> {
        Ok(self
            .history
            .lock()
            .unwrap()
            .get(room)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_message(&self, message: &OutgoingMessage) -> Result<MessageId, TransportError> {
        if self.failing_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected {
                status: 503,
                message: "unavailable".into(),
            });
        }
        self.sent.lock().unwrap().push(message.clone());
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MessageId::new(format!("srv-{}", n)))
    }
}

/// Server message with an id
pub fn message(id: &str, sender: u64, room: RoomId, text: &str) -> ChatMessage {
    ChatMessage {
        id: Some(MessageId::new(id)),
        sender_id: UserId(sender),
        room,
        content: text.into(),
        timestamp: Some(chrono::Utc::now()),
        client_ref: None,
    }
}
