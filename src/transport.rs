//! Transport seam
//!
//! The session talks to the network through [`Transport`]: fire-and-forget
//! `emit` plus per-room listener registration. Listeners live in a
//! [`ListenerRegistry`] and are owned by [`Subscription`] handles, which
//! deregister themselves on drop. Dropping the old handle before creating a
//! new one guarantees a single live listener per session.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::TransportError;
use crate::message::{ClientSignal, ServerEvent};
use crate::types::RoomId;

/// Outbound side of a connection, as seen by the session
pub trait Transport {
    /// Fire-and-forget outbound signal
    fn emit(&self, signal: ClientSignal) -> Result<(), TransportError>;

    /// Register a listener for events addressed to `room`
    fn subscribe(&self, room: RoomId) -> Subscription;
}

/// Listener handle identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Event delivered from the transport to the session
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Server event routed through a room listener
    Server {
        subscription: SubscriptionId,
        event: ServerEvent,
    },
    /// Connection re-established after a loss
    Reconnected,
    /// Connection lost
    Disconnected,
}

#[derive(Debug)]
struct RegistryInner {
    next_id: u64,
    listeners: HashMap<SubscriptionId, RoomId>,
}

/// Room listener table shared by a transport and its subscriptions
///
/// All routed events go into one sink; each carries the id of the listener
/// that matched so stale deliveries can be told apart.
#[derive(Debug, Clone)]
pub struct ListenerRegistry {
    inner: Arc<Mutex<RegistryInner>>,
    sink: mpsc::Sender<InboundEvent>,
}

impl ListenerRegistry {
    /// Create a registry delivering into `sink`
    pub fn new(sink: mpsc::Sender<InboundEvent>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                next_id: 0,
                listeners: HashMap::new(),
            })),
            sink,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a listener for `room`
    pub fn subscribe(&self, room: RoomId) -> Subscription {
        let mut inner = self.lock();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.listeners.insert(id, room);
        debug!("Registered {} for {}", id, room);

        Subscription {
            id,
            room,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Number of live listeners
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Route a server event to every listener of its room
    ///
    /// Returns the number of listeners it was delivered to.
    pub async fn dispatch(&self, event: ServerEvent) -> Result<usize, TransportError> {
        let room = event.room();
        let targets: Vec<SubscriptionId> = self
            .lock()
            .listeners
            .iter()
            .filter(|(_, r)| **r == room)
            .map(|(id, _)| *id)
            .collect();

        if targets.is_empty() {
            debug!("No listener for {}, dropping event", room);
        }

        for subscription in &targets {
            self.sink
                .send(InboundEvent::Server {
                    subscription: *subscription,
                    event: event.clone(),
                })
                .await
                .map_err(|_| TransportError::ChannelClosed)?;
        }
        Ok(targets.len())
    }

    /// Deliver a connection-level event
    pub async fn notify(&self, event: InboundEvent) -> Result<(), TransportError> {
        self.sink
            .send(event)
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }
}

/// Live room listener
///
/// Deregisters itself from the registry on drop.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    room: RoomId,
    registry: Weak<Mutex<RegistryInner>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn room(&self) -> RoomId {
        self.room
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.listeners.remove(&self.id);
            debug!("Deregistered {} for {}", self.id, self.room);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CommunityId, UserId};

    fn typing(room: RoomId) -> ServerEvent {
        ServerEvent::UserTyping {
            room,
            user_id: UserId(7),
        }
    }

    #[test]
    fn test_subscription_drop_deregisters() {
        let (tx, _rx) = mpsc::channel(8);
        let registry = ListenerRegistry::new(tx);

        let sub = registry.subscribe(RoomId::direct(UserId(3), UserId(7)));
        assert_eq!(registry.listener_count(), 1);

        drop(sub);
        assert_eq!(registry.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_room() {
        let (tx, mut rx) = mpsc::channel(8);
        let registry = ListenerRegistry::new(tx);
        let room_a = RoomId::direct(UserId(3), UserId(7));
        let room_b = RoomId::community(CommunityId(1));

        let sub = registry.subscribe(room_a);

        assert_eq!(registry.dispatch(typing(room_b)).await.unwrap(), 0);
        assert_eq!(registry.dispatch(typing(room_a)).await.unwrap(), 1);

        match rx.try_recv().unwrap() {
            InboundEvent::Server { subscription, event } => {
                assert_eq!(subscription, sub.id());
                assert_eq!(event.room(), room_a);
            }
            other => panic!("Unexpected event: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_subscription_receives_nothing() {
        let (tx, mut rx) = mpsc::channel(8);
        let registry = ListenerRegistry::new(tx);
        let room = RoomId::direct(UserId(3), UserId(7));

        drop(registry.subscribe(room));
        let fresh = registry.subscribe(room);

        assert_eq!(registry.dispatch(typing(room)).await.unwrap(), 1);
        match rx.try_recv().unwrap() {
            InboundEvent::Server { subscription, .. } => assert_eq!(subscription, fresh.id()),
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_notify_fails_when_sink_closed() {
        let (tx, rx) = mpsc::channel(1);
        let registry = ListenerRegistry::new(tx);
        drop(rx);

        assert!(matches!(
            registry.notify(InboundEvent::Reconnected).await,
            Err(TransportError::ChannelClosed)
        ));
    }
}
