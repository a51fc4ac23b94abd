//! Active room state
//!
//! Represents the one room a session is currently joined to: its listener,
//! join epoch, phase, and live messages held back until history arrives.

use std::collections::VecDeque;
use std::time::Instant;

use crate::message::ChatMessage;
use crate::transport::{Subscription, SubscriptionId};
use crate::types::RoomId;

/// Join progress of the active room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    /// Join emitted, history not yet applied; live messages are buffered
    Joining,
    /// History applied, live messages render immediately
    Active,
}

/// Room the session is joined to
///
/// Owns the room listener; dropping the `ActiveRoom` deregisters it.
#[derive(Debug)]
pub struct ActiveRoom {
    /// Room identifier
    pub id: RoomId,
    /// Join attempt counter; async continuations carry the epoch they belong to
    pub epoch: u64,
    /// Current phase
    pub phase: RoomPhase,
    /// Live messages received while joining
    buffered: VecDeque<ChatMessage>,
    /// Room listener
    subscription: Subscription,
    /// Time of the (re)join
    pub joined_at: Instant,
}

impl ActiveRoom {
    /// Create a room in the joining phase
    pub fn new(id: RoomId, epoch: u64, subscription: Subscription) -> Self {
        Self {
            id,
            epoch,
            phase: RoomPhase::Joining,
            buffered: VecDeque::new(),
            subscription,
            joined_at: Instant::now(),
        }
    }

    /// Check if an inbound event came through this room's listener
    pub fn owns(&self, subscription: SubscriptionId) -> bool {
        self.subscription.id() == subscription
    }

    pub fn is_joining(&self) -> bool {
        self.phase == RoomPhase::Joining
    }

    /// Restart the join for a new epoch (reconnect)
    ///
    /// The listener is kept; it lives client-side and survives the socket.
    pub fn restart(&mut self, epoch: u64) {
        self.epoch = epoch;
        self.phase = RoomPhase::Joining;
        self.joined_at = Instant::now();
    }

    /// Hold a live message until history has been applied
    pub fn buffer(&mut self, message: ChatMessage) {
        self.buffered.push_back(message);
    }

    /// Finish joining, handing back buffered live messages in arrival order
    pub fn activate(&mut self) -> Vec<ChatMessage> {
        self.phase = RoomPhase::Active;
        self.buffered.drain(..).collect()
    }

    pub fn buffered_count(&self) -> usize {
        self.buffered.len()
    }
}
