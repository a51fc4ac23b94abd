//! Rendering collaborator
//!
//! The session reports everything the UI needs through [`SessionObserver`].
//! [`ChannelObserver`] forwards each callback as a [`SessionUpdate`] over an
//! mpsc channel, for UIs running on their own task.

use tokio::sync::mpsc;

use crate::message::ChatMessage;
use crate::types::{MessageId, ProvisionalId, RoomId, UserId};

/// Callbacks invoked by the session, in delivery order
pub trait SessionObserver {
    /// A de-duplicated message is ready to render (once per message)
    fn on_message_ready(&mut self, message: &ChatMessage);

    /// An optimistic message was acknowledged with a server id
    fn on_message_confirmed(&mut self, _provisional: ProvisionalId, _id: &MessageId) {}

    /// An optimistic message failed and must be removed from the view
    fn on_message_retracted(&mut self, _provisional: ProvisionalId) {}

    /// A participant's typing indicator changed
    fn on_typing_changed(&mut self, user: UserId, is_typing: bool);

    /// The active room changed (`None` when no chat is open)
    fn on_room_changed(&mut self, room: Option<RoomId>);

    /// The room view was cleared server-side
    fn on_chat_cleared(&mut self, _room: RoomId) {}

    /// Room member/online counters changed
    fn on_room_stats(&mut self, _room: RoomId, _member_count: u32, _online_count: u32) {}
}

/// Observer callback as a value
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    MessageReady(ChatMessage),
    MessageConfirmed {
        provisional: ProvisionalId,
        id: MessageId,
    },
    MessageRetracted(ProvisionalId),
    TypingChanged {
        user: UserId,
        is_typing: bool,
    },
    RoomChanged(Option<RoomId>),
    ChatCleared(RoomId),
    RoomStats {
        room: RoomId,
        member_count: u32,
        online_count: u32,
    },
}

/// Observer forwarding updates over an unbounded channel
///
/// Updates are never dropped; a closed receiver means the UI is gone and
/// updates are discarded.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<SessionUpdate>,
}

impl ChannelObserver {
    /// Create an observer and the receiving end of its updates
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionUpdate>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn forward(&self, update: SessionUpdate) {
        let _ = self.sender.send(update);
    }
}

impl SessionObserver for ChannelObserver {
    fn on_message_ready(&mut self, message: &ChatMessage) {
        self.forward(SessionUpdate::MessageReady(message.clone()));
    }

    fn on_message_confirmed(&mut self, provisional: ProvisionalId, id: &MessageId) {
        self.forward(SessionUpdate::MessageConfirmed {
            provisional,
            id: id.clone(),
        });
    }

    fn on_message_retracted(&mut self, provisional: ProvisionalId) {
        self.forward(SessionUpdate::MessageRetracted(provisional));
    }

    fn on_typing_changed(&mut self, user: UserId, is_typing: bool) {
        self.forward(SessionUpdate::TypingChanged { user, is_typing });
    }

    fn on_room_changed(&mut self, room: Option<RoomId>) {
        self.forward(SessionUpdate::RoomChanged(room));
    }

    fn on_chat_cleared(&mut self, room: RoomId) {
        self.forward(SessionUpdate::ChatCleared(room));
    }

    fn on_room_stats(&mut self, room: RoomId, member_count: u32, online_count: u32) {
        self.forward(SessionUpdate::RoomStats {
            room,
            member_count,
            online_count,
        });
    }
}
