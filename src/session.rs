//! Room session
//!
//! A client's participation in exactly one messaging room at a time: join and
//! leave transitions, inbound de-duplication, optimistic send reconciliation,
//! and typing indicators.
//!
//! The session does no I/O of its own beyond fire-and-forget emits. Requests
//! (history fetch, message submit) are handed back to the caller, which feeds
//! the results in later tagged with the join epoch or provisional id they
//! belong to. Time is passed in, so timers are deterministic.
//!
//! # State machine
//! `Idle` → `Joining` (join emitted, history pending) → `Active`, back to
//! `Joining` on room switch or reconnect, and to `Idle` on leave/teardown.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{SessionError, TransportError};
use crate::message::{ChatMessage, ClientSignal, MessageContent, OutgoingMessage, ServerEvent};
use crate::observer::SessionObserver;
use crate::room::ActiveRoom;
use crate::transport::{InboundEvent, Transport};
use crate::typing::{Keystroke, TypingState};
use crate::types::{DedupKey, MessageId, ProvisionalId, RoomId, UserId};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No active room
    Idle,
    /// Room joined, history not yet applied
    Joining,
    /// Room joined and live
    Active,
}

/// History fetch the caller must perform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryRequest {
    pub room: RoomId,
    /// Join epoch; pass back to [`RoomSession::history_loaded`]
    pub epoch: u64,
}

/// Outcome of an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Forwarded to the observer
    Rendered,
    /// Already in the ledger; suppressed
    Duplicate,
    /// Echo of our own optimistic send; reconciled without rendering
    Confirmed,
    /// Held until history has been applied
    Buffered,
    /// Not addressed to the active room; dropped
    OtherRoom,
    /// Missing required fields; dropped
    Malformed,
}

#[derive(Debug)]
struct PendingSend {
    room: RoomId,
    /// Sender and timestamp key of the local echo
    echo_key: DedupKey,
    /// Server id learned from the echo before the request completed
    confirmed: Option<MessageId>,
}

pub struct RoomSession<T, O> {
    self_id: UserId,
    transport: T,
    observer: O,
    active: Option<ActiveRoom>,
    /// De-duplication ledger for the active room
    seen: HashSet<DedupKey>,
    pending: HashMap<ProvisionalId, PendingSend>,
    typing: TypingState,
    epoch: u64,
}

impl<T: Transport, O: SessionObserver> RoomSession<T, O> {
    pub fn new(self_id: UserId, transport: T, observer: O, config: &SessionConfig) -> Self {
        Self {
            self_id,
            transport,
            observer,
            active: None,
            seen: HashSet::new(),
            pending: HashMap::new(),
            typing: TypingState::new(config.typing_debounce, config.typing_silence_timeout),
            epoch: 0,
        }
    }

    pub fn self_id(&self) -> UserId {
        self.self_id
    }

    pub fn state(&self) -> SessionState {
        match &self.active {
            None => SessionState::Idle,
            Some(room) if room.is_joining() => SessionState::Joining,
            Some(_) => SessionState::Active,
        }
    }

    pub fn active_room(&self) -> Option<RoomId> {
        self.active.as_ref().map(|room| room.id)
    }

    /// Check the de-duplication ledger
    pub fn is_seen(&self, key: &DedupKey) -> bool {
        self.seen.contains(key)
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Sends submitted but not yet completed
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Earliest instant at which [`poll_timers`](Self::poll_timers) has work
    pub fn next_deadline(&self) -> Option<Instant> {
        self.typing.next_deadline()
    }

    /// Join `room`, leaving the current room first
    ///
    /// Joining the room that is already active does nothing. Otherwise the
    /// old listener is dropped before the new one is registered, and the
    /// returned request must be fetched and fed to `history_loaded`.
    pub fn join_room(&mut self, room: RoomId) -> Option<HistoryRequest> {
        if self.active_room() == Some(room) {
            debug!("Already in {}, join ignored", room);
            return None;
        }

        if let Some(old) = self.active.take() {
            self.depart(old);
        }
        self.seen.clear();

        self.epoch += 1;
        let subscription = self.transport.subscribe(room);
        self.active = Some(ActiveRoom::new(room, self.epoch, subscription));
        self.emit_background(ClientSignal::Join { room });

        info!("User {} joining {}", self.self_id, room);
        self.observer.on_room_changed(Some(room));

        Some(HistoryRequest {
            room,
            epoch: self.epoch,
        })
    }

    /// Leave the active room; no-op when idle
    pub fn leave_room(&mut self) {
        let Some(old) = self.active.take() else {
            debug!("No active room to leave");
            return;
        };

        info!("User {} left {}", self.self_id, old.id);
        self.depart(old);
        self.seen.clear();
        self.observer.on_room_changed(None);
    }

    /// End the session
    pub fn teardown(&mut self) {
        self.leave_room();
        self.pending.clear();
    }

    /// Handle an event from the transport
    ///
    /// Returns a history request when the event forces a rejoin.
    pub fn handle_inbound(&mut self, event: InboundEvent, now: Instant) -> Option<HistoryRequest> {
        match event {
            InboundEvent::Server {
                subscription,
                event,
            } => {
                match &self.active {
                    Some(room) if room.owns(subscription) => {}
                    _ => {
                        debug!("Event from stale listener {} ignored", subscription);
                        return None;
                    }
                }
                self.handle_server_event(event, now);
                None
            }
            InboundEvent::Reconnected => self.rejoin(),
            InboundEvent::Disconnected => {
                warn!("Connection lost");
                self.typing.cancel_local();
                self.clear_remote_typing();
                None
            }
        }
    }

    fn handle_server_event(&mut self, event: ServerEvent, now: Instant) {
        let Some(active) = self.active_room() else {
            return;
        };
        if event.room() != active {
            debug!("Event for {} while in {}, dropped", event.room(), active);
            return;
        }

        match event {
            ServerEvent::NewMessage { message } => {
                self.receive_inbound(message);
            }
            ServerEvent::MessageHistory { messages, .. } => {
                debug!("History replay of {} messages for {}", messages.len(), active);
                for message in messages {
                    if self.accept(&message).is_ok() {
                        self.deliver(message);
                    }
                }
            }
            ServerEvent::UserTyping { user_id, .. } => {
                if user_id != self.self_id && self.typing.remote_started(user_id, now) {
                    self.observer.on_typing_changed(user_id, true);
                }
            }
            ServerEvent::UserStopTyping { user_id, .. } => {
                if user_id != self.self_id && self.typing.remote_stopped(user_id) {
                    self.observer.on_typing_changed(user_id, false);
                }
            }
            ServerEvent::ClearChat { room } => {
                info!("Chat in {} cleared", room);
                self.observer.on_chat_cleared(room);
            }
            ServerEvent::RoomStats {
                room,
                member_count,
                online_count,
            } => {
                self.observer.on_room_stats(room, member_count, online_count);
            }
        }
    }

    /// Process a message delivered for the active room
    ///
    /// Each message renders at most once per room, whichever path delivers it.
    pub fn receive_inbound(&mut self, message: ChatMessage) -> Delivery {
        if let Err(delivery) = self.accept(&message) {
            return delivery;
        }

        if let Some(room) = self.active.as_mut().filter(|room| room.is_joining()) {
            room.buffer(message);
            debug!("{} live messages held until history lands", room.buffered_count());
            return Delivery::Buffered;
        }
        self.deliver(message)
    }

    /// Room and payload checks shared by every inbound path
    fn accept(&self, message: &ChatMessage) -> Result<(), Delivery> {
        match self.active_room() {
            Some(room) if room == message.room => {}
            _ => {
                debug!("Message for {} outside active room dropped", message.room);
                return Err(Delivery::OtherRoom);
            }
        }
        if let Err(e) = message.validate() {
            warn!("Discarding inbound message: {}", e);
            return Err(Delivery::Malformed);
        }
        Ok(())
    }

    /// Apply the ledger and render
    fn deliver(&mut self, message: ChatMessage) -> Delivery {
        if let Some(provisional) = self.own_echo(&message) {
            self.reconcile_echo(provisional, &message);
            return Delivery::Confirmed;
        }

        let key = match message.dedup_key() {
            Ok(key) => key,
            Err(e) => {
                warn!("Discarding inbound message: {}", e);
                return Delivery::Malformed;
            }
        };
        if !self.seen.insert(key.clone()) {
            debug!("Duplicate {} suppressed", key);
            return Delivery::Duplicate;
        }

        if self.typing.remote_stopped(message.sender_id) {
            self.observer.on_typing_changed(message.sender_id, false);
        }
        self.observer.on_message_ready(&message);
        Delivery::Rendered
    }

    /// Match a server echo to one of our optimistic sends
    ///
    /// Echoes that carry no `client_ref` are matched on sender and timestamp
    /// against sends still waiting for their server id.
    fn own_echo(&self, message: &ChatMessage) -> Option<ProvisionalId> {
        if message.sender_id != self.self_id {
            return None;
        }
        if let Some(provisional) = message.client_ref {
            return self
                .seen
                .contains(&DedupKey::Provisional(provisional))
                .then_some(provisional);
        }

        let key = DedupKey::synthesized(self.self_id, message.timestamp.as_ref()?);
        self.pending
            .iter()
            .find(|(_, pending)| {
                pending.confirmed.is_none() && pending.room == message.room && pending.echo_key == key
            })
            .map(|(provisional, _)| *provisional)
    }

    fn reconcile_echo(&mut self, provisional: ProvisionalId, message: &ChatMessage) {
        let Some(id) = &message.id else {
            debug!("Echo of {} without id", provisional);
            return;
        };
        self.seen.insert(DedupKey::Server(id.clone()));

        if let Some(pending) = self.pending.get_mut(&provisional) {
            if pending.confirmed.is_none() {
                pending.confirmed = Some(id.clone());
                self.observer.on_message_confirmed(provisional, id);
            }
        }
        debug!("Echo {} reconciled with {}", id, provisional);
    }

    /// Apply a history fetch result
    ///
    /// Results for an earlier join epoch are ignored. A failed fetch is logged
    /// and the room goes live with whatever arrives next. Returns the number of
    /// messages rendered.
    pub fn history_loaded(
        &mut self,
        epoch: u64,
        result: Result<Vec<ChatMessage>, TransportError>,
    ) -> usize {
        let room = match &self.active {
            Some(room) if room.epoch == epoch && room.is_joining() => room.id,
            _ => {
                debug!("Stale history result for epoch {} ignored", epoch);
                return 0;
            }
        };

        let mut rendered = 0;
        match result {
            Ok(messages) => {
                for message in messages {
                    if self.accept(&message).is_ok() && self.deliver(message) == Delivery::Rendered {
                        rendered += 1;
                    }
                }
            }
            Err(e) => warn!("History fetch for {} failed: {}", room, e),
        }

        let buffered = match self.active.as_mut() {
            Some(active) => active.activate(),
            None => Vec::new(),
        };
        for message in buffered {
            if self.deliver(message) == Delivery::Rendered {
                rendered += 1;
            }
        }

        if let Some(active) = &self.active {
            info!(
                "Room {} active ({} messages, joined in {:?})",
                room,
                rendered,
                active.joined_at.elapsed()
            );
        }
        rendered
    }

    /// Render `content` optimistically and return the request to submit
    ///
    /// Also ends the local typing burst.
    pub fn begin_send(&mut self, content: MessageContent) -> Result<OutgoingMessage, SessionError> {
        let Some(room) = self.active_room() else {
            return Err(SessionError::NoActiveRoom);
        };

        let outgoing = OutgoingMessage {
            client_ref: ProvisionalId::new(),
            room,
            sender_id: self.self_id,
            content,
            timestamp: Utc::now(),
        };
        outgoing.local_echo().validate()?;

        if self.typing.cancel_local() {
            self.emit_background(ClientSignal::StopTyping {
                room,
                user_id: self.self_id,
            });
        }

        let echo_key = DedupKey::synthesized(self.self_id, &outgoing.timestamp);
        self.seen.insert(DedupKey::Provisional(outgoing.client_ref));
        self.seen.insert(echo_key.clone());
        self.pending.insert(
            outgoing.client_ref,
            PendingSend {
                room,
                echo_key,
                confirmed: None,
            },
        );
        self.observer.on_message_ready(&outgoing.local_echo());
        debug!("Optimistic send {} in {}", outgoing.client_ref, room);

        Ok(outgoing)
    }

    /// Apply the outcome of a submitted send
    ///
    /// On failure the optimistic render is retracted and the error returned.
    pub fn complete_send(
        &mut self,
        provisional: ProvisionalId,
        result: Result<MessageId, TransportError>,
    ) -> Result<MessageId, SessionError> {
        let pending = self.pending.remove(&provisional);
        let in_active_room = pending
            .as_ref()
            .is_some_and(|p| Some(p.room) == self.active_room());
        let echo_key = pending.as_ref().map(|p| p.echo_key.clone());

        match (result, pending) {
            (Ok(id), pending) => {
                if in_active_room {
                    self.seen.insert(DedupKey::Server(id.clone()));
                }
                let already_confirmed = pending.is_some_and(|p| p.confirmed.is_some());
                if !already_confirmed {
                    self.observer.on_message_confirmed(provisional, &id);
                }
                Ok(id)
            }
            (Err(e), Some(PendingSend {
                confirmed: Some(id),
                ..
            })) => {
                warn!("Send {} reported {} after server echo; keeping {}", provisional, e, id);
                Ok(id)
            }
            (Err(e), _) => {
                warn!("Send {} failed: {}", provisional, e);
                if in_active_room {
                    self.seen.remove(&DedupKey::Provisional(provisional));
                    if let Some(key) = &echo_key {
                        self.seen.remove(key);
                    }
                }
                self.observer.on_message_retracted(provisional);
                Err(SessionError::Transport(e))
            }
        }
    }

    /// Local keystroke
    ///
    /// Emits "typing" on the first keystroke of a burst and restarts the
    /// debounce timer on every keystroke.
    pub fn notify_typing(&mut self, now: Instant) {
        let Some(room) = self.active_room() else {
            debug!("Typing outside a room ignored");
            return;
        };

        if self.typing.keystroke(now) == Keystroke::Started {
            self.emit_background(ClientSignal::Typing {
                room,
                user_id: self.self_id,
            });
        }
    }

    /// Service expired timers
    pub fn poll_timers(&mut self, now: Instant) {
        if self.typing.expire_local(now) {
            if let Some(room) = self.active_room() {
                self.emit_background(ClientSignal::StopTyping {
                    room,
                    user_id: self.self_id,
                });
            }
        }

        for user in self.typing.expire_remote(now) {
            debug!("Typing indicator for {} expired", user);
            self.observer.on_typing_changed(user, false);
        }
    }

    /// Re-issue the join for the active room after a reconnect
    fn rejoin(&mut self) -> Option<HistoryRequest> {
        self.epoch += 1;
        let epoch = self.epoch;
        let room = {
            let active = self.active.as_mut()?;
            active.restart(epoch);
            active.id
        };

        self.typing.cancel_local();
        self.clear_remote_typing();
        self.emit_background(ClientSignal::Join { room });
        info!("Reconnected, rejoining {}", room);

        Some(HistoryRequest { room, epoch })
    }

    /// Leave-side effects for a room being abandoned
    fn depart(&mut self, old: ActiveRoom) {
        if self.typing.cancel_local() {
            self.emit_background(ClientSignal::StopTyping {
                room: old.id,
                user_id: self.self_id,
            });
        }
        self.clear_remote_typing();
        self.emit_background(ClientSignal::Leave { room: old.id });
        // Deregisters the old listener
        drop(old);
    }

    fn clear_remote_typing(&mut self) {
        for user in self.typing.clear_remote() {
            self.observer.on_typing_changed(user, false);
        }
    }

    fn emit_background(&self, signal: ClientSignal) {
        let name = signal.name();
        if let Err(e) = self.transport.emit(signal) {
            warn!("Failed to emit {}: {}", name, e);
        }
    }
}
