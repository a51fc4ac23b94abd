//! SessionDriver Actor implementation
//!
//! The single task that owns a `RoomSession`. UI commands, inbound transport
//! events, request completions, and timer expiries are all processed here
//! one at a time, so the session never needs a lock. Requests run on their
//! own tasks and report back through a completion channel.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::backend::Backend;
use crate::config::SessionConfig;
use crate::error::{SessionError, TransportError};
use crate::message::{ChatMessage, MessageContent};
use crate::observer::SessionObserver;
use crate::session::{HistoryRequest, RoomSession};
use crate::transport::{InboundEvent, Transport};
use crate::types::{MessageId, ProvisionalId, RoomId};

/// Commands sent from the UI to the SessionDriver actor
#[derive(Debug)]
pub enum SessionCommand {
    /// Switch to a room
    JoinRoom { room: RoomId },
    /// Close the current room
    LeaveRoom,
    /// Send a message; the reply arrives once the server answers
    SendMessage {
        content: MessageContent,
        reply: oneshot::Sender<Result<MessageId, SessionError>>,
    },
    /// Local keystroke
    Typing,
    /// Leave the room and stop the driver
    Shutdown,
}

/// Result of a request task
enum Completion {
    History {
        epoch: u64,
        result: Result<Vec<ChatMessage>, TransportError>,
    },
    Send {
        provisional: ProvisionalId,
        result: Result<MessageId, TransportError>,
        reply: oneshot::Sender<Result<MessageId, SessionError>>,
    },
}

/// Cloneable handle for talking to a running driver
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    async fn command(&self, cmd: SessionCommand) -> Result<(), SessionError> {
        self.commands.send(cmd).await.map_err(|_| SessionError::Closed)
    }

    pub async fn join_room(&self, room: RoomId) -> Result<(), SessionError> {
        self.command(SessionCommand::JoinRoom { room }).await
    }

    pub async fn leave_room(&self) -> Result<(), SessionError> {
        self.command(SessionCommand::LeaveRoom).await
    }

    /// Send a message and wait for the server's answer
    ///
    /// The message is rendered before this returns; on error it has already
    /// been retracted.
    pub async fn send_message(
        &self,
        content: impl Into<MessageContent>,
    ) -> Result<MessageId, SessionError> {
        let (reply, response) = oneshot::channel();
        self.command(SessionCommand::SendMessage {
            content: content.into(),
            reply,
        })
        .await?;
        response.await.map_err(|_| SessionError::Closed)?
    }

    pub async fn notify_typing(&self) -> Result<(), SessionError> {
        self.command(SessionCommand::Typing).await
    }

    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.command(SessionCommand::Shutdown).await
    }
}

/// The session actor
pub struct SessionDriver<T, O, B> {
    session: RoomSession<T, O>,
    backend: Arc<B>,
    commands: mpsc::Receiver<SessionCommand>,
    inbound: mpsc::Receiver<InboundEvent>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
}

impl<T, O, B> SessionDriver<T, O, B>
where
    T: Transport,
    O: SessionObserver,
    B: Backend,
{
    /// Create a driver and the handle that controls it
    pub fn new(
        session: RoomSession<T, O>,
        backend: Arc<B>,
        inbound: mpsc::Receiver<InboundEvent>,
        config: &SessionConfig,
    ) -> (Self, SessionHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer);
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        let driver = Self {
            session,
            backend,
            commands: cmd_rx,
            inbound,
            completions_tx,
            completions_rx,
        };
        (driver, SessionHandle { commands: cmd_tx })
    }

    /// Run the driver event loop
    ///
    /// Stops on `Shutdown` or when every handle is dropped, tearing the
    /// session down on the way out.
    pub async fn run(mut self) -> RoomSession<T, O> {
        info!("Session driver started for user {}", self.session.self_id());

        loop {
            let deadline = self.session.next_deadline();
            let timer = async move {
                match deadline {
                    Some(at) => sleep_until(Instant::from_std(at)).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd),
                },
                Some(event) = self.inbound.recv() => {
                    if let Some(request) = self.session.handle_inbound(event, now()) {
                        self.fetch_history(request);
                    }
                }
                Some(done) = self.completions_rx.recv() => self.handle_completion(done),
                _ = timer => self.session.poll_timers(now()),
            }
        }

        self.session.teardown();
        info!("Session driver for user {} shutting down", self.session.self_id());
        self.session
    }

    fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::JoinRoom { room } => {
                if let Some(request) = self.session.join_room(room) {
                    self.fetch_history(request);
                }
            }
            SessionCommand::LeaveRoom => self.session.leave_room(),
            SessionCommand::SendMessage { content, reply } => {
                match self.session.begin_send(content) {
                    Ok(outgoing) => {
                        let backend = Arc::clone(&self.backend);
                        let completions = self.completions_tx.clone();
                        tokio::spawn(async move {
                            let result = backend.send_message(&outgoing).await;
                            let _ = completions.send(Completion::Send {
                                provisional: outgoing.client_ref,
                                result,
                                reply,
                            });
                        });
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            SessionCommand::Typing => self.session.notify_typing(now()),
            SessionCommand::Shutdown => {}
        }
    }

    fn handle_completion(&mut self, done: Completion) {
        match done {
            Completion::History { epoch, result } => {
                self.session.history_loaded(epoch, result);
            }
            Completion::Send {
                provisional,
                result,
                reply,
            } => {
                let outcome = self.session.complete_send(provisional, result);
                if reply.send(outcome).is_err() {
                    debug!("Sender of {} no longer waiting", provisional);
                }
            }
        }
    }

    fn fetch_history(&self, request: HistoryRequest) {
        let backend = Arc::clone(&self.backend);
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = backend.fetch_history(&request.room).await;
            let _ = completions.send(Completion::History {
                epoch: request.epoch,
                result,
            });
        });
    }
}

/// Current time on the runtime clock (pausable in tests)
fn now() -> std::time::Instant {
    Instant::now().into_std()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::observer::{ChannelObserver, SessionUpdate};
    use crate::session::SessionState;
    use crate::testing::{message, RecordingTransport, StubBackend};
    use crate::types::UserId;

    struct Harness {
        handle: SessionHandle,
        transport: RecordingTransport,
        backend: StubBackend,
        updates: mpsc::UnboundedReceiver<SessionUpdate>,
        task: tokio::task::JoinHandle<RoomSession<RecordingTransport, ChannelObserver>>,
    }

    fn start() -> Harness {
        let (transport, inbound) = RecordingTransport::new();
        let (observer, updates) = ChannelObserver::new();
        let backend = StubBackend::default();
        let config = SessionConfig::default();
        let session = RoomSession::new(UserId(3), transport.clone(), observer, &config);
        let (driver, handle) = SessionDriver::new(session, Arc::new(backend.clone()), inbound, &config);

        Harness {
            handle,
            transport,
            backend,
            updates,
            task: tokio::spawn(driver.run()),
        }
    }

    fn room() -> RoomId {
        RoomId::direct(UserId(3), UserId(7))
    }

    async fn next_update(updates: &mut mpsc::UnboundedReceiver<SessionUpdate>) -> SessionUpdate {
        tokio::time::timeout(Duration::from_secs(5), updates.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_join_loads_history() {
        let mut h = start();
        h.backend.set_history(room(), vec![message("m1", 7, room(), "earlier")]);

        h.handle.join_room(room()).await.unwrap();

        assert_eq!(next_update(&mut h.updates).await, SessionUpdate::RoomChanged(Some(room())));
        match next_update(&mut h.updates).await {
            SessionUpdate::MessageReady(m) => assert_eq!(m.content.preview(), "earlier"),
            other => panic!("Unexpected update: {:?}", other),
        }

        h.handle.shutdown().await.unwrap();
        let session = h.task.await.unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(h.transport.names(), vec!["join", "leave"]);
    }

    #[tokio::test]
    async fn test_send_round_trip() {
        let mut h = start();
        h.handle.join_room(room()).await.unwrap();

        let id = h.handle.send_message("hello").await.unwrap();

        assert_eq!(id, MessageId::new("srv-1"));
        assert_eq!(h.backend.sent().len(), 1);
        assert_eq!(h.backend.sent()[0].room, room());

        let mut saw_confirm = false;
        while let Ok(update) = h.updates.try_recv() {
            if let SessionUpdate::MessageConfirmed { id, .. } = update {
                assert_eq!(id, MessageId::new("srv-1"));
                saw_confirm = true;
            }
        }
        assert!(saw_confirm);
    }

    #[tokio::test]
    async fn test_send_failure_surfaces_error() {
        let mut h = start();
        h.backend.set_failing_sends(true);
        h.handle.join_room(room()).await.unwrap();

        let err = h.handle.send_message("hello").await.unwrap_err();

        assert!(err.is_retriable());
        let mut retracted = false;
        while let Ok(update) = h.updates.try_recv() {
            if matches!(update, SessionUpdate::MessageRetracted(_)) {
                retracted = true;
            }
        }
        assert!(retracted);
    }

    #[tokio::test]
    async fn test_send_without_room() {
        let h = start();
        assert!(matches!(
            h.handle.send_message("hello").await,
            Err(SessionError::NoActiveRoom)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_debounce_through_driver() {
        let h = start();
        h.handle.join_room(room()).await.unwrap();

        for _ in 0..5 {
            h.handle.notify_typing().await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        assert_eq!(h.transport.names(), vec!["join", "typing"]);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(h.transport.names(), vec!["join", "typing", "stop_typing"]);
    }

    #[tokio::test]
    async fn test_dropping_handles_stops_driver() {
        let h = start();
        drop(h.handle);
        let session = h.task.await.unwrap();
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_closed_driver_reports_closed() {
        let h = start();
        h.handle.shutdown().await.unwrap();
        h.task.await.unwrap();

        assert!(matches!(
            h.handle.join_room(room()).await,
            Err(SessionError::Closed)
        ));
    }
}
