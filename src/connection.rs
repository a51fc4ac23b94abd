//! WebSocket transport
//!
//! Maintains the socket connection: outbound signals are written as JSON
//! text frames, inbound frames are parsed and routed through the listener
//! registry. A lost connection is retried with a jittered delay, and the
//! session is told about the loss and the recovery.

use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::error::TransportError;
use crate::message::{ClientSignal, ServerEvent};
use crate::transport::{InboundEvent, ListenerRegistry, Subscription, Transport};
use crate::types::RoomId;

/// Why a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionExit {
    /// Socket closed or failed; reconnect
    Lost,
    /// Transport handle dropped; stop
    OutboundClosed,
    /// Session stopped receiving; stop
    SessionGone,
}

/// Socket transport handle
///
/// Dropping it stops the connection task.
#[derive(Debug)]
pub struct WsTransport {
    outbound: mpsc::Sender<ClientSignal>,
    registry: ListenerRegistry,
    abort_handle: AbortHandle,
}

impl WsTransport {
    /// Spawn the connection task for `url`
    pub fn spawn(
        url: String,
        registry: ListenerRegistry,
        reconnect_delay: Duration,
        buffer: usize,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(buffer);
        let handle = tokio::spawn(run_connection(
            url,
            outbound_rx,
            registry.clone(),
            reconnect_delay,
        ));

        Self {
            outbound: outbound_tx,
            registry,
            abort_handle: handle.abort_handle(),
        }
    }

    /// Stop the connection task
    pub fn stop(&self) {
        self.abort_handle.abort();
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Transport for WsTransport {
    fn emit(&self, signal: ClientSignal) -> Result<(), TransportError> {
        self.outbound.try_send(signal).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => TransportError::ChannelClosed,
        })
    }

    fn subscribe(&self, room: RoomId) -> Subscription {
        self.registry.subscribe(room)
    }
}

/// Connect, pump, and reconnect until the session goes away
async fn run_connection(
    url: String,
    mut outbound: mpsc::Receiver<ClientSignal>,
    registry: ListenerRegistry,
    reconnect_delay: Duration,
) {
    let mut connected_before = false;

    loop {
        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws_stream, _response)) => {
                info!("Connected to {}", url);
                if connected_before && registry.notify(InboundEvent::Reconnected).await.is_err() {
                    break;
                }
                connected_before = true;

                match pump(ws_stream, &mut outbound, &registry).await {
                    ConnectionExit::Lost => {
                        warn!("Connection to {} lost", url);
                        if registry.notify(InboundEvent::Disconnected).await.is_err() {
                            break;
                        }
                    }
                    ConnectionExit::OutboundClosed | ConnectionExit::SessionGone => break,
                }
            }
            Err(e) => warn!("Connection to {} failed: {}", url, e),
        }

        let delay = jittered(reconnect_delay);
        debug!("Reconnecting in {:?}", delay);
        tokio::time::sleep(delay).await;
    }

    debug!("Connection task for {} ended", url);
}

/// Bridge one live socket with the outbound channel and the registry
async fn pump(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    outbound: &mut mpsc::Receiver<ClientSignal>,
    registry: &ListenerRegistry,
) -> ConnectionExit {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            signal = outbound.recv() => {
                let Some(signal) = signal else {
                    let _ = ws_sender.close().await;
                    return ConnectionExit::OutboundClosed;
                };
                match send_signal(&mut ws_sender, &signal).await {
                    Ok(()) => {}
                    Err(e @ TransportError::Json(_)) => {
                        // Continue - don't break on serialization errors
                        error!("Failed to serialize {}: {}", signal.name(), e);
                    }
                    Err(e) => {
                        warn!("Failed to send {}: {}", signal.name(), e);
                        return ConnectionExit::Lost;
                    }
                }
            }
            frame = ws_receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerEvent>(&text) {
                            Ok(event) => {
                                if registry.dispatch(event).await.is_err() {
                                    return ConnectionExit::SessionGone;
                                }
                            }
                            Err(e) => warn!("Malformed payload from server: {}", e),
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!("Server sent close frame");
                        return ConnectionExit::Lost;
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        // Pong is handled automatically by tungstenite
                    }
                    Some(Ok(_)) => {
                        // Binary or other message types - ignore
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        return ConnectionExit::Lost;
                    }
                    None => return ConnectionExit::Lost,
                }
            }
        }
    }
}

/// Write one signal as a JSON text frame
async fn send_signal<S>(sink: &mut S, signal: &ClientSignal) -> Result<(), TransportError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let json = serde_json::to_string(signal)?;
    sink.send(Message::Text(json.into())).await?;
    Ok(())
}

/// `base` plus up to half of it again
fn jittered(base: Duration) -> Duration {
    let base_ms = base.as_millis() as u64;
    let extra = rand::thread_rng().gen_range(0..=base_ms / 2);
    Duration::from_millis(base_ms + extra)
}
