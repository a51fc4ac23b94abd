//! Room-scoped chat client - Entry Point
//!
//! Connects the socket transport and HTTP backend, starts the session
//! driver, and reads commands from stdin:
//!
//! ```text
//! /join chat <friend_id>
//! /join community <community_id>
//! /join <room_id>
//! /leave
//! /quit
//! <anything else>   send as a message
//! ```

use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chat_room_client::{
    ChannelObserver, ClientConfig, CommunityId, HttpBackend, ListenerRegistry, RoomId,
    RoomSession, SessionDriver, SessionError, SessionUpdate, UserId, WsTransport,
};

/// Parsed stdin line
#[derive(Debug, PartialEq)]
enum Input {
    Join(RoomId),
    Leave,
    Quit,
    Text(String),
    Empty,
}

fn parse_input(line: &str, me: UserId) -> Result<Input, SessionError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Input::Empty);
    }
    if !line.starts_with('/') {
        return Ok(Input::Text(line.to_string()));
    }

    let parts: Vec<&str> = line.split_whitespace().collect();
    let invalid = || SessionError::InvalidRoomId(line.to_string());

    match parts.as_slice() {
        ["/join", "chat", friend] => {
            let friend: u64 = friend.parse().map_err(|_| invalid())?;
            Ok(Input::Join(RoomId::direct(me, UserId(friend))))
        }
        ["/join", "community", id] => {
            let id: u64 = id.parse().map_err(|_| invalid())?;
            Ok(Input::Join(RoomId::community(CommunityId(id))))
        }
        ["/join", room] => {
            let room: RoomId = room.parse()?;
            if matches!(room, RoomId::Direct { .. }) && !room.is_direct_participant(me) {
                return Err(invalid());
            }
            Ok(Input::Join(room))
        }
        ["/leave"] => Ok(Input::Leave),
        ["/quit"] => Ok(Input::Quit),
        _ => Ok(Input::Text(line.to_string())),
    }
}

fn render(update: SessionUpdate) {
    match update {
        SessionUpdate::MessageReady(message) => {
            let marker = if message.id.is_none() { " (sending)" } else { "" };
            println!("[{}] {}{}", message.sender_id, message.content.preview(), marker);
        }
        SessionUpdate::MessageConfirmed { id, .. } => println!("  ✓ delivered ({})", id),
        SessionUpdate::MessageRetracted(_) => println!("  ✗ not delivered"),
        SessionUpdate::TypingChanged { user, is_typing: true } => println!("  {} is typing...", user),
        SessionUpdate::TypingChanged { .. } => {}
        SessionUpdate::RoomChanged(Some(room)) => println!("== {} ==", room),
        SessionUpdate::RoomChanged(None) => println!("== no room =="),
        SessionUpdate::ChatCleared(room) => println!("-- {} cleared --", room),
        SessionUpdate::RoomStats {
            member_count,
            online_count,
            ..
        } => println!("  {} online / {} members", online_count, member_count),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chat_room_client=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("chat_room_client=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::parse();
    let me = config.user();
    let session_config = config.session_config();

    // Transport → session event channel
    let (inbound_tx, inbound_rx) = mpsc::channel(session_config.inbound_buffer);
    let registry = ListenerRegistry::new(inbound_tx);
    let transport = WsTransport::spawn(
        config.ws_url.clone(),
        registry,
        config.reconnect_delay(),
        session_config.command_buffer,
    );
    let backend = Arc::new(HttpBackend::new(&config.api_url, config.request_timeout())?);

    let (observer, mut updates) = ChannelObserver::new();
    let session = RoomSession::new(me, transport, observer, &session_config);
    let (driver, handle) = SessionDriver::new(session, backend, inbound_rx, &session_config);
    let driver_task = tokio::spawn(driver.run());

    tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            render(update);
        }
    });

    info!("User {} connected to {}", me, config.ws_url);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = match parse_input(&line, me) {
            Ok(input) => input,
            Err(e) => {
                error!("{}", e);
                continue;
            }
        };

        let result = match input {
            Input::Join(room) => handle.join_room(room).await,
            Input::Leave => handle.leave_room().await,
            Input::Quit => break,
            Input::Empty => Ok(()),
            Input::Text(text) => handle.send_message(text).await.map(|_| ()),
        };

        match result {
            Ok(()) => {}
            Err(SessionError::Closed) => break,
            Err(e) if e.is_retriable() => error!("{} (retry by sending again)", e),
            Err(e) => error!("{}", e),
        }
    }

    let _ = handle.shutdown().await;
    driver_task.await?;
    info!("Bye");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_join_commands() {
        let me = UserId(7);
        assert_eq!(
            parse_input("/join chat 3", me).unwrap(),
            Input::Join(RoomId::direct(UserId(3), UserId(7)))
        );
        assert_eq!(
            parse_input("/join community 12", me).unwrap(),
            Input::Join(RoomId::community(CommunityId(12)))
        );
        assert_eq!(
            parse_input("/join chat_1_7", me).unwrap(),
            Input::Join(RoomId::direct(UserId(1), UserId(7)))
        );
    }

    #[test]
    fn test_parse_invalid_room() {
        assert!(matches!(
            parse_input("/join chat x", UserId(1)),
            Err(SessionError::InvalidRoomId(_))
        ));
        assert!(matches!(
            parse_input("/join lobby", UserId(1)),
            Err(SessionError::InvalidRoomId(_))
        ));
        // Someone else's direct chat
        assert!(matches!(
            parse_input("/join chat_1_2", UserId(7)),
            Err(SessionError::InvalidRoomId(_))
        ));
    }

    #[test]
    fn test_parse_other_lines() {
        let me = UserId(1);
        assert_eq!(parse_input("  ", me).unwrap(), Input::Empty);
        assert_eq!(parse_input("/leave", me).unwrap(), Input::Leave);
        assert_eq!(parse_input("/quit", me).unwrap(), Input::Quit);
        assert_eq!(parse_input("hello", me).unwrap(), Input::Text("hello".into()));
        assert_eq!(parse_input("/shrug", me).unwrap(), Input::Text("/shrug".into()));
    }
}
