//! Configuration
//!
//! `SessionConfig` holds the timer and buffer settings of a session.
//! `ClientConfig` is the command line of the terminal client; every flag
//! can also come from the environment.

use std::time::Duration;

use clap::Parser;

use crate::types::UserId;

/// Default debounce before emitting "stop typing"
pub const DEFAULT_TYPING_DEBOUNCE: Duration = Duration::from_millis(1000);

/// Default expiry of a remote typing indicator that is never refreshed
pub const DEFAULT_TYPING_SILENCE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default channel buffer size for session commands
pub const DEFAULT_COMMAND_BUFFER: usize = 256;

/// Default channel buffer size for inbound transport events
pub const DEFAULT_INBOUND_BUFFER: usize = 64;

/// Session timer and buffer settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Quiet period after the last keystroke before "stop typing"
    pub typing_debounce: Duration,
    /// Remote typing indicators expire after this much silence
    pub typing_silence_timeout: Duration,
    /// Command channel capacity of the driver
    pub command_buffer: usize,
    /// Inbound event channel capacity between transport and driver
    pub inbound_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            typing_debounce: DEFAULT_TYPING_DEBOUNCE,
            typing_silence_timeout: DEFAULT_TYPING_SILENCE_TIMEOUT,
            command_buffer: DEFAULT_COMMAND_BUFFER,
            inbound_buffer: DEFAULT_INBOUND_BUFFER,
        }
    }
}

/// Terminal chat client
#[derive(Debug, Clone, Parser)]
#[command(name = "chat_room_client", version, about = "Room-scoped terminal chat client")]
pub struct ClientConfig {
    /// Local user id
    #[arg(long, env = "CHAT_USER_ID")]
    pub user_id: u64,

    /// WebSocket endpoint for room signals
    #[arg(long, env = "CHAT_WS_URL", default_value = "ws://127.0.0.1:8080/ws")]
    pub ws_url: String,

    /// Base URL of the HTTP API
    #[arg(long, env = "CHAT_API_URL", default_value = "http://127.0.0.1:8080")]
    pub api_url: String,

    /// Timeout for HTTP requests, in seconds
    #[arg(long, env = "CHAT_REQUEST_TIMEOUT_SECS", default_value_t = 10)]
    pub request_timeout_secs: u64,

    /// Base delay before reconnecting the socket, in milliseconds
    #[arg(long, env = "CHAT_RECONNECT_DELAY_MS", default_value_t = 1000)]
    pub reconnect_delay_ms: u64,

    /// Typing debounce, in milliseconds
    #[arg(long, env = "CHAT_TYPING_DEBOUNCE_MS", default_value_t = 1000)]
    pub typing_debounce_ms: u64,
}

impl ClientConfig {
    pub fn user(&self) -> UserId {
        UserId(self.user_id)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Session settings derived from the command line
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            typing_debounce: Duration::from_millis(self.typing_debounce_ms),
            ..SessionConfig::default()
        }
    }
}
