//! Client Module
//!
//! The connection/command lifecycle of the memcached client.
//!
//! ## Responsibilities
//! - Pipelined FIFO correlation of requests and replies
//! - Offline buffering while the connection is not ready
//! - Backpressure signalling (should-buffer / drain)
//! - Reconnection with exponential backoff
//!
//! ## Data Flow
//! ```text
//!   Client::send ──▶ ConnectionManager ──▶ encode ──▶ Transport
//!                          │   ▲
//!                 OfflineQueue │ CommandQueue.shift()
//!                              │
//!   Transport ──events──▶ driver ──▶ ReplyDecoder ──▶ continuation
//! ```

mod command;
mod facade;
mod manager;
mod queue;
mod retry;

use std::fmt;
use std::time::Duration;

use crate::error::ClientError;

pub use command::{Command, Completion, Continuation, Handshake};
pub use facade::Client;
pub use manager::ConnectionManager;
pub use queue::{CommandQueue, DrainReport, OfflineQueue};
pub use retry::RetryController;

/// Connection state, mutated only by the connection manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    ReadyChecking,
    Ready,
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::ReadyChecking => "ready-checking",
            ConnectionState::Ready => "ready",
            ConnectionState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Client-level notifications
#[derive(Debug)]
pub enum ClientEvent {
    /// The handshake started (after auth, when credentials are configured)
    Connect,

    /// The ready check passed and the offline queue was replayed
    Ready,

    /// The connection went away; emitted once per connection instance
    End,

    /// A reconnect is scheduled
    Reconnecting { delay: Duration, attempt: u32 },

    /// Backpressure cleared; callers may resume
    Drain,

    /// Client-level failure (transport, decode, auth, callback panic)
    Error(ClientError),
}
