//! # memwire
//!
//! A memcached binary-protocol client over a single pipelined connection:
//! - Binary frame encoding and a streaming reply decoder
//! - FIFO request/response correlation
//! - Offline queueing while the connection is not ready
//! - Flow-control backpressure (should-buffer / drain)
//! - Automatic reconnection with exponential backoff
//!
//! ## Data Flow
//!
//! ```text
//!  caller threads                        driver thread
//!  ──────────────                        ─────────────
//!  Client::get/set/...                   select! {
//!    │ Request::parse                      transport events ──┐
//!    ▼                                     retry deadline ──┐ │
//!  Mutex<ConnectionManager>                shutdown          │ │
//!    │  state machine                    }                  │ │
//!    │  CommandQueue (FIFO, in flight) ◀── poll_retry ◀─────┘ │
//!    │  OfflineQueue (not Ready)         ◀── handle_event ◀───┘
//!    │  RetryController                        │
//!    │                                         ▼
//!    │ encode_request                    ReplyDecoder ── Frame ──▶ shift()
//!    ▼                                                              │
//!  Transport::write ──▶ TcpTransport                                ▼
//!                        reader ─ Data/End/Error/Close ─┐     Completion
//!                        writer ─ Drain ────────────────┤   (run after the
//!                                                       ▼    lock is released)
//!                                          crossbeam channel ──▶ driver
//!
//!  ClientEvent (Connect, Ready, Drain, End, Reconnecting, Error) ──▶ Client::events()
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use memwire::{Client, Config};
//!
//! let client = Client::connect(Config::builder().host("127.0.0.1").port(11211).build())?;
//! client.set("greeting", "hello", None, |result| {
//!     if let Err(e) = result {
//!         eprintln!("set failed: {}", e);
//!     }
//! });
//! # Ok::<(), memwire::ClientError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod network;
pub mod client;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{ClientError, Result};
pub use config::{Config, RetryConfig};
pub use client::{Client, ClientEvent, ConnectionState};
pub use protocol::Arg;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of memwire
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
