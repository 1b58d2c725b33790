//! Network Module
//!
//! The transport the client drives, and its TCP implementation.
//!
//! ## Architecture
//! - Transports push tagged [`TransportEvent`]s into a channel
//! - One driver thread consumes them in arrival order
//! - Writes never block the caller; backlog is signalled instead

mod tcp;
mod transport;

pub use tcp::TcpTransport;
pub use transport::{EventSink, Transport, TransportEvent};
