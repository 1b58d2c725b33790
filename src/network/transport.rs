//! Transport contract
//!
//! The byte stream the client drives. Implementations report lifecycle
//! changes as [`TransportEvent`]s through an [`EventSink`]; the client
//! consumes them on a single event-processing path.

use bytes::Bytes;
use crossbeam::channel::Sender;

/// Lifecycle and data notifications emitted by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is established and writable
    Connect,

    /// Bytes arrived from the server
    Data(Bytes),

    /// The connection failed (refused, reset, timed out, ...)
    Error(String),

    /// The socket is fully closed
    Close,

    /// The server closed its side of the stream
    End,

    /// Previously buffered writes have been flushed
    Drain,
}

/// Sending half of the transport event channel
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<TransportEvent>,
}

impl EventSink {
    pub fn new(tx: Sender<TransportEvent>) -> Self {
        Self { tx }
    }

    /// Deliver an event; returns false once the client has gone away
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// A connection-oriented byte stream
pub trait Transport: Send + 'static {
    /// Start connecting. The outcome arrives later as `Connect`, or as
    /// `Error` followed by `Close`.
    fn connect(&mut self, host: &str, port: u16);

    /// Apply per-connection socket options: no packet delay, keep-alive,
    /// no idle timeout
    fn configure(&mut self);

    /// Queue bytes for sending.
    ///
    /// Returns false when the bytes were accepted but had to be buffered;
    /// a `Drain` event follows once the buffer empties.
    fn write(&mut self, bytes: Bytes) -> bool;

    /// Whether `write` currently reaches a connected socket
    fn is_writable(&self) -> bool;

    /// Tear the connection down; no further events are emitted for it
    fn close(&mut self);
}
