//! Connection Manager
//!
//! Owns the transport and drives the connection state machine:
//!
//! ```text
//!  Disconnected ──connect──▶ Connecting ──Connect──▶ Authenticating ──auth ok──┐
//!       ▲                                   │                                  ▼
//!       │                                   └──(no credentials)──────▶ ReadyChecking
//!       │                                                                      │ noop ok
//!       └──── Error / Close / End (retry timer) ◀──────────────────────── Ready ◀┘
//!
//!  quit / close() ──▶ Closing (no retry)
//! ```
//!
//! Every method runs to completion on the caller's thread. Continuations are
//! never invoked here; they are collected as [`Completion`]s and handed out
//! through [`ConnectionManager::take_completions`] so the caller can run them
//! after releasing whatever lock guards the manager.

use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam::channel::{Sender, TrySendError};

use super::{ClientEvent, Command, CommandQueue, Completion, ConnectionState, Handshake, OfflineQueue, RetryController};
use crate::config::Config;
use crate::error::{ClientError, Result};
use crate::network::{Transport, TransportEvent};
use crate::protocol::{encode_request, interpret_reply, Frame, ReplyDecoder, Request};

/// State machine for a single connection to a single server
pub struct ConnectionManager<T: Transport> {
    config: Config,
    transport: T,
    state: ConnectionState,

    /// Accumulates reply bytes across transport chunks
    decoder: ReplyDecoder,

    /// Written commands, in send order
    command_queue: CommandQueue,

    /// Commands issued while not ready
    offline_queue: OfflineQueue,

    retry: RetryController,

    /// Incremented on every transport connect
    connection_id: u64,

    /// Diagnostic token stamped on each request
    next_opaque: u32,

    /// Set by quit/close; suppresses reconnection
    closing: bool,

    /// `End` already emitted for this connection instance
    emitted_end: bool,

    /// Callers should pause until `Drain`
    should_buffer: bool,

    /// The transport reported a buffered write and has not drained yet
    write_backlogged: bool,

    events: Sender<ClientEvent>,
    completions: Vec<Completion>,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(config: Config, transport: T, events: Sender<ClientEvent>) -> Self {
        Self {
            decoder: ReplyDecoder::new(config.max_body_size),
            retry: RetryController::new(config.retry),
            config,
            transport,
            state: ConnectionState::Disconnected,
            command_queue: CommandQueue::new(),
            offline_queue: OfflineQueue::new(),
            connection_id: 0,
            next_opaque: 0,
            closing: false,
            emitted_end: false,
            should_buffer: false,
            write_backlogged: false,
            events,
            completions: Vec::new(),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    pub fn should_buffer(&self) -> bool {
        self.should_buffer
    }

    pub fn command_queue_len(&self) -> usize {
        self.command_queue.len()
    }

    pub fn offline_queue_len(&self) -> usize {
        self.offline_queue.len()
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn retry_deadline(&self) -> Option<Instant> {
        self.retry.deadline()
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry.current_delay()
    }

    pub fn retry_attempts(&self) -> u32 {
        self.retry.attempts()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Continuations collected since the last call, in resolution order
    pub fn take_completions(&mut self) -> Vec<Completion> {
        std::mem::take(&mut self.completions)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Begin the first connection attempt
    pub fn start(&mut self) {
        self.state = ConnectionState::Connecting;
        self.transport.connect(&self.config.host, self.config.port);
    }

    /// Fire the reconnect timer if it is due at `now`
    pub fn poll_retry(&mut self, now: Instant) {
        if !self.retry.fire(now) {
            return;
        }
        if self.closing {
            tracing::debug!("Retry timer fired while closing; not reconnecting");
            return;
        }

        tracing::debug!("Retrying connection to {}...", self.config.addr());
        self.state = ConnectionState::Connecting;
        self.transport.connect(&self.config.host, self.config.port);
    }

    /// Explicit close: no reconnection, every queued command fails
    pub fn close(&mut self) {
        tracing::debug!("Closing connection to {} on request", self.config.addr());
        self.closing = true;
        self.state = ConnectionState::Closing;
        self.retry.cancel();
        self.flush_and_error(|| ClientError::Closed);
        self.transport.close();
    }

    /// Process one transport event
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connect => self.on_connect(),
            TransportEvent::Data(bytes) => self.on_data(&bytes),
            TransportEvent::Error(message) => self.on_error(&message),
            TransportEvent::Close => self.connection_gone("close", None),
            TransportEvent::End => self.connection_gone("end", None),
            TransportEvent::Drain => self.on_drain(),
        }
    }

    // =========================================================================
    // Sending
    // =========================================================================

    /// Submit a command.
    ///
    /// Returns `Ok(true)` when the caller may keep sending, `Ok(false)` when
    /// it should pause until `Drain`. A command that can be neither sent nor
    /// queued fails through its continuation; without one the
    /// [`ClientError::NotWritable`] is returned instead.
    ///
    /// A command carrying a continuation never yields `Err`: every failure
    /// is routed through the continuation.
    pub fn send(&mut self, command: Command) -> Result<bool> {
        if self.state == ConnectionState::Closing {
            if command.has_callback() {
                self.fail(command, ClientError::Closed);
                return Ok(false);
            }
            return Err(ClientError::Closed);
        }

        let gate_open = self.is_ready() || command.is_priority();
        let writable = self.transport.is_writable();

        if !gate_open || !writable {
            if !writable {
                tracing::debug!("send command: stream is not writeable.");
            }

            if self.config.enable_offline_queue {
                tracing::debug!("Queueing {} for next server connection.", command.name());
                self.offline_queue.push(command);
                self.should_buffer = true;
            } else if command.has_callback() {
                self.fail(command, ClientError::NotWritable);
            } else {
                return Err(ClientError::NotWritable);
            }

            return Ok(false);
        }

        self.dispatch(command);
        Ok(!self.should_buffer)
    }

    /// Encode, enqueue and write a command. Returns false if the transport
    /// buffered the write.
    fn dispatch(&mut self, command: Command) -> bool {
        let opaque = self.next_opaque;
        self.next_opaque = self.next_opaque.wrapping_add(1);

        let bytes = encode_request(command.request(), self.config.default_expiration, opaque);

        if matches!(command.request(), Request::Quit) {
            self.closing = true;
        }

        tracing::trace!(
            "send {} id {}: {} ({} bytes)",
            self.config.addr(),
            self.connection_id,
            command.name(),
            bytes.len()
        );

        self.command_queue.push(command);
        let flushed = self.transport.write(bytes);

        if !flushed {
            self.write_backlogged = true;
        }
        if !flushed || self.command_queue.len() >= self.config.command_queue_high_water {
            self.should_buffer = true;
        }

        flushed
    }

    fn send_handshake(&mut self, request: Request, step: Handshake) {
        if let Err(e) = self.send(Command::handshake(request, step)) {
            tracing::error!("Failed to send {:?} handshake: {}", step, e);
            self.emit(ClientEvent::Error(e));
        }
    }

    fn send_offline_queue(&mut self) {
        let mut pending = std::mem::take(&mut self.offline_queue);

        let report = pending.drain(|command| {
            if !self.transport.is_writable() {
                return Err(command);
            }
            tracing::debug!("Sending offline command: {}", command.name());
            Ok(self.dispatch(command))
        });

        // Anything that could not be written keeps its place at the front
        pending.append(&mut self.offline_queue);
        self.offline_queue = pending;

        tracing::debug!(
            "Offline queue drained: {} sent, {} buffered, {} remaining",
            report.sent,
            report.buffered,
            self.offline_queue.len()
        );

        if report.buffered == 0
            && self.offline_queue.is_empty()
            && self.command_queue.len() < self.config.command_queue_high_water
        {
            self.should_buffer = false;
            self.emit(ClientEvent::Drain);
        }
    }

    // =========================================================================
    // Transport Events
    // =========================================================================

    fn on_connect(&mut self) {
        self.connection_id += 1;
        tracing::debug!(
            "Stream connected {} id {}",
            self.config.addr(),
            self.connection_id
        );

        self.emitted_end = false;
        self.write_backlogged = false;

        // Replies for commands written on a previous socket will never come
        for command in self.command_queue.take_all() {
            self.fail(
                command,
                ClientError::ConnectionGone("connection reset before reply".to_string()),
            );
        }

        self.transport.configure();
        self.decoder.reset();

        let credentials = self
            .config
            .credentials()
            .map(|(user, pass)| (Bytes::from(user.to_string()), Bytes::from(pass.to_string())));

        match credentials {
            Some((username, password)) => {
                tracing::debug!(
                    "Sending auth to {} id {}",
                    self.config.addr(),
                    self.connection_id
                );
                self.state = ConnectionState::Authenticating;
                self.send_handshake(Request::Auth { username, password }, Handshake::Auth);
            }
            None => {
                self.emit(ClientEvent::Connect);
                self.ready_check();
            }
        }
    }

    fn ready_check(&mut self) {
        tracing::debug!("checking server ready state...");
        self.state = ConnectionState::ReadyChecking;
        self.send_handshake(Request::Noop, Handshake::ReadyCheck);
    }

    fn on_ready(&mut self) {
        tracing::debug!("memcached client is ready.");
        self.state = ConnectionState::Ready;
        self.retry.reset();
        self.send_offline_queue();
        self.emit(ClientEvent::Ready);
    }

    fn on_data(&mut self, chunk: &[u8]) {
        self.decoder.push(chunk);

        loop {
            match self.decoder.next_frame() {
                Ok(Some(frame)) => self.return_reply(frame),
                Ok(None) => break,
                Err(e) => {
                    self.on_decode_error(e);
                    break;
                }
            }
        }
    }

    fn on_error(&mut self, message: &str) {
        if self.closing {
            tracing::debug!("Ignoring transport error while closing: {}", message);
            return;
        }

        let message = format!(
            "Memcached connection to {} failed - {}",
            self.config.addr(),
            message
        );
        tracing::debug!("{}", message);

        self.emit(ClientEvent::Error(ClientError::ConnectionFailed(message.clone())));
        self.connection_gone("error", Some(message));
    }

    /// Frame boundaries are lost; the connection cannot be salvaged
    fn on_decode_error(&mut self, error: ClientError) {
        tracing::error!("{}", error);

        let message = error.to_string();
        self.decoder.reset();
        self.transport.close();
        self.emit(ClientEvent::Error(error));
        self.connection_gone("error", Some(message));
    }

    fn on_drain(&mut self) {
        self.write_backlogged = false;
        self.should_buffer = false;
        self.emit(ClientEvent::Drain);
    }

    /// Single teardown path for error, close and end
    fn connection_gone(&mut self, why: &str, failure: Option<String>) {
        // A retry is already on its way
        if self.retry.is_pending() {
            return;
        }

        tracing::debug!("Memcached connection is gone from {} event.", why);
        self.state = ConnectionState::Disconnected;
        self.write_backlogged = false;

        if !self.emitted_end {
            self.emit(ClientEvent::End);
            self.emitted_end = true;
        }

        let gone = format!("Memcached connection gone from {} event.", why);
        self.flush_and_error(|| match &failure {
            Some(message) => ClientError::ConnectionFailed(message.clone()),
            None => ClientError::ConnectionGone(gone.clone()),
        });

        if self.closing {
            self.state = ConnectionState::Closing;
            tracing::debug!("connection ended from quit command, not retrying.");
            return;
        }

        if let Some(delay) = self.retry.schedule(Instant::now()) {
            tracing::debug!("Retry connection in {} ms", delay.as_millis());
            self.emit(ClientEvent::Reconnecting {
                delay,
                attempt: self.retry.attempts(),
            });
        }
    }

    // =========================================================================
    // Replies
    // =========================================================================

    fn return_reply(&mut self, frame: Frame) {
        let Some(command) = self.command_queue.shift() else {
            tracing::warn!(
                "Reply with no pending command (opcode 0x{:02x}, status 0x{:04x})",
                frame.header.opcode,
                frame.header.status
            );
            return;
        };

        let result = interpret_reply(&frame);

        match command.handshake_step() {
            Some(step) => self.on_handshake_reply(step, result),
            None => {
                if let Some(completion) = command.resolve(result) {
                    self.completions.push(completion);
                } else {
                    tracing::trace!("no callback for reply to {}", frame.header.opcode);
                }
            }
        }

        self.check_low_water();
    }

    fn on_handshake_reply(&mut self, step: Handshake, result: Result<Option<Bytes>>) {
        match (step, result) {
            (Handshake::Auth, Ok(_)) => {
                tracing::debug!(
                    "Auth succeeded {} id {}",
                    self.config.addr(),
                    self.connection_id
                );
                self.emit(ClientEvent::Connect);
                self.ready_check();
            }
            (Handshake::Auth, Err(e)) => {
                tracing::error!("Auth failed for {}: {}", self.config.addr(), e);
                self.emit(ClientEvent::Error(ClientError::AuthFailed(e.to_string())));
            }
            (Handshake::ReadyCheck, Ok(_)) => self.on_ready(),
            (Handshake::ReadyCheck, Err(e)) => {
                tracing::error!("Ready check failed for {}: {}", self.config.addr(), e);
                self.emit(ClientEvent::Error(ClientError::ReadyCheckFailed(e.to_string())));
            }
        }
    }

    /// Clear backpressure once a saturated command queue has emptied enough
    fn check_low_water(&mut self) {
        if self.should_buffer
            && self.is_ready()
            && !self.write_backlogged
            && self.offline_queue.is_empty()
            && self.command_queue.len() <= self.config.command_queue_low_water
        {
            self.should_buffer = false;
            self.emit(ClientEvent::Drain);
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn fail(&mut self, command: Command, error: ClientError) {
        if let Some(completion) = command.resolve(Err(error)) {
            self.completions.push(completion);
        }
    }

    /// Fail every queued command, offline queue first
    fn flush_and_error<F>(&mut self, error: F)
    where
        F: Fn() -> ClientError,
    {
        let offline = self.offline_queue.take_all();
        let in_flight = self.command_queue.take_all();

        for command in offline.into_iter().chain(in_flight) {
            self.fail(command, error());
        }
    }

    fn emit(&self, event: ClientEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::trace!("client event dropped, channel full: {:?}", event);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}
