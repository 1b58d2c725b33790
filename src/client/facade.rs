//! Client facade
//!
//! Public entry point. Validates calls, hands commands to the
//! [`ConnectionManager`], and runs a driver thread that serializes transport
//! events and the reconnect timer onto the manager.
//!
//! ## Concurrency Model
//! - All mutable state lives in one `ConnectionManager` behind one mutex
//! - Transport events are processed strictly in arrival order by the driver
//! - Continuations run after the mutex is released, so they may call back
//!   into the client

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use parking_lot::Mutex;

use super::{ClientEvent, Command, Completion, ConnectionManager, ConnectionState, Continuation};
use crate::config::Config;
use crate::error::{ClientError, Result};
use crate::network::{EventSink, TcpTransport, Transport, TransportEvent};
use crate::protocol::{Arg, CommandName, Request};

/// Capacity of the client event channel
const EVENT_CAPACITY: usize = 1024;

type Shared<T> = Arc<Mutex<ConnectionManager<T>>>;

/// A memcached client over a single pipelined connection
pub struct Client<T: Transport = TcpTransport> {
    shared: Shared<T>,
    events: Receiver<ClientEvent>,
    event_tx: Sender<ClientEvent>,
    shutdown: Option<Sender<()>>,
    driver: Option<JoinHandle<()>>,
}

impl Client<TcpTransport> {
    /// Connect to the server described by `config` over TCP.
    ///
    /// Returns immediately; commands issued before the connection is ready
    /// are queued (unless offline queueing is disabled).
    pub fn connect(config: Config) -> Result<Self> {
        Self::with_transport(config, TcpTransport::new)
    }
}

impl<T: Transport> Client<T> {
    /// Build a client over a custom transport
    pub fn with_transport<F>(config: Config, make_transport: F) -> Result<Self>
    where
        F: FnOnce(EventSink, &Config) -> T,
    {
        config.validate()?;

        let (transport_tx, transport_rx) = channel::unbounded();
        let (event_tx, event_rx) = channel::bounded(EVENT_CAPACITY);
        let (shutdown_tx, shutdown_rx) = channel::bounded(1);

        let transport = make_transport(EventSink::new(transport_tx), &config);
        tracing::info!("memwire client for {}", config.addr());

        let shared = Arc::new(Mutex::new(ConnectionManager::new(
            config,
            transport,
            event_tx.clone(),
        )));

        let driver = Driver {
            shared: Arc::clone(&shared),
            transport_events: transport_rx,
            shutdown: shutdown_rx,
            events: event_tx.clone(),
        };
        let handle = thread::Builder::new()
            .name("memwire-driver".to_string())
            .spawn(move || driver.run())?;

        with_manager(&shared, &event_tx, |m| m.start());

        Ok(Self {
            shared,
            events: event_rx,
            event_tx,
            shutdown: Some(shutdown_tx),
            driver: Some(handle),
        })
    }

    // =========================================================================
    // Generic Entry Point
    // =========================================================================

    /// Issue a command by name.
    ///
    /// Argument errors (unknown name, malformed arguments, a missing value on
    /// a write) go to `callback` synchronously and nothing is sent; without a
    /// callback they are returned as `Err`.
    ///
    /// `Ok(true)` means keep sending; `Ok(false)` means pause until
    /// [`ClientEvent::Drain`].
    pub fn send_command(
        &self,
        name: &str,
        args: Vec<Arg>,
        callback: Option<Continuation>,
    ) -> Result<bool> {
        let parsed = name
            .parse::<CommandName>()
            .and_then(|command| Request::parse(command, args));

        match parsed {
            Ok(request) => self.send_request(request, callback),
            Err(err) => {
                tracing::debug!("Rejected {} call: {}", name, err);
                match callback {
                    Some(callback) => {
                        deliver(vec![Completion::new(callback, Err(err))], &self.event_tx);
                        Ok(true)
                    }
                    None => Err(err),
                }
            }
        }
    }

    /// Issue an already validated request
    pub fn send_request(&self, request: Request, callback: Option<Continuation>) -> Result<bool> {
        let command = Command::new(request, callback);
        with_manager(&self.shared, &self.event_tx, |m| m.send(command))
    }

    /// Issue a command and block until its reply arrives or `timeout` passes
    pub fn call(&self, name: &str, args: Vec<Arg>, timeout: Duration) -> Result<Option<Bytes>> {
        let (tx, rx) = channel::bounded(1);
        let callback: Continuation = Box::new(move |result| {
            let _ = tx.send(result);
        });

        self.send_command(name, args, Some(callback))?;

        rx.recv_timeout(timeout).map_err(|_| ClientError::Timeout)?
    }

    // =========================================================================
    // Operations
    // =========================================================================

    pub fn get<F>(&self, key: impl Into<Arg>, callback: F) -> bool
    where
        F: FnOnce(Result<Option<Bytes>>) + Send + 'static,
    {
        self.issue(CommandName::Get, vec![key.into()], callback)
    }

    pub fn set<F>(&self, key: impl Into<Arg>, value: impl Into<Arg>, ttl: Option<u32>, callback: F) -> bool
    where
        F: FnOnce(Result<Option<Bytes>>) + Send + 'static,
    {
        self.issue(CommandName::Set, vec![key.into(), value.into(), ttl.into()], callback)
    }

    pub fn add<F>(&self, key: impl Into<Arg>, value: impl Into<Arg>, ttl: Option<u32>, callback: F) -> bool
    where
        F: FnOnce(Result<Option<Bytes>>) + Send + 'static,
    {
        self.issue(CommandName::Add, vec![key.into(), value.into(), ttl.into()], callback)
    }

    pub fn replace<F>(&self, key: impl Into<Arg>, value: impl Into<Arg>, ttl: Option<u32>, callback: F) -> bool
    where
        F: FnOnce(Result<Option<Bytes>>) + Send + 'static,
    {
        self.issue(CommandName::Replace, vec![key.into(), value.into(), ttl.into()], callback)
    }

    pub fn delete<F>(&self, key: impl Into<Arg>, callback: F) -> bool
    where
        F: FnOnce(Result<Option<Bytes>>) + Send + 'static,
    {
        self.issue(CommandName::Delete, vec![key.into()], callback)
    }

    /// Increment a counter; the reply value is the new 8-byte big-endian count
    pub fn increment<F>(&self, key: impl Into<Arg>, amount: u64, ttl: Option<u32>, callback: F) -> bool
    where
        F: FnOnce(Result<Option<Bytes>>) + Send + 'static,
    {
        self.issue(CommandName::Increment, vec![key.into(), amount.into(), ttl.into()], callback)
    }

    pub fn decrement<F>(&self, key: impl Into<Arg>, amount: u64, ttl: Option<u32>, callback: F) -> bool
    where
        F: FnOnce(Result<Option<Bytes>>) + Send + 'static,
    {
        self.issue(CommandName::Decrement, vec![key.into(), amount.into(), ttl.into()], callback)
    }

    pub fn append<F>(&self, key: impl Into<Arg>, value: impl Into<Arg>, callback: F) -> bool
    where
        F: FnOnce(Result<Option<Bytes>>) + Send + 'static,
    {
        self.issue(CommandName::Append, vec![key.into(), value.into()], callback)
    }

    pub fn prepend<F>(&self, key: impl Into<Arg>, value: impl Into<Arg>, callback: F) -> bool
    where
        F: FnOnce(Result<Option<Bytes>>) + Send + 'static,
    {
        self.issue(CommandName::Prepend, vec![key.into(), value.into()], callback)
    }

    /// Ask the server to close the connection; suppresses reconnection
    pub fn quit<F>(&self, callback: F) -> bool
    where
        F: FnOnce(Result<Option<Bytes>>) + Send + 'static,
    {
        self.issue(CommandName::Quit, Vec::new(), callback)
    }

    pub fn version<F>(&self, callback: F) -> bool
    where
        F: FnOnce(Result<Option<Bytes>>) + Send + 'static,
    {
        self.issue(CommandName::Version, Vec::new(), callback)
    }

    pub fn noop<F>(&self, callback: F) -> bool
    where
        F: FnOnce(Result<Option<Bytes>>) + Send + 'static,
    {
        self.issue(CommandName::Noop, Vec::new(), callback)
    }

    /// SASL PLAIN authentication on the current connection
    pub fn auth<F>(&self, username: impl Into<Arg>, password: impl Into<Arg>, callback: F) -> bool
    where
        F: FnOnce(Result<Option<Bytes>>) + Send + 'static,
    {
        self.issue(CommandName::Auth, vec![username.into(), password.into()], callback)
    }

    fn issue<F>(&self, name: CommandName, args: Vec<Arg>, callback: F) -> bool
    where
        F: FnOnce(Result<Option<Bytes>>) + Send + 'static,
    {
        let callback: Continuation = Box::new(callback);
        let request = match Request::parse(name, args) {
            Ok(request) => request,
            Err(err) => {
                tracing::debug!("Rejected {} call: {}", name, err);
                deliver(vec![Completion::new(callback, Err(err))], &self.event_tx);
                return true;
            }
        };

        // With a callback attached, failures are reported through it
        let outcome = self.send_request(request, Some(callback));
        debug_assert!(
            outcome.is_ok(),
            "send returned an error for a command with a continuation: {:?}",
            outcome
        );
        outcome.unwrap_or(false)
    }

    // =========================================================================
    // State
    // =========================================================================

    /// Client-level notifications
    pub fn events(&self) -> &Receiver<ClientEvent> {
        &self.events
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state()
    }

    pub fn is_ready(&self) -> bool {
        self.shared.lock().is_ready()
    }

    pub fn should_buffer(&self) -> bool {
        self.shared.lock().should_buffer()
    }

    pub fn command_queue_len(&self) -> usize {
        self.shared.lock().command_queue_len()
    }

    pub fn offline_queue_len(&self) -> usize {
        self.shared.lock().offline_queue_len()
    }

    /// Close the connection without reconnecting; queued commands fail
    pub fn close(&self) {
        with_manager(&self.shared, &self.event_tx, |m| m.close());
    }
}

impl<T: Transport> Drop for Client<T> {
    fn drop(&mut self) {
        with_manager(&self.shared, &self.event_tx, |m| m.close());

        // Disconnects the shutdown channel; the driver exits on its next wake
        self.shutdown.take();

        if let Some(handle) = self.driver.take() {
            // A continuation running on the driver may drop the last handle
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Single event-processing loop: transport events and the retry timer
struct Driver<T: Transport> {
    shared: Shared<T>,
    transport_events: Receiver<TransportEvent>,
    shutdown: Receiver<()>,
    events: Sender<ClientEvent>,
}

impl<T: Transport> Driver<T> {
    fn run(self) {
        tracing::debug!("driver started");

        loop {
            let timer = match self.shared.lock().retry_deadline() {
                Some(deadline) => channel::at(deadline),
                None => channel::never(),
            };

            select! {
                recv(self.transport_events) -> event => match event {
                    Ok(event) => {
                        tracing::trace!("transport event: {:?}", event);
                        with_manager(&self.shared, &self.events, |m| m.handle_event(event));
                    }
                    Err(_) => break,
                },
                recv(timer) -> _ => {
                    with_manager(&self.shared, &self.events, |m| m.poll_retry(Instant::now()));
                }
                recv(self.shutdown) -> _ => break,
            }
        }

        tracing::debug!("driver stopped");
    }
}

/// Run `f` under the lock, then deliver the continuations it produced
fn with_manager<T, R, F>(shared: &Mutex<ConnectionManager<T>>, events: &Sender<ClientEvent>, f: F) -> R
where
    T: Transport,
    F: FnOnce(&mut ConnectionManager<T>) -> R,
{
    let (out, completions) = {
        let mut manager = shared.lock();
        let out = f(&mut manager);
        (out, manager.take_completions())
    };

    deliver(completions, events);
    out
}

/// Run continuations; a panic becomes a client-level error event
fn deliver(completions: Vec<Completion>, events: &Sender<ClientEvent>) {
    for completion in completions {
        if let Err(err) = completion.deliver() {
            tracing::error!("{}", err);
            let _ = events.try_send(ClientEvent::Error(err));
        }
    }
}
