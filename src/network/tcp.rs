//! TCP transport
//!
//! [`Transport`] over `std::net::TcpStream`.
//!
//! ## Threads per connection
//! - connect: resolves and connects with a timeout, then hands off
//! - reader:  blocking reads, emits `Data`, then `End`/`Error` + `Close`
//! - writer:  drains a channel of outgoing buffers, emits `Drain`
//!
//! Every `connect`/`close` bumps a generation counter. Threads belonging to
//! an older generation stop emitting events, so a superseded socket can
//! never be mistaken for the current one.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use socket2::SockRef;

use super::{EventSink, Transport, TransportEvent};
use crate::config::Config;

/// Read buffer size per `read` call (16 KB)
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// An established socket and its writer channel
struct Link {
    stream: TcpStream,
    writer: Sender<Bytes>,
    pending: Arc<AtomicUsize>,
    backlogged: Arc<AtomicBool>,
}

/// Emits events only while its generation is current
#[derive(Clone)]
struct Guard {
    sink: EventSink,
    generation: Arc<AtomicU64>,
    mine: u64,
}

impl Guard {
    fn is_current(&self) -> bool {
        self.generation.load(Ordering::Acquire) == self.mine
    }

    fn emit(&self, event: TransportEvent) {
        if self.is_current() {
            self.sink.emit(event);
        } else {
            tracing::trace!("dropping stale transport event {:?}", event);
        }
    }
}

/// TCP transport for the memcached client
pub struct TcpTransport {
    sink: EventSink,
    connect_timeout: Duration,
    high_water: usize,
    generation: Arc<AtomicU64>,
    link: Arc<Mutex<Option<Link>>>,
}

impl TcpTransport {
    /// Create an unconnected transport reporting to `sink`
    pub fn new(sink: EventSink, config: &Config) -> Self {
        Self {
            sink,
            connect_timeout: config.connect_timeout,
            high_water: config.write_buffer_high_water.max(1),
            generation: Arc::new(AtomicU64::new(0)),
            link: Arc::new(Mutex::new(None)),
        }
    }

    fn guard(&self, mine: u64) -> Guard {
        Guard {
            sink: self.sink.clone(),
            generation: Arc::clone(&self.generation),
            mine,
        }
    }

    /// Shut down and forget the current socket, if any
    fn drop_link(&self) {
        if let Some(link) = self.link.lock().take() {
            // The peer may already be gone; nothing to report.
            let _ = link.stream.shutdown(Shutdown::Both);
        }
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self, host: &str, port: u16) {
        let mine = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.drop_link();

        let addr = format!("{}:{}", host, port);
        let timeout = self.connect_timeout;
        let guard = self.guard(mine);
        let link = Arc::clone(&self.link);

        tracing::debug!("Connecting to {} (generation {})", addr, mine);

        let spawned = thread::Builder::new()
            .name("memwire-connect".to_string())
            .spawn(move || match open(&addr, timeout) {
                Ok(stream) => {
                    if let Err(e) = establish(stream, &guard, &link) {
                        guard.emit(TransportEvent::Error(e.to_string()));
                        guard.emit(TransportEvent::Close);
                    }
                }
                Err(e) => {
                    tracing::debug!("Connect to {} failed: {}", addr, e);
                    guard.emit(TransportEvent::Error(e.to_string()));
                    guard.emit(TransportEvent::Close);
                }
            });

        if let Err(e) = spawned {
            let guard = self.guard(mine);
            guard.emit(TransportEvent::Error(e.to_string()));
            guard.emit(TransportEvent::Close);
        }
    }

    fn configure(&mut self) {
        let link = self.link.lock();
        let Some(link) = link.as_ref() else {
            return;
        };

        // Disable Nagle's algorithm for low latency
        if let Err(e) = link.stream.set_nodelay(true) {
            tracing::warn!("Failed to set TCP_NODELAY: {}", e);
        }
        if let Err(e) = SockRef::from(&link.stream).set_keepalive(true) {
            tracing::warn!("Failed to set SO_KEEPALIVE: {}", e);
        }
        // No idle timeout in either direction
        if let Err(e) = link.stream.set_read_timeout(None) {
            tracing::warn!("Failed to clear read timeout: {}", e);
        }
        if let Err(e) = link.stream.set_write_timeout(None) {
            tracing::warn!("Failed to clear write timeout: {}", e);
        }
    }

    fn write(&mut self, bytes: Bytes) -> bool {
        let link = self.link.lock();
        let Some(link) = link.as_ref() else {
            return false;
        };

        let len = bytes.len();
        let queued = link.pending.fetch_add(len, Ordering::AcqRel) + len;
        let over = queued >= self.high_water;
        if over {
            link.backlogged.store(true, Ordering::Release);
        }

        if link.writer.send(bytes).is_err() {
            link.pending.fetch_sub(len, Ordering::AcqRel);
            return false;
        }

        !over
    }

    fn is_writable(&self) -> bool {
        self.link.lock().is_some()
    }

    fn close(&mut self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.drop_link();
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Resolve `addr` and connect to the first address that accepts
fn open(addr: &str, timeout: Duration) -> std::io::Result<TcpStream> {
    let mut last_err = None;
    for socket_addr in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&socket_addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        std::io::Error::new(ErrorKind::AddrNotAvailable, format!("no addresses for {}", addr))
    }))
}

/// Spawn reader and writer threads for a fresh socket and publish it
fn establish(
    stream: TcpStream,
    guard: &Guard,
    link: &Arc<Mutex<Option<Link>>>,
) -> std::io::Result<()> {
    if !guard.is_current() {
        let _ = stream.shutdown(Shutdown::Both);
        return Ok(());
    }

    let read_stream = stream.try_clone()?;
    let write_stream = stream.try_clone()?;
    let (writer_tx, writer_rx) = channel::unbounded();
    let pending = Arc::new(AtomicUsize::new(0));
    let backlogged = Arc::new(AtomicBool::new(false));

    {
        let guard = guard.clone();
        let link = Arc::clone(link);
        thread::Builder::new()
            .name("memwire-reader".to_string())
            .spawn(move || read_loop(read_stream, guard, link))?;
    }
    {
        let guard = guard.clone();
        let pending = Arc::clone(&pending);
        let backlogged = Arc::clone(&backlogged);
        thread::Builder::new()
            .name("memwire-writer".to_string())
            .spawn(move || write_loop(write_stream, writer_rx, pending, backlogged, guard))?;
    }

    {
        let mut slot = link.lock();
        if !guard.is_current() {
            let _ = stream.shutdown(Shutdown::Both);
            return Ok(());
        }
        *slot = Some(Link {
            stream,
            writer: writer_tx,
            pending,
            backlogged,
        });
    }

    guard.emit(TransportEvent::Connect);
    Ok(())
}

fn read_loop(mut stream: TcpStream, guard: Guard, link: Arc<Mutex<Option<Link>>>) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    let failure = loop {
        match stream.read(&mut buf) {
            Ok(0) => break None,
            Ok(n) => guard.emit(TransportEvent::Data(Bytes::copy_from_slice(&buf[..n]))),
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => break Some(e),
        }
    };

    // The socket is unusable from here on
    if guard.is_current() {
        link.lock().take();
    }

    match failure {
        None => {
            tracing::debug!("Server closed the connection");
            guard.emit(TransportEvent::End);
        }
        Some(e) => {
            tracing::debug!("Read failed: {}", e);
            guard.emit(TransportEvent::Error(e.to_string()));
        }
    }
    guard.emit(TransportEvent::Close);
}

fn write_loop(
    mut stream: TcpStream,
    rx: Receiver<Bytes>,
    pending: Arc<AtomicUsize>,
    backlogged: Arc<AtomicBool>,
    guard: Guard,
) {
    for bytes in rx.iter() {
        if let Err(e) = stream.write_all(&bytes) {
            match e.kind() {
                ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
                    tracing::debug!("Write failed, peer went away: {}", e);
                }
                _ => tracing::warn!("Write failed: {}", e),
            }
            guard.emit(TransportEvent::Error(e.to_string()));
            return;
        }

        let left = pending.fetch_sub(bytes.len(), Ordering::AcqRel) - bytes.len();
        if left == 0 && backlogged.swap(false, Ordering::AcqRel) {
            guard.emit(TransportEvent::Drain);
        }
    }
}
