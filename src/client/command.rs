//! In-flight command definitions
//!
//! A [`Command`] pairs a validated request with whoever waits for its reply.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use bytes::Bytes;

use crate::error::{ClientError, Result};
use crate::protocol::{CommandName, Request};

/// Caller continuation; consumed by the single invocation it receives
pub type Continuation = Box<dyn FnOnce(Result<Option<Bytes>>) + Send + 'static>;

/// Internal handshake steps issued ahead of the ready gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    Auth,
    ReadyCheck,
}

/// Who receives the reply
enum ReplyTo {
    Caller(Option<Continuation>),
    Handshake(Handshake),
}

/// A command waiting in the offline queue or the command queue
pub struct Command {
    request: Request,
    reply_to: ReplyTo,
}

impl Command {
    /// A caller command, optionally with a continuation
    pub fn new(request: Request, callback: Option<Continuation>) -> Self {
        Self {
            request,
            reply_to: ReplyTo::Caller(callback),
        }
    }

    /// A handshake command; it bypasses the ready gate
    pub fn handshake(request: Request, step: Handshake) -> Self {
        Self {
            request,
            reply_to: ReplyTo::Handshake(step),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn name(&self) -> CommandName {
        self.request.name()
    }

    /// Handshake commands may be sent before the connection is ready
    pub fn is_priority(&self) -> bool {
        matches!(self.reply_to, ReplyTo::Handshake(_))
    }

    pub fn handshake_step(&self) -> Option<Handshake> {
        match self.reply_to {
            ReplyTo::Handshake(step) => Some(step),
            ReplyTo::Caller(_) => None,
        }
    }

    pub fn has_callback(&self) -> bool {
        matches!(self.reply_to, ReplyTo::Caller(Some(_)))
    }

    /// Pair the caller's continuation with its result.
    ///
    /// Returns `None` for handshake commands and commands without a callback.
    pub fn resolve(self, result: Result<Option<Bytes>>) -> Option<Completion> {
        match self.reply_to {
            ReplyTo::Caller(Some(callback)) => Some(Completion { callback, result }),
            _ => None,
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("request", &self.request)
            .field("priority", &self.is_priority())
            .field("has_callback", &self.has_callback())
            .finish()
    }
}

/// A continuation ready to run, detached from any queue
pub struct Completion {
    callback: Continuation,
    result: Result<Option<Bytes>>,
}

impl Completion {
    pub fn new(callback: Continuation, result: Result<Option<Bytes>>) -> Self {
        Self { callback, result }
    }

    /// Run the continuation.
    ///
    /// A panicking continuation is caught and returned as
    /// [`ClientError::CallbackPanicked`] so the event path keeps running.
    pub fn deliver(self) -> Result<()> {
        let Completion { callback, result } = self;
        panic::catch_unwind(AssertUnwindSafe(move || callback(result)))
            .map_err(|payload| ClientError::CallbackPanicked(panic_message(payload)))
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").field("result", &self.result).finish()
    }
}

/// Best-effort text of a panic payload
fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else {
        format!("{:?}", payload)
    }
}
