//! Command queues
//!
//! Both queues are plain FIFOs. Correlation is positional: the command at
//! the head of the [`CommandQueue`] owns the next decoded reply.

use std::collections::VecDeque;

use super::Command;

/// Commands written to the transport and awaiting a reply
#[derive(Debug, Default)]
pub struct CommandQueue {
    entries: VecDeque<Command>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: Command) {
        self.entries.push_back(command);
    }

    /// Remove the oldest command
    pub fn shift(&mut self) -> Option<Command> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every command, oldest first
    pub fn take_all(&mut self) -> VecDeque<Command> {
        std::mem::take(&mut self.entries)
    }
}

/// Outcome of [`OfflineQueue::drain`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Commands handed to the sender
    pub sent: usize,

    /// Of those, how many were written but buffered by the transport
    pub buffered: usize,
}

/// Commands issued while the connection was not ready
#[derive(Debug, Default)]
pub struct OfflineQueue {
    entries: VecDeque<Command>,
}

impl OfflineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: Command) {
        self.entries.push_back(command);
    }

    /// Remove the oldest command
    pub fn shift(&mut self) -> Option<Command> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every command, oldest first
    pub fn take_all(&mut self) -> VecDeque<Command> {
        std::mem::take(&mut self.entries)
    }

    /// Move every command of `other` to the back of this queue
    pub fn append(&mut self, other: &mut OfflineQueue) {
        self.entries.append(&mut other.entries);
    }

    /// Re-submit every command in original order.
    ///
    /// `send` returns `Ok(true)` when the command was written, `Ok(false)`
    /// when it was written but buffered, and `Err(command)` when the
    /// transport is no longer writable. In that case the rejected command
    /// and everything behind it stay queued, in order.
    pub fn drain<F>(&mut self, mut send: F) -> DrainReport
    where
        F: FnMut(Command) -> std::result::Result<bool, Command>,
    {
        let mut report = DrainReport::default();

        while let Some(command) = self.entries.pop_front() {
            match send(command) {
                Ok(flushed) => {
                    report.sent += 1;
                    if !flushed {
                        report.buffered += 1;
                    }
                }
                Err(command) => {
                    self.entries.push_front(command);
                    break;
                }
            }
        }

        report
    }
}
