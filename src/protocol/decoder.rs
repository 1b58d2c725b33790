//! Reply decoder
//!
//! Accumulates incoming byte chunks and extracts complete frames.
//!
//! A transport chunk may hold a partial frame, exactly one frame, or several
//! frames back to back; the decoder yields the same frame sequence no matter
//! how the stream was split.

use bytes::{Buf, BytesMut};

use super::codec::decode_frame;
use super::Frame;
use crate::error::Result;

/// Default buffer capacity (16 KB)
const DEFAULT_CAPACITY: usize = 16 * 1024;

/// Streaming decoder for response frames
pub struct ReplyDecoder {
    /// Bytes received but not yet consumed as frames
    buffer: BytesMut,

    /// Largest body accepted before the stream is declared malformed
    max_body_size: u32,
}

impl ReplyDecoder {
    /// Create a decoder that rejects bodies larger than `max_body_size`
    pub fn new(max_body_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(DEFAULT_CAPACITY),
            max_body_size,
        }
    }

    /// Append a chunk to the buffer without decoding
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Extract the next complete frame from the buffer head.
    ///
    /// Returns `Ok(None)` when more bytes are needed; the partial frame stays
    /// buffered for the next [`push`](Self::push).
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        match decode_frame(&self.buffer, self.max_body_size)? {
            Some((frame, consumed)) => {
                self.buffer.advance(consumed);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }

    /// Append a chunk and extract every frame it completes
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Frame>> {
        self.push(chunk);

        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Number of buffered bytes not yet decoded
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any buffered bytes (new connection)
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}
