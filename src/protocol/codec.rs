//! Protocol codec
//!
//! Pure encoding and decoding functions for the binary wire protocol.
//! No I/O and no buffering happen here.
//!
//! ## Header Format (24 bytes, big-endian)
//! ```text
//! ┌───────┬────────┬──────────┬──────────┬──────────┬─────────────────┐
//! │Magic 1│Opcode 1│KeyLen (2)│ExtLen (1)│DataType 1│Status/VBucket 2 │
//! ├───────┴────────┴──────────┴──────────┴──────────┴─────────────────┤
//! │ Total body length (4)  │  Opaque (4)  │          CAS (8)           │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The body follows as extras, key, value. The value length is whatever is
//! left of the total body length after extras and key.
//!
//! ### Extras by Command Type
//! - SET/ADD/REPLACE:        flags (4) + expiration (4)
//! - INCREMENT/DECREMENT:    amount (8) + initial (8) + expiration (4)
//! - everything else:        none

use bytes::{BufMut, Bytes, BytesMut};

use super::{Frame, Header, Opcode, Request, REQUEST_MAGIC, RESPONSE_MAGIC};
use crate::error::{ClientError, Result};

/// Header size in bytes
pub const HEADER_SIZE: usize = 24;

/// SASL mechanism used for authentication
pub const SASL_MECHANISM: &str = "PLAIN";

// =============================================================================
// Encoding
// =============================================================================

/// Encode a frame to bytes.
///
/// The header's length fields are written as stored; use the
/// [`Frame::request`]/[`Frame::response`] constructors to keep them
/// consistent with the sections.
pub fn encode_frame(frame: &Frame) -> Bytes {
    let header = &frame.header;
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + header.total_body_length as usize);

    buf.put_u8(header.magic);
    buf.put_u8(header.opcode);
    buf.put_u16(header.key_length);
    buf.put_u8(header.extras_length);
    buf.put_u8(header.data_type);
    buf.put_u16(header.status);
    buf.put_u32(header.total_body_length);
    buf.put_u32(header.opaque);
    buf.put_u64(header.cas);

    buf.extend_from_slice(&frame.extras);
    buf.extend_from_slice(&frame.key);
    buf.extend_from_slice(&frame.value);

    buf.freeze()
}

/// Build the request frame for a command
///
/// `default_expiration` is used by store and counter commands that carry
/// no explicit TTL.
pub fn request_frame(request: &Request, default_expiration: u32, opaque: u32) -> Frame {
    let empty = Bytes::new;

    match request {
        Request::Get { key } => Frame::request(Opcode::Get, key.clone(), empty(), empty(), opaque),
        Request::Delete { key } => {
            Frame::request(Opcode::Delete, key.clone(), empty(), empty(), opaque)
        }
        Request::Set { key, value, expiration }
        | Request::Add { key, value, expiration }
        | Request::Replace { key, value, expiration } => {
            let extras = store_extras(0, expiration.unwrap_or(default_expiration));
            Frame::request(request.opcode(), key.clone(), extras, value.clone(), opaque)
        }
        Request::Increment { key, amount, expiration }
        | Request::Decrement { key, amount, expiration } => {
            let extras = counter_extras(*amount, 0, expiration.unwrap_or(default_expiration));
            Frame::request(request.opcode(), key.clone(), extras, empty(), opaque)
        }
        Request::Append { key, value } | Request::Prepend { key, value } => {
            Frame::request(request.opcode(), key.clone(), empty(), value.clone(), opaque)
        }
        Request::Quit | Request::Noop | Request::Version => {
            Frame::request(request.opcode(), empty(), empty(), empty(), opaque)
        }
        Request::Auth { username, password } => {
            let mut value = BytesMut::with_capacity(2 + username.len() + password.len());
            value.put_u8(0);
            value.extend_from_slice(username);
            value.put_u8(0);
            value.extend_from_slice(password);
            Frame::request(
                Opcode::SaslAuth,
                Bytes::from_static(SASL_MECHANISM.as_bytes()),
                empty(),
                value.freeze(),
                opaque,
            )
        }
    }
}

/// Encode a command straight to wire bytes
pub fn encode_request(request: &Request, default_expiration: u32, opaque: u32) -> Bytes {
    encode_frame(&request_frame(request, default_expiration, opaque))
}

/// Extras for SET/ADD/REPLACE: flags (4) + expiration (4)
pub fn store_extras(flags: u32, expiration: u32) -> Bytes {
    let mut extras = BytesMut::with_capacity(8);
    extras.put_u32(flags);
    extras.put_u32(expiration);
    extras.freeze()
}

/// Extras for INCREMENT/DECREMENT: amount (8) + initial (8) + expiration (4)
pub fn counter_extras(amount: u64, initial: u64, expiration: u32) -> Bytes {
    let mut extras = BytesMut::with_capacity(20);
    extras.put_u64(amount);
    extras.put_u64(initial);
    extras.put_u32(expiration);
    extras.freeze()
}

// =============================================================================
// Decoding
// =============================================================================

/// Parse the fixed header from the first [`HEADER_SIZE`] bytes.
///
/// Returns `None` when fewer bytes are available.
pub fn decode_header(bytes: &[u8]) -> Option<Header> {
    if bytes.len() < HEADER_SIZE {
        return None;
    }

    Some(Header {
        magic: bytes[0],
        opcode: bytes[1],
        key_length: u16::from_be_bytes([bytes[2], bytes[3]]),
        extras_length: bytes[4],
        data_type: bytes[5],
        status: u16::from_be_bytes([bytes[6], bytes[7]]),
        total_body_length: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        opaque: u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
        cas: u64::from_be_bytes([
            bytes[16], bytes[17], bytes[18], bytes[19], bytes[20], bytes[21], bytes[22], bytes[23],
        ]),
    })
}

/// Decode one frame from the head of `bytes`.
///
/// Returns:
/// - `Ok(Some((frame, consumed)))` when a complete frame is available
/// - `Ok(None)` when more bytes are needed
/// - `Err(Decode)` when the header is malformed
pub fn decode_frame(bytes: &[u8], max_body_size: u32) -> Result<Option<(Frame, usize)>> {
    let header = match decode_header(bytes) {
        Some(header) => header,
        None => return Ok(None),
    };

    if header.magic != RESPONSE_MAGIC && header.magic != REQUEST_MAGIC {
        return Err(ClientError::Decode(format!(
            "invalid magic byte: 0x{:02x}",
            header.magic
        )));
    }

    if header.total_body_length > max_body_size {
        return Err(ClientError::Decode(format!(
            "body too large: {} bytes (max {})",
            header.total_body_length, max_body_size
        )));
    }

    let key_len = header.key_length as usize;
    let extras_len = header.extras_length as usize;
    let body_len = header.total_body_length as usize;

    if body_len < key_len + extras_len {
        return Err(ClientError::Decode(format!(
            "body length {} shorter than extras ({}) + key ({})",
            body_len, extras_len, key_len
        )));
    }

    let total_len = HEADER_SIZE + body_len;
    if bytes.len() < total_len {
        return Ok(None);
    }

    let body = Bytes::copy_from_slice(&bytes[HEADER_SIZE..total_len]);
    let extras = body.slice(..extras_len);
    let key = body.slice(extras_len..extras_len + key_len);
    let value = body.slice(extras_len + key_len..);

    Ok(Some((
        Frame {
            header,
            extras,
            key,
            value,
        },
        total_len,
    )))
}
