//! Frame definitions
//!
//! One complete binary protocol message: a fixed header followed by the
//! extras, key and value sections.

use bytes::Bytes;

use super::Opcode;

/// Magic byte of a request frame
pub const REQUEST_MAGIC: u8 = 0x80;

/// Magic byte of a response frame
pub const RESPONSE_MAGIC: u8 = 0x81;

/// Fixed header shared by requests and responses.
///
/// `status` holds the vbucket id in requests and the status code in
/// responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u8,
    pub opcode: u8,
    pub key_length: u16,
    pub extras_length: u8,
    pub data_type: u8,
    pub status: u16,
    pub total_body_length: u32,
    pub opaque: u32,
    pub cas: u64,
}

/// A decoded (or about to be encoded) frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: Header,
    pub extras: Bytes,
    pub key: Bytes,
    pub value: Bytes,
}

impl Frame {
    /// Build a request frame; lengths are derived from the sections
    pub fn request(opcode: Opcode, key: Bytes, extras: Bytes, value: Bytes, opaque: u32) -> Self {
        Self::with_magic(REQUEST_MAGIC, opcode as u8, 0, key, extras, value, opaque)
    }

    /// Build a response frame; lengths are derived from the sections
    pub fn response(opcode: Opcode, status: u16, key: Bytes, extras: Bytes, value: Bytes, opaque: u32) -> Self {
        Self::with_magic(RESPONSE_MAGIC, opcode as u8, status, key, extras, value, opaque)
    }

    fn with_magic(
        magic: u8,
        opcode: u8,
        status: u16,
        key: Bytes,
        extras: Bytes,
        value: Bytes,
        opaque: u32,
    ) -> Self {
        let header = Header {
            magic,
            opcode,
            key_length: key.len() as u16,
            extras_length: extras.len() as u8,
            data_type: 0,
            status,
            total_body_length: (extras.len() + key.len() + value.len()) as u32,
            opaque,
            cas: 0,
        };
        Self {
            header,
            extras,
            key,
            value,
        }
    }

    /// The opcode, if it is one this client knows
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_u8(self.header.opcode)
    }

    /// Total encoded size: header plus body
    pub fn encoded_len(&self) -> usize {
        super::HEADER_SIZE + self.header.total_body_length as usize
    }
}
