//! Response definitions
//!
//! Status codes carried by response frames and the mapping from a decoded
//! reply to the result handed to a caller.

use bytes::Bytes;

use super::{Frame, Opcode};
use crate::error::{ClientError, Result};

/// Response status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Status {
    Success = 0x00,
    KeyNotFound = 0x01,
    KeyExists = 0x02,
    ValueTooLarge = 0x03,
    InvalidArguments = 0x04,
    ItemNotStored = 0x05,
    NonNumericValue = 0x06,
    WrongVbucket = 0x07,
    AuthError = 0x08,
    AuthContinue = 0x09,
    UnknownCommand = 0x81,
    OutOfMemory = 0x82,
    NotSupported = 0x83,
    InternalError = 0x84,
    Busy = 0x85,
    TemporaryFailure = 0x86,
}

/// Message used for status codes with no entry in the table
pub const UNKNOWN_ERROR: &str = "Unknown error";

impl Status {
    /// Map a raw status code to a known status
    pub fn from_u16(code: u16) -> Option<Self> {
        let status = match code {
            0x00 => Status::Success,
            0x01 => Status::KeyNotFound,
            0x02 => Status::KeyExists,
            0x03 => Status::ValueTooLarge,
            0x04 => Status::InvalidArguments,
            0x05 => Status::ItemNotStored,
            0x06 => Status::NonNumericValue,
            0x07 => Status::WrongVbucket,
            0x08 => Status::AuthError,
            0x09 => Status::AuthContinue,
            0x81 => Status::UnknownCommand,
            0x82 => Status::OutOfMemory,
            0x83 => Status::NotSupported,
            0x84 => Status::InternalError,
            0x85 => Status::Busy,
            0x86 => Status::TemporaryFailure,
            _ => return None,
        };
        Some(status)
    }

    /// Human readable message for this status
    pub fn message(&self) -> &'static str {
        match self {
            Status::Success => "Success",
            Status::KeyNotFound => "Key not found",
            Status::KeyExists => "Key exists",
            Status::ValueTooLarge => "Value too large",
            Status::InvalidArguments => "Invalid arguments",
            Status::ItemNotStored => "Item not stored",
            Status::NonNumericValue => "Incr/Decr on non-numeric value",
            Status::WrongVbucket => "The vbucket belongs to another server",
            Status::AuthError => "Authentication error",
            Status::AuthContinue => "Authentication continue",
            Status::UnknownCommand => "Unknown command",
            Status::OutOfMemory => "Out of memory",
            Status::NotSupported => "Not supported",
            Status::InternalError => "Internal error",
            Status::Busy => "Busy",
            Status::TemporaryFailure => "Temporary failure",
        }
    }
}

/// Message for a raw status code, falling back to [`UNKNOWN_ERROR`]
pub fn status_message(code: u16) -> &'static str {
    Status::from_u16(code).map(|s| s.message()).unwrap_or(UNKNOWN_ERROR)
}

/// Turn a decoded reply into the result delivered to a caller.
///
/// - SUCCESS yields the value section.
/// - KEY_ENOENT on a GET is a miss: `Ok(None)`, not an error.
/// - Anything else becomes [`ClientError::Server`] with the mapped message.
pub fn interpret_reply(frame: &Frame) -> Result<Option<Bytes>> {
    let status = frame.header.status;

    if status == Status::KeyNotFound as u16 && frame.header.opcode == Opcode::Get as u8 {
        return Ok(None);
    }

    if status != Status::Success as u16 {
        return Err(ClientError::Server {
            status,
            message: status_message(status).to_string(),
        });
    }

    Ok(Some(frame.value.clone()))
}

/// Decode the 8-byte big-endian counter returned by INCREMENT/DECREMENT
pub fn counter_value(value: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = value.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}
