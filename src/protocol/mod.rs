//! Protocol Module
//!
//! Defines the memcached binary wire protocol as spoken by this client.
//!
//! ## Frame Format
//! ```text
//! ┌──────────────────────┬──────────┬─────────┬─────────────┐
//! │     Header (24)      │  Extras  │   Key   │    Value    │
//! └──────────────────────┴──────────┴─────────┴─────────────┘
//! ```
//!
//! Requests use magic `0x80`, responses `0x81`. All integers are
//! big-endian. Section lengths come from the header: key length (2),
//! extras length (1), total body length (4).
//!
//! ### Status Codes
//! - 0x00: SUCCESS
//! - 0x01: KEY_ENOENT (a miss for GET, an error otherwise)
//! - others: mapped to a message, or "Unknown error"

mod codec;
mod command;
mod decoder;
mod frame;
mod opcode;
mod response;

pub use codec::{
    counter_extras, decode_frame, decode_header, encode_frame, encode_request, request_frame,
    store_extras, HEADER_SIZE, SASL_MECHANISM,
};
pub use command::{Arg, CommandName, Request, MAX_KEY_LENGTH};
pub use decoder::ReplyDecoder;
pub use frame::{Frame, Header, REQUEST_MAGIC, RESPONSE_MAGIC};
pub use opcode::Opcode;
pub use response::{counter_value, interpret_reply, status_message, Status, UNKNOWN_ERROR};
