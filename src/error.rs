//! Error types for memwire
//!
//! Provides a unified error type for all client operations.

use thiserror::Error;

/// Result type alias using ClientError
pub type Result<T> = std::result::Result<T, ClientError>;

/// Unified error type for memwire operations
#[derive(Debug, Error)]
pub enum ClientError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Argument Errors (reported synchronously, never touch the connection)
    // -------------------------------------------------------------------------
    #[error("send_command: unknown command '{0}'")]
    UnknownCommand(String),

    #[error("send_command: {0}")]
    InvalidArguments(String),

    #[error("send_command: {command} value must not be undefined or null")]
    MissingValue { command: &'static str },

    // -------------------------------------------------------------------------
    // Protocol Errors (non-success status for a single command)
    // -------------------------------------------------------------------------
    #[error("{message}")]
    Server { status: u16, message: String },

    // -------------------------------------------------------------------------
    // Decode Errors (fatal to the current connection)
    // -------------------------------------------------------------------------
    #[error("Memcached reply parser error: {0}")]
    Decode(String),

    // -------------------------------------------------------------------------
    // Transport Errors
    // -------------------------------------------------------------------------
    #[error("{0}")]
    ConnectionFailed(String),

    #[error("{0}")]
    ConnectionGone(String),

    #[error("send_command: stream not writeable. enable_offline_queue is false")]
    NotWritable,

    #[error("connection closed by client")]
    Closed,

    // -------------------------------------------------------------------------
    // Handshake Errors
    // -------------------------------------------------------------------------
    #[error("Auth error: {0}")]
    AuthFailed(String),

    #[error("Ready check failed: {0}")]
    ReadyCheckFailed(String),

    // -------------------------------------------------------------------------
    // Client Errors
    // -------------------------------------------------------------------------
    #[error("callback panicked: {0}")]
    CallbackPanicked(String),

    #[error("timed out waiting for reply")]
    Timeout,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Status code carried by a server error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for errors raised by argument validation before any I/O
    pub fn is_argument_error(&self) -> bool {
        matches!(
            self,
            ClientError::UnknownCommand(_)
                | ClientError::InvalidArguments(_)
                | ClientError::MissingValue { .. }
        )
    }
}
