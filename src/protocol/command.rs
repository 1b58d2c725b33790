//! Command definitions
//!
//! Operation names, loosely typed call arguments, and the validated
//! [`Request`] they are parsed into.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use super::Opcode;
use crate::error::{ClientError, Result};

/// Longest key the server accepts
pub const MAX_KEY_LENGTH: usize = 250;

/// Known operation names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandName {
    Get,
    Set,
    Add,
    Replace,
    Delete,
    Increment,
    Decrement,
    Append,
    Prepend,
    Quit,
    Version,
    Noop,
    Auth,
}

impl CommandName {
    /// Every operation name, in the order they are documented
    pub const ALL: [CommandName; 13] = [
        CommandName::Get,
        CommandName::Set,
        CommandName::Add,
        CommandName::Replace,
        CommandName::Delete,
        CommandName::Increment,
        CommandName::Decrement,
        CommandName::Append,
        CommandName::Prepend,
        CommandName::Quit,
        CommandName::Version,
        CommandName::Noop,
        CommandName::Auth,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandName::Get => "get",
            CommandName::Set => "set",
            CommandName::Add => "add",
            CommandName::Replace => "replace",
            CommandName::Delete => "delete",
            CommandName::Increment => "increment",
            CommandName::Decrement => "decrement",
            CommandName::Append => "append",
            CommandName::Prepend => "prepend",
            CommandName::Quit => "quit",
            CommandName::Version => "version",
            CommandName::Noop => "noop",
            CommandName::Auth => "auth",
        }
    }

    /// Write commands whose value argument must be present
    pub fn is_value_bearing(&self) -> bool {
        matches!(
            self,
            CommandName::Set
                | CommandName::Add
                | CommandName::Replace
                | CommandName::Append
                | CommandName::Prepend
        )
    }
}

impl FromStr for CommandName {
    type Err = ClientError;

    fn from_str(name: &str) -> Result<Self> {
        CommandName::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| ClientError::UnknownCommand(name.to_string()))
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single positional call argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Bytes(Bytes),
    Int(u64),
    Null,
}

impl Arg {
    /// Byte form of the argument; integers are rendered in decimal
    fn to_bytes(&self) -> Option<Bytes> {
        match self {
            Arg::Bytes(b) => Some(b.clone()),
            Arg::Int(n) => Some(Bytes::from(n.to_string())),
            Arg::Null => None,
        }
    }

    /// Integer form of the argument; byte strings must hold a decimal number
    fn to_u64(&self) -> Option<u64> {
        match self {
            Arg::Int(n) => Some(*n),
            Arg::Bytes(b) => std::str::from_utf8(b).ok()?.trim().parse().ok(),
            Arg::Null => None,
        }
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::Bytes(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::Bytes(Bytes::from(s))
    }
}

impl From<&[u8]> for Arg {
    fn from(b: &[u8]) -> Self {
        Arg::Bytes(Bytes::copy_from_slice(b))
    }
}

impl From<Vec<u8>> for Arg {
    fn from(b: Vec<u8>) -> Self {
        Arg::Bytes(Bytes::from(b))
    }
}

impl From<Bytes> for Arg {
    fn from(b: Bytes) -> Self {
        Arg::Bytes(b)
    }
}

impl From<u64> for Arg {
    fn from(n: u64) -> Self {
        Arg::Int(n)
    }
}

impl From<u32> for Arg {
    fn from(n: u32) -> Self {
        Arg::Int(n as u64)
    }
}

impl<T: Into<Arg>> From<Option<T>> for Arg {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Arg::Null)
    }
}

/// A validated command ready for encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Get { key: Bytes },
    Set { key: Bytes, value: Bytes, expiration: Option<u32> },
    Add { key: Bytes, value: Bytes, expiration: Option<u32> },
    Replace { key: Bytes, value: Bytes, expiration: Option<u32> },
    Delete { key: Bytes },
    Increment { key: Bytes, amount: u64, expiration: Option<u32> },
    Decrement { key: Bytes, amount: u64, expiration: Option<u32> },
    Append { key: Bytes, value: Bytes },
    Prepend { key: Bytes, value: Bytes },
    Quit,
    Version,
    Noop,
    Auth { username: Bytes, password: Bytes },
}

impl Request {
    /// Parse positional arguments for `name`.
    ///
    /// Argument layout:
    /// - get, delete:                     key
    /// - set, add, replace:               key, value, [ttl]
    /// - increment, decrement:            key, amount, [ttl]
    /// - append, prepend:                 key, value
    /// - auth:                            username, password
    /// - quit, version, noop:             (none)
    pub fn parse(name: CommandName, args: Vec<Arg>) -> Result<Self> {
        let mut args = ArgReader::new(name, args);

        let request = match name {
            CommandName::Get => Request::Get { key: args.key()? },
            CommandName::Delete => Request::Delete { key: args.key()? },
            CommandName::Set | CommandName::Add | CommandName::Replace => {
                let key = args.key()?;
                let value = args.value()?;
                let expiration = args.optional_ttl()?;
                match name {
                    CommandName::Set => Request::Set { key, value, expiration },
                    CommandName::Add => Request::Add { key, value, expiration },
                    _ => Request::Replace { key, value, expiration },
                }
            }
            CommandName::Increment | CommandName::Decrement => {
                let key = args.key()?;
                let amount = args.amount()?;
                let expiration = args.optional_ttl()?;
                if name == CommandName::Increment {
                    Request::Increment { key, amount, expiration }
                } else {
                    Request::Decrement { key, amount, expiration }
                }
            }
            CommandName::Append => {
                let key = args.key()?;
                Request::Append { key, value: args.value()? }
            }
            CommandName::Prepend => {
                let key = args.key()?;
                Request::Prepend { key, value: args.value()? }
            }
            CommandName::Auth => {
                let username = args.required("username")?;
                let password = args.required("password")?;
                Request::Auth { username, password }
            }
            CommandName::Quit => Request::Quit,
            CommandName::Version => Request::Version,
            CommandName::Noop => Request::Noop,
        };

        args.finish()?;
        Ok(request)
    }

    /// Operation name of this request
    pub fn name(&self) -> CommandName {
        match self {
            Request::Get { .. } => CommandName::Get,
            Request::Set { .. } => CommandName::Set,
            Request::Add { .. } => CommandName::Add,
            Request::Replace { .. } => CommandName::Replace,
            Request::Delete { .. } => CommandName::Delete,
            Request::Increment { .. } => CommandName::Increment,
            Request::Decrement { .. } => CommandName::Decrement,
            Request::Append { .. } => CommandName::Append,
            Request::Prepend { .. } => CommandName::Prepend,
            Request::Quit => CommandName::Quit,
            Request::Version => CommandName::Version,
            Request::Noop => CommandName::Noop,
            Request::Auth { .. } => CommandName::Auth,
        }
    }

    /// Opcode this request is encoded with
    pub fn opcode(&self) -> Opcode {
        match self {
            Request::Get { .. } => Opcode::Get,
            Request::Set { .. } => Opcode::Set,
            Request::Add { .. } => Opcode::Add,
            Request::Replace { .. } => Opcode::Replace,
            Request::Delete { .. } => Opcode::Delete,
            Request::Increment { .. } => Opcode::Increment,
            Request::Decrement { .. } => Opcode::Decrement,
            Request::Append { .. } => Opcode::Append,
            Request::Prepend { .. } => Opcode::Prepend,
            Request::Quit => Opcode::Quit,
            Request::Version => Opcode::Version,
            Request::Noop => Opcode::Noop,
            Request::Auth { .. } => Opcode::SaslAuth,
        }
    }
}

/// Positional cursor over call arguments
struct ArgReader {
    name: CommandName,
    args: std::vec::IntoIter<Arg>,
}

impl ArgReader {
    fn new(name: CommandName, args: Vec<Arg>) -> Self {
        Self {
            name,
            args: args.into_iter(),
        }
    }

    fn invalid(&self, detail: impl fmt::Display) -> ClientError {
        ClientError::InvalidArguments(format!("{} {}", self.name, detail))
    }

    fn required(&mut self, what: &str) -> Result<Bytes> {
        match self.args.next().as_ref().and_then(Arg::to_bytes) {
            Some(bytes) => Ok(bytes),
            None => Err(self.invalid(format_args!("requires a {}", what))),
        }
    }

    fn key(&mut self) -> Result<Bytes> {
        let key = self.required("key")?;
        if key.is_empty() {
            return Err(self.invalid("key must not be empty"));
        }
        if key.len() > MAX_KEY_LENGTH {
            return Err(self.invalid(format_args!(
                "key too long: {} bytes (max {})",
                key.len(),
                MAX_KEY_LENGTH
            )));
        }
        Ok(key)
    }

    /// Value of a value-bearing write; absence is a [`ClientError::MissingValue`]
    fn value(&mut self) -> Result<Bytes> {
        self.args
            .next()
            .as_ref()
            .and_then(Arg::to_bytes)
            .ok_or(ClientError::MissingValue {
                command: self.name.as_str(),
            })
    }

    fn amount(&mut self) -> Result<u64> {
        match self.args.next() {
            Some(arg) => arg
                .to_u64()
                .ok_or_else(|| self.invalid("amount must be an unsigned integer")),
            None => Err(self.invalid("requires an amount")),
        }
    }

    fn optional_ttl(&mut self) -> Result<Option<u32>> {
        let arg = match self.args.next() {
            None | Some(Arg::Null) => return Ok(None),
            Some(arg) => arg,
        };
        arg.to_u64()
            .and_then(|ttl| u32::try_from(ttl).ok())
            .map(Some)
            .ok_or_else(|| self.invalid("ttl must be a 32-bit unsigned integer"))
    }

    fn finish(mut self) -> Result<()> {
        let extra = self.args.by_ref().count();
        if extra > 0 {
            return Err(self.invalid(format_args!("got {} unexpected argument(s)", extra)));
        }
        Ok(())
    }
}
