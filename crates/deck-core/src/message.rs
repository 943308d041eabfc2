//! Protocol messages
//!
//! Every message from the deck starts with a three digit status code. The
//! payload is either the rest of that line, or a named block of `key: value`
//! fields terminated by an empty line:
//!
//! ```text
//! 200 ok\r\n
//!
//! 202 slot info:\r\n
//! slot id: 1\r\n
//! status: mounted\r\n
//! \r\n
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, ErrorCode};

/// Three digit status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusCode(u16);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(200);
    pub const SLOT_INFO: StatusCode = StatusCode(202);
    pub const CLIPS_INFO: StatusCode = StatusCode(205);
    pub const CONNECTION_INFO: StatusCode = StatusCode(500);
    pub const SLOT_NOTIFY: StatusCode = StatusCode(502);
    pub const TRANSPORT_NOTIFY: StatusCode = StatusCode(508);

    /// Create a status code, rejecting values outside 100..=999
    pub fn new(code: u16) -> Option<Self> {
        (100..=999).contains(&code).then_some(Self(code))
    }

    pub fn as_u16(&self) -> u16 {
        self.0
    }

    pub fn class(&self) -> StatusClass {
        match self.0 {
            100..=199 => StatusClass::DeviceError,
            200..=299 => StatusClass::Success,
            500..=599 => StatusClass::Notification,
            _ => StatusClass::Unknown,
        }
    }

    pub fn is_device_error(&self) -> bool {
        self.class() == StatusClass::DeviceError
    }

    /// Named device error, if this code is in the device error table
    pub fn error_code(&self) -> Option<ErrorCode> {
        ErrorCode::from_u16(self.0)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

impl FromStr for StatusCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 3 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidStatusCode(s.to_string()));
        }
        s.parse::<u16>()
            .ok()
            .and_then(StatusCode::new)
            .ok_or_else(|| Error::InvalidStatusCode(s.to_string()))
    }
}

/// Status code ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 100-199
    DeviceError,
    /// 200-299
    Success,
    /// 500-599, unsolicited
    Notification,
    Unknown,
}

/// A named block of ordered `key: value` fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Block {
    pub name: String,
    fields: Vec<(String, String)>,
}

impl Block {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Append a field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.push((key.into(), value.into()));
    }

    /// Look up a field; a repeated key resolves to its last value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Fields in wire order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields collapsed into a map
    pub fn to_map(&self) -> std::collections::HashMap<String, String> {
        self.fields.iter().cloned().collect()
    }
}

/// Message payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Single-line reply text (empty for a bare code)
    Text(String),
    /// Structured reply or notification
    Block(Block),
}

impl Payload {
    pub fn as_block(&self) -> Option<&Block> {
        match self {
            Payload::Block(block) => Some(block),
            Payload::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            Payload::Block(_) => None,
        }
    }

    /// Block name or reply text
    pub fn summary(&self) -> &str {
        match self {
            Payload::Text(text) => text,
            Payload::Block(block) => &block.name,
        }
    }
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Text(String::new())
    }
}

/// A decoded message from the deck
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMessage {
    pub code: StatusCode,
    pub payload: Payload,
}

impl ProtocolMessage {
    pub fn text(code: StatusCode, text: impl Into<String>) -> Self {
        Self {
            code,
            payload: Payload::Text(text.into()),
        }
    }

    pub fn block(code: StatusCode, block: Block) -> Self {
        Self {
            code,
            payload: Payload::Block(block),
        }
    }

    /// Block payload, if it carries the expected name
    pub fn named_block(&self, name: &str) -> Option<&Block> {
        self.payload.as_block().filter(|block| block.name == name)
    }
}

impl fmt::Display for ProtocolMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Payload::Text(text) if text.is_empty() => write!(f, "{}", self.code),
            Payload::Text(text) => write!(f, "{} {}", self.code, text),
            Payload::Block(block) => {
                write!(f, "{} {}:", self.code, block.name)?;
                for (key, value) in block.fields() {
                    write!(f, " {}: {};", key, value)?;
                }
                Ok(())
            }
        }
    }
}
