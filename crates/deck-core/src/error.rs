//! Error types for the deck protocol

use thiserror::Error;

/// Result type alias for deck protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Deck protocol error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A line could not be decomposed into a status line or `key: value` field
    #[error("bad response from deck: {0}")]
    MalformedResponse(String),

    /// Status code is not three ASCII digits
    #[error("invalid status code: {0}")]
    InvalidStatusCode(String),

    /// Buffered input grew past the limit without yielding a message
    #[error("receive buffer overflow: {size} bytes (max {max})")]
    BufferOverflow { size: usize, max: usize },

    /// Timecode is not `HH:MM:SS:FF` with zero-padded fields
    #[error("invalid timecode: {0}")]
    InvalidTimecode(String),

    /// Slot id outside 1..=3
    #[error("invalid slot id: {0}")]
    InvalidSlot(String),

    /// Unknown stop mode name
    #[error("invalid stop mode: {0}")]
    InvalidStopMode(String),

    /// Clip catalog row could not be parsed
    #[error("invalid clip data from deck: {0}")]
    InvalidClipData(String),
}

/// Device error codes (the 100-199 range)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    SyntaxError = 100,
    UnsupportedParameter = 101,
    InvalidValue = 102,
    Unsupported = 103,
    DiskFull = 104,
    NoDisk = 105,
    DiskError = 106,
    TimelineEmpty = 107,
    InternalError = 108,
    OutOfRange = 109,
    NoInput = 110,
    RemoteControlDisabled = 111,
    ConnectionRejected = 120,
    InvalidState = 150,
    InvalidCodec = 151,
    InvalidFormat = 160,
    InvalidToken = 161,
    FormatNotPrepared = 162,
}

impl ErrorCode {
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            100 => Some(ErrorCode::SyntaxError),
            101 => Some(ErrorCode::UnsupportedParameter),
            102 => Some(ErrorCode::InvalidValue),
            103 => Some(ErrorCode::Unsupported),
            104 => Some(ErrorCode::DiskFull),
            105 => Some(ErrorCode::NoDisk),
            106 => Some(ErrorCode::DiskError),
            107 => Some(ErrorCode::TimelineEmpty),
            108 => Some(ErrorCode::InternalError),
            109 => Some(ErrorCode::OutOfRange),
            110 => Some(ErrorCode::NoInput),
            111 => Some(ErrorCode::RemoteControlDisabled),
            120 => Some(ErrorCode::ConnectionRejected),
            150 => Some(ErrorCode::InvalidState),
            151 => Some(ErrorCode::InvalidCodec),
            160 => Some(ErrorCode::InvalidFormat),
            161 => Some(ErrorCode::InvalidToken),
            162 => Some(ErrorCode::FormatNotPrepared),
            _ => None,
        }
    }

    /// Human-readable text the device documents for this code
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::SyntaxError => "syntax error",
            ErrorCode::UnsupportedParameter => "unsupported parameter",
            ErrorCode::InvalidValue => "invalid value",
            ErrorCode::Unsupported => "unsupported",
            ErrorCode::DiskFull => "disk full",
            ErrorCode::NoDisk => "no disk",
            ErrorCode::DiskError => "disk error",
            ErrorCode::TimelineEmpty => "timeline empty",
            ErrorCode::InternalError => "internal error",
            ErrorCode::OutOfRange => "out of range",
            ErrorCode::NoInput => "no input",
            ErrorCode::RemoteControlDisabled => "remote control disabled",
            ErrorCode::ConnectionRejected => "connection rejected",
            ErrorCode::InvalidState => "invalid state",
            ErrorCode::InvalidCodec => "invalid codec",
            ErrorCode::InvalidFormat => "invalid format",
            ErrorCode::InvalidToken => "invalid token",
            ErrorCode::FormatNotPrepared => "format not prepared",
        }
    }

    pub fn as_u16(&self) -> u16 {
        *self as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_table() {
        assert_eq!(ErrorCode::from_u16(104), Some(ErrorCode::DiskFull));
        assert_eq!(ErrorCode::from_u16(109).unwrap().description(), "out of range");
        assert_eq!(ErrorCode::from_u16(162).unwrap().as_u16(), 162);
        assert_eq!(ErrorCode::from_u16(112), None);
        assert_eq!(ErrorCode::from_u16(200), None);
    }
}
