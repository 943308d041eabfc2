//! Client error types

use deck_core::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("not connected")]
    NotConnected,

    /// The connection was ended with [`crate::Deck::end`]
    #[error("connection closed")]
    Closed,

    /// The socket went away, or the session was torn down, while the command waited
    #[error("connection to deck lost")]
    ConnectionLost,

    /// The deck answered with a code in the 100-199 range
    #[error("deck error {code}: {message}")]
    Device { code: StatusCode, message: String },

    /// The backlog was full when the command was submitted
    #[error("too many simultaneous commands to deck")]
    TooManyCommands,

    /// The deck never acknowledged the command
    #[error("no reply to '{command}' after retries")]
    RetriesExhausted { command: String },

    /// The reply had the right code but not the expected shape
    #[error("unexpected reply from deck: {0}")]
    UnexpectedReply(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] deck_core::Error),

    #[error("transport error: {0}")]
    Transport(#[from] deck_transport::TransportError),
}

impl ClientError {
    /// Build the device error for a 1xx reply, preferring the documented text
    pub fn device(code: StatusCode, text: &str) -> Self {
        let message = match code.error_code() {
            Some(known) => known.description().to_string(),
            None if text.is_empty() => "unknown error".to_string(),
            None => text.to_string(),
        };
        ClientError::Device { code, message }
    }
}
