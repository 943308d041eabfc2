//! Deck Core
//!
//! Core types and parsing primitives for the deck control protocol, the
//! line-oriented TCP protocol spoken by networked tape-style video decks.
//!
//! This crate provides:
//! - Status codes and the device error table ([`StatusCode`], [`ErrorCode`])
//! - Protocol messages and payloads ([`ProtocolMessage`], [`Payload`])
//! - Incremental frame parsing ([`FrameParser`])
//! - Timecode conversion ([`Timecode`], [`timecode_to_millis`])
//! - The command catalogue ([`Command`])
//! - Slot and clip types ([`SlotId`], [`SlotStatus`], [`Clip`])

pub mod command;
pub mod error;
pub mod message;
pub mod parser;
pub mod timecode;
pub mod types;

pub use command::Command;
pub use error::{Error, ErrorCode, Result};
pub use message::{Block, Payload, ProtocolMessage, StatusClass, StatusCode};
pub use parser::FrameParser;
pub use timecode::{timecode_to_millis, Timecode};
pub use types::*;

/// Default TCP control port of the deck
pub const DEFAULT_PORT: u16 = 9993;

/// Default frame rate used for timecode conversion
pub const DEFAULT_FPS: u32 = 60;

/// Number of storage slots on the deck
pub const SLOT_COUNT: usize = 3;
