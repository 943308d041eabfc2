//! Command catalogue
//!
//! Each command knows its wire text and the status codes that acknowledge it.

use bytes::Bytes;
use std::fmt;

use crate::message::StatusCode;
use crate::types::{SlotId, StopMode};

/// A command sent to the deck
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Enable slot and transport notifications
    Notify { slot: bool, transport: bool },
    SlotSelect(SlotId),
    /// Query the selected slot; answered with a `202 slot info` block
    SlotInfo,
    /// Query the selected slot's clips; answered with a `205 clips info` block
    ClipsGet,
    PlayOption { stop_mode: StopMode },
    PlayrangeSet { clip_id: u32 },
    GotoClipStart,
    PlaySingleClip,
    PlayStopBlackSingleClip,
    Stop,
    /// Ask the deck to close the connection; never acknowledged
    Quit,
    /// Arbitrary command text with its own accepted codes
    Custom { text: String, accept: Vec<StatusCode> },
}

impl Command {
    pub fn custom(text: impl Into<String>, accept: &[StatusCode]) -> Self {
        Command::Custom {
            text: text.into(),
            accept: accept.to_vec(),
        }
    }

    /// Command text without the line terminator
    pub fn text(&self) -> String {
        match self {
            Command::Notify { slot, transport } => {
                format!("notify: slot: {} transport: {}", slot, transport)
            }
            Command::SlotSelect(slot) => format!("slot select: slot id: {}", slot),
            Command::SlotInfo => "slot info".to_string(),
            Command::ClipsGet => "clips get".to_string(),
            Command::PlayOption { stop_mode } => format!("play option: stop mode: {}", stop_mode),
            Command::PlayrangeSet { clip_id } => format!("playrange set: clip id: {}", clip_id),
            Command::GotoClipStart => "goto: clip: start".to_string(),
            Command::PlaySingleClip => "play: single clip: true".to_string(),
            Command::PlayStopBlackSingleClip => "play: stop mode: black single clip: true".to_string(),
            Command::Stop => "stop".to_string(),
            Command::Quit => "quit".to_string(),
            Command::Custom { text, .. } => text.trim_end().to_string(),
        }
    }

    /// Status codes that complete this command successfully
    pub fn accepted_codes(&self) -> Vec<StatusCode> {
        match self {
            Command::SlotInfo => vec![StatusCode::SLOT_INFO],
            Command::ClipsGet => vec![StatusCode::CLIPS_INFO],
            Command::Quit => Vec::new(),
            Command::Custom { accept, .. } => accept.clone(),
            _ => vec![StatusCode::OK],
        }
    }

    /// Wire form, terminated by a newline
    pub fn encode(&self) -> Bytes {
        let mut text = self.text();
        text.push('\n');
        Bytes::from(text)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_text() {
        assert_eq!(
            Command::Notify { slot: true, transport: true }.encode(),
            Bytes::from_static(b"notify: slot: true transport: true\n")
        );
        assert_eq!(Command::SlotSelect(SlotId::TWO).text(), "slot select: slot id: 2");
        assert_eq!(
            Command::PlayOption { stop_mode: StopMode::LastFrame }.text(),
            "play option: stop mode: lastframe"
        );
        assert_eq!(Command::PlayrangeSet { clip_id: 7 }.text(), "playrange set: clip id: 7");
        assert_eq!(Command::custom("device info\n", &[]).text(), "device info");
    }

    #[test]
    fn test_accepted_codes() {
        assert_eq!(Command::SlotInfo.accepted_codes(), vec![StatusCode::SLOT_INFO]);
        assert_eq!(Command::ClipsGet.accepted_codes(), vec![StatusCode::CLIPS_INFO]);
        assert_eq!(Command::Stop.accepted_codes(), vec![StatusCode::OK]);
        assert!(Command::Quit.accepted_codes().is_empty());
    }
}
